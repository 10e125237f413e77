//! Type-safe enums shared across the wizard panels
//!
//! These replace the integer constants and free-form strings the panels
//! exchange (cell states, failure actions, shortcut locations) with enums
//! that provide compile-time validation and exhaustive matching.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Recovery decision for a failed job.
///
/// Exactly one of these is set on an `ExecutionResult` by the decision
/// callback before the engine moves past a failing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum JobAction {
    /// Ignore the failure and proceed with the next job
    #[strum(to_string = "continue", serialize = "c")]
    Continue,
    /// Stop the whole sequence; the run fails
    #[strum(to_string = "abort", serialize = "a")]
    Abort,
    /// Stop the sequence and return control for re-configuration
    #[strum(to_string = "reconfigure", serialize = "r")]
    Reconfigure,
}

/// What happens to dependents when a pack is deselected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeselectPolicy {
    /// Only the pack itself is removed; unmet dependencies surface at validation
    #[default]
    Lenient,
    /// Selected packs that (transitively) depend on the removed pack are removed too
    Cascade,
}

/// Cell value of one row in the flat packs table.
///
/// The integer codes match the legacy table model so snapshots taken from
/// older front ends stay comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum PackCellState {
    /// Selected and user-toggleable
    Selected,
    /// Not selected and user-toggleable
    Deselected,
    /// Selected and locked (required, or needed by a required pack)
    RequiredSelected,
    /// Not selected and locked (its exclude group is held by a locked pack)
    Disabled,
    /// Not selected itself, but some of its child packs are
    Partial,
}

impl PackCellState {
    /// Legacy integer code of this state
    pub const fn code(self) -> i8 {
        match self {
            Self::Selected => 1,
            Self::Deselected => 0,
            Self::RequiredSelected => -1,
            Self::Disabled => -2,
            Self::Partial => 2,
        }
    }

    /// True if the pack of this row will be installed
    pub const fn is_selected(self) -> bool {
        matches!(self, Self::Selected | Self::RequiredSelected)
    }

    /// True if the user may toggle this row
    pub const fn is_editable(self) -> bool {
        !matches!(self, Self::RequiredSelected | Self::Disabled)
    }
}

/// Where a resolved shortcut is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ShortcutLocation {
    Desktop,
    Applications,
    StartMenu,
    Startup,
}

/// Location of the program group that collects grouped shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum GroupLocation {
    #[default]
    Applications,
    StartMenu,
}

/// Window state a shortcut launches its target with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum InitialState {
    NoShow,
    #[default]
    Normal,
    Maximized,
    Minimized,
}

impl InitialState {
    /// Parse an `initialState` value, falling back to `Normal` for anything unknown.
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}
