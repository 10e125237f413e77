//! Shortcut specification resolution
//!
//! A shortcut spec lists the links an install wants (desktop, applications
//! menu, start menu, startup, program group). Resolution filters the list
//! against the selected packs, substitutes install variables and expands
//! every entry into one placement per requested location. Creating the
//! links is left to a platform [`ShortcutCreator`].

use std::path::{MAIN_SEPARATOR, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::selection::SelectionState;
use crate::substitute::VariableSubstitutor;
use crate::types::{GroupLocation, InitialState, ShortcutLocation};

#[derive(Debug, Error)]
pub enum ShortcutError {
    #[error("shortcuts are not supported on this platform")]
    NotSupported,

    #[error("failed to create shortcut '{name}' ({location}): {reason}")]
    Create {
        name: String,
        location: ShortcutLocation,
        reason: String,
    },
}

/// Program group the grouped shortcuts go into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramGroupSpec {
    #[serde(default)]
    pub default_name: String,
    #[serde(default)]
    pub location: GroupLocation,
}

/// One `<shortcut>` of the spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShortcutEntry {
    pub name: Option<String>,
    pub target: Option<String>,
    pub subgroup: Option<String>,
    pub description: String,
    pub command_line: String,
    pub icon_file: String,
    pub icon_index: i32,
    pub working_directory: String,
    /// noShow, normal, maximized or minimized; anything else is normal
    pub initial_state: String,
    pub desktop: bool,
    pub applications: bool,
    pub start_menu: bool,
    pub startup: bool,
    pub program_group: bool,
    /// Pack references; empty means always
    pub create_for_packs: Vec<String>,
}

/// The whole shortcut specification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShortcutSpec {
    /// Behave as if the platform had no shortcut support
    pub not_supported: bool,
    pub program_group: Option<ProgramGroupSpec>,
    pub shortcuts: Vec<ShortcutEntry>,
}

/// A shortcut to create at one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutPlacement {
    pub location: ShortcutLocation,
    /// Placed inside the program group rather than directly at `location`
    pub in_program_group: bool,
    pub name: String,
    pub subgroup: Option<String>,
    pub description: String,
    pub target: PathBuf,
    pub command_line: String,
    pub icon_file: Option<PathBuf>,
    pub icon_index: i32,
    pub working_directory: Option<PathBuf>,
    pub initial_state: InitialState,
}

/// Result of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShortcuts {
    pub supported: bool,
    pub program_group: String,
    pub group_location: GroupLocation,
    pub placements: Vec<ShortcutPlacement>,
}

impl ResolvedShortcuts {
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    pub fn has_desktop_shortcuts(&self) -> bool {
        self.placements.iter().any(|p| p.location == ShortcutLocation::Desktop)
    }
}

fn fix_separators(path: &str) -> String {
    path.chars()
        .map(|c| if c == '/' || c == '\\' { MAIN_SEPARATOR } else { c })
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn optional_path(value: String) -> Option<PathBuf> {
    if value.is_empty() { None } else { Some(PathBuf::from(value)) }
}

/// Expand `spec` into placements for the current selection.
///
/// A spec marked not supported resolves to no placements.
pub fn resolve(
    spec: &ShortcutSpec,
    state: &SelectionState,
    subst: &VariableSubstitutor<'_>,
) -> ResolvedShortcuts {
    let group = spec.program_group.clone().unwrap_or_default();
    let mut placements = Vec::new();

    if spec.not_supported {
        log::info!("Shortcuts are not supported for this install, nothing to resolve");
        return ResolvedShortcuts {
            supported: false,
            program_group: group.default_name,
            group_location: group.location,
            placements,
        };
    }

    for entry in &spec.shortcuts {
        let Some(name) = non_empty(entry.name.as_deref()) else {
            log::warn!("Shortcut without a name skipped");
            continue;
        };
        let Some(target) = non_empty(entry.target.as_deref()) else {
            log::warn!("Shortcut '{}' has no target, skipped", name);
            continue;
        };
        if !entry.create_for_packs.is_empty()
            && !entry.create_for_packs.iter().any(|p| state.is_selected_ref(p))
        {
            log::debug!("Shortcut '{}' skipped: none of its packs are selected", name);
            continue;
        }

        let template = ShortcutPlacement {
            location: ShortcutLocation::Applications,
            in_program_group: false,
            name: name.to_string(),
            subgroup: entry.subgroup.clone(),
            description: entry.description.clone(),
            target: PathBuf::from(subst.substitute(&fix_separators(target))),
            command_line: subst.substitute(&entry.command_line),
            icon_file: optional_path(subst.substitute(&fix_separators(&entry.icon_file))),
            icon_index: entry.icon_index,
            working_directory: optional_path(
                subst.substitute(&fix_separators(&entry.working_directory)),
            ),
            initial_state: InitialState::parse_lenient(&entry.initial_state),
        };

        let requested = [
            (entry.desktop, ShortcutLocation::Desktop, false),
            (entry.applications, ShortcutLocation::Applications, false),
            (entry.start_menu, ShortcutLocation::StartMenu, false),
            (entry.startup, ShortcutLocation::Startup, false),
            (entry.program_group, group_placement(group.location), true),
        ];
        for (wanted, location, in_program_group) in requested {
            if wanted {
                placements.push(ShortcutPlacement {
                    location,
                    in_program_group,
                    ..template.clone()
                });
            }
        }
    }

    log::info!("Resolved {} shortcut placement(s)", placements.len());
    ResolvedShortcuts {
        supported: true,
        program_group: group.default_name,
        group_location: group.location,
        placements,
    }
}

fn group_placement(location: GroupLocation) -> ShortcutLocation {
    match location {
        GroupLocation::Applications => ShortcutLocation::Applications,
        GroupLocation::StartMenu => ShortcutLocation::StartMenu,
    }
}

/// Platform link writer.
pub trait ShortcutCreator {
    /// Create one link; `program_group` is only meaningful for grouped placements.
    fn create(
        &mut self,
        program_group: &str,
        placement: &ShortcutPlacement,
    ) -> Result<PathBuf, String>;
}

/// Outcome of [`create_all`].
#[derive(Debug, Default)]
pub struct CreationSummary {
    pub created: Vec<PathBuf>,
    pub failures: Vec<ShortcutError>,
}

/// Create every placement, collecting failures instead of stopping.
pub fn create_all(
    resolved: &ResolvedShortcuts,
    creator: &mut dyn ShortcutCreator,
) -> Result<CreationSummary, ShortcutError> {
    if !resolved.supported {
        log::warn!(
            "Shortcut creation not supported, {} placement(s) skipped",
            resolved.placements.len()
        );
        return Err(ShortcutError::NotSupported);
    }

    let mut summary = CreationSummary::default();
    for placement in &resolved.placements {
        match creator.create(&resolved.program_group, placement) {
            Ok(path) => {
                log::info!("Created shortcut {}", path.display());
                summary.created.push(path);
            }
            Err(reason) => {
                log::error!(
                    "Shortcut '{}' at {} failed: {}",
                    placement.name,
                    placement.location,
                    reason
                );
                summary.failures.push(ShortcutError::Create {
                    name: placement.name.clone(),
                    location: placement.location,
                    reason,
                });
            }
        }
    }
    Ok(summary)
}
