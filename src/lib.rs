//! wizard-panels library
//!
//! Core of an installer's panel layer: the pack selection model with its
//! flat and tree projections, validation and automation snapshots, the
//! external process engine with continue/abort/reconfigure recovery, and
//! shortcut-spec resolution.

pub mod automation;
pub mod cli;
pub mod config_file;
pub mod console;
pub mod error;
pub mod install_data;
pub mod pack;
pub mod process;
pub mod process_guard;
pub mod selection;
pub mod shortcut;
pub mod substitute;
pub mod types;

// Re-export main types for convenience
pub use automation::{
    AutomatedHandler, AutomationError, read_snapshot_xml, replay_file, write_snapshot_xml,
};
pub use config_file::InstallDescriptor;
pub use error::{InstallerError, Result};
pub use install_data::{InstallContext, InstallData};
pub use pack::{Pack, format_bytes};
pub use process::{
    ChannelHandler, EngineError, EngineState, ExecutionResult, Job, ProcessEngine, ProgressEvent,
    ProgressHandler, RunOutcome, resolve_jobs,
};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ShutdownGuard};
pub use selection::flat::PacksTableModel;
pub use selection::tree::{CheckBoxNode, PackTree};
pub use selection::{
    PackSnapshotEntry, PackValidator, SelectionDelta, SelectionState, ValidationOutcome,
    ValidatorRegistry,
};
pub use shortcut::{ResolvedShortcuts, ShortcutCreator, ShortcutSpec, resolve as resolve_shortcuts};
pub use substitute::VariableSubstitutor;
pub use types::{
    DeselectPolicy, GroupLocation, InitialState, JobAction, PackCellState, ShortcutLocation,
};
