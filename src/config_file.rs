//! Install descriptor handling for saving and loading installs.
//!
//! The descriptor is the JSON document a front end is started with: the
//! available packs, the initial selection, install variables, the job list
//! and the shortcut spec. Enum-valued settings use the type-safe enums from
//! [`crate::types`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::install_data::InstallData;
use crate::pack::Pack;
use crate::process::Job;
use crate::selection::SelectionState;
use crate::shortcut::ShortcutSpec;
use crate::types::DeselectPolicy;

/// Variable that always holds the install path, when one is configured
pub const INSTALL_PATH_VARIABLE: &str = "INSTALL_PATH";

/// Install descriptor that can be saved/loaded
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallDescriptor {
    /// Available packs, in display order
    pub packs: Vec<Pack>,

    /// Pack references selected at start (in addition to required packs)
    pub selected: Vec<String>,

    /// What deselecting a pack does to the packs depending on it
    pub deselect_policy: DeselectPolicy,

    pub variables: BTreeMap<String, String>,

    pub install_path: Option<PathBuf>,

    /// Packs whose install conditions are currently false
    pub unavailable_packs: Vec<String>,

    /// Jobs of the process panel, in execution order
    pub jobs: Vec<Job>,

    pub shortcuts: ShortcutSpec,
}

impl InstallDescriptor {
    /// Create a new empty descriptor
    #[allow(dead_code)] // API: Constructor for external consumers
    pub fn new() -> Self {
        Self::default()
    }

    /// Save descriptor to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize descriptor to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write descriptor to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load descriptor from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read descriptor from {:?}", path.as_ref()))?;

        let descriptor: Self =
            serde_json::from_str(&content).context("Failed to parse descriptor JSON")?;

        Ok(descriptor)
    }

    /// Validate the descriptor structure.
    ///
    /// Broken references (unknown dependency, parent or selected pack) are
    /// not errors here; the selection model logs and ignores them.
    pub fn validate(&self) -> Result<()> {
        if self.packs.is_empty() {
            anyhow::bail!("At least one pack must be defined");
        }

        let mut keys = HashSet::new();
        for (idx, pack) in self.packs.iter().enumerate() {
            if pack.name.trim().is_empty() {
                anyhow::bail!("Pack #{} has an empty name", idx);
            }
            if !keys.insert(pack.key()) {
                anyhow::bail!("Duplicate pack '{}'", pack.key());
            }
        }

        let mut job_names = HashSet::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                anyhow::bail!("Job names cannot be empty");
            }
            if !job_names.insert(job.name.as_str()) {
                anyhow::bail!("Duplicate job '{}'", job.name);
            }
            if job.command_line.is_empty() || job.command_line[0].trim().is_empty() {
                anyhow::bail!("Job '{}' has no command", job.name);
            }
            if job.max_command_line == 0 {
                anyhow::bail!("Job '{}' must have a positive max_command_line", job.name);
            }
        }

        for reference in &self.selected {
            if !self.packs.iter().any(|p| p.matches(reference)) {
                log::warn!("Selected pack '{}' is not defined", reference);
            }
        }

        Ok(())
    }

    /// Initial selection state for this descriptor
    pub fn to_selection_state(&self) -> SelectionState {
        SelectionState::with_policy(self.packs.clone(), &self.selected, self.deselect_policy)
    }

    /// Install context for this descriptor
    pub fn to_install_data(&self) -> InstallData {
        let mut data = InstallData {
            variables: self.variables.clone(),
            install_path: self.install_path.clone(),
            unavailable_packs: self.unavailable_packs.iter().cloned().collect::<BTreeSet<String>>(),
            free_bytes_override: None,
        };
        if let Some(path) = &self.install_path {
            if !data.variables.contains_key(INSTALL_PATH_VARIABLE) {
                data.set_variable(INSTALL_PATH_VARIABLE, path.to_string_lossy());
            }
        }
        data
    }
}
