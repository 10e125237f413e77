//! Install context
//!
//! The selection model and the job engine only need a narrow view of the
//! installation: variable bindings, how much space is free at the target,
//! and whether a pack may be installed under the current conditions.
//! `InstallContext` is that view; `InstallData` is the implementation built
//! from the install descriptor.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::pack::Pack;

/// Read-only view of the installation used by selection and validation.
pub trait InstallContext {
    /// Value of an install variable
    fn variable(&self, name: &str) -> Option<String>;

    /// Free bytes at the install target, or `None` if it cannot be determined
    fn free_bytes(&self) -> Option<u64> {
        None
    }

    /// Condition gate: may `pack` be installed right now?
    fn can_install(&self, _pack: &Pack) -> bool {
        true
    }
}

/// Install-time state shared by the panels.
#[derive(Debug, Clone, Default)]
pub struct InstallData {
    /// Variable bindings used for substitution in jobs and shortcuts
    pub variables: BTreeMap<String, String>,

    /// Installation target directory
    pub install_path: Option<PathBuf>,

    /// Packs whose install conditions currently evaluate to false
    pub unavailable_packs: BTreeSet<String>,

    /// Overrides the filesystem query (tests, unsupported platforms)
    pub free_bytes_override: Option<u64>,
}

impl InstallData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_install_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.install_path = Some(path.into());
        self
    }

    pub fn with_free_bytes(mut self, bytes: u64) -> Self {
        self.free_bytes_override = Some(bytes);
        self
    }

    /// Mark a pack (by id or name) as not installable under current conditions
    pub fn with_unavailable_pack(mut self, reference: impl Into<String>) -> Self {
        self.unavailable_packs.insert(reference.into());
        self
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }
}

impl InstallContext for InstallData {
    fn variable(&self, name: &str) -> Option<String> {
        self.variables.get(name).cloned()
    }

    fn free_bytes(&self) -> Option<u64> {
        if let Some(bytes) = self.free_bytes_override {
            return Some(bytes);
        }
        let path = self.install_path.as_deref()?;
        free_space(path)
    }

    fn can_install(&self, pack: &Pack) -> bool {
        !self.unavailable_packs.contains(pack.key())
            && !self.unavailable_packs.contains(&pack.name)
    }
}

/// Walk up from `path` to the first ancestor that exists.
///
/// The install directory usually does not exist yet when the packs panel
/// asks for free space.
pub fn existing_parent(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| !p.as_os_str().is_empty() && p.exists())
}

/// Free bytes available to unprivileged users on the filesystem holding `path`.
pub fn free_space(path: &Path) -> Option<u64> {
    let existing = existing_parent(path)?;
    match nix::sys::statvfs::statvfs(existing) {
        Ok(stat) => {
            let blocks = stat.blocks_available() as u64;
            let size = stat.fragment_size() as u64;
            Some(blocks.saturating_mul(size))
        }
        Err(e) => {
            log::warn!("Free space of {:?} is not ascertainable: {}", existing, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variables_lookup() {
        let data = InstallData::new().with_variable("INSTALL_PATH", "/opt/app");
        assert_eq!(data.variable("INSTALL_PATH").as_deref(), Some("/opt/app"));
        assert_eq!(data.variable("MISSING"), None);
    }

    #[test]
    fn test_unavailable_pack_matches_key_or_name() {
        let data = InstallData::new().with_unavailable_pack("docs");
        assert!(!data.can_install(&Pack::new("Documentation", 1).with_id("docs")));
        assert!(!data.can_install(&Pack::new("docs", 1)));
        assert!(data.can_install(&Pack::new("Core", 1)));
    }

    #[test]
    fn test_free_bytes_override_wins() {
        let data = InstallData::new()
            .with_install_path("/definitely/not/here")
            .with_free_bytes(42);
        assert_eq!(data.free_bytes(), Some(42));
    }

    #[test]
    fn test_free_bytes_unknown_without_path() {
        assert_eq!(InstallData::new().free_bytes(), None);
    }

    #[test]
    fn test_existing_parent_of_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("a").join("b");
        assert_eq!(existing_parent(&missing), Some(dir.path()));
        assert!(free_space(&missing).is_some());
    }
}
