//! Pack descriptors
//!
//! A pack is one installable unit: a named, sized, optionally required
//! bundle of content. Packs are read once from the install descriptor and
//! never mutated afterwards; which packs are selected lives in
//! [`SelectionState`](crate::selection::SelectionState).

use serde::{Deserialize, Serialize};

/// Descriptor of an installable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pack {
    /// Stable identifier; may be absent on legacy descriptors
    #[serde(default)]
    pub id: Option<String>,

    /// Display name, also the legacy lookup key
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Required packs are always installed and cannot be deselected
    #[serde(default)]
    pub required: bool,

    /// Installed size in bytes
    #[serde(default)]
    pub nbytes: u64,

    /// References (id or name) of packs this pack needs
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Packs sharing a group are mutually exclusive
    #[serde(default)]
    pub exclude_group: Option<String>,

    /// Reference of the containing pack (tree layout only)
    #[serde(default)]
    pub parent: Option<String>,

    /// Identifiers of registered validators run on "next"
    #[serde(default)]
    pub validators: Vec<String>,
}

impl Pack {
    /// Create an optional, dependency-free pack
    pub fn new(name: impl Into<String>, nbytes: u64) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            required: false,
            nbytes,
            dependencies: Vec::new(),
            exclude_group: None,
            parent: None,
            validators: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn depends_on(mut self, reference: impl Into<String>) -> Self {
        self.dependencies.push(reference.into());
        self
    }

    pub fn in_exclude_group(mut self, group: impl Into<String>) -> Self {
        self.exclude_group = Some(group.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_validator(mut self, validator: impl Into<String>) -> Self {
        self.validators.push(validator.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The id if present and non-empty, otherwise the name.
    pub fn key(&self) -> &str {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => &self.name,
        }
    }

    /// The id, or an empty string for legacy packs.
    pub fn id_or_empty(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    /// True if `reference` names this pack by id or by name
    pub fn matches(&self, reference: &str) -> bool {
        self.key() == reference || self.name == reference
    }

    /// Exclude group, ignoring empty tags
    pub fn group(&self) -> Option<&str> {
        self.exclude_group.as_deref().filter(|g| !g.is_empty())
    }
}

/// Render a byte count the way the packs panel shows sizes.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < MB {
        format!("{:.2} KB", b / KB)
    } else if b < GB {
        format!("{:.2} MB", b / MB)
    } else {
        format!("{:.2} GB", b / GB)
    }
}
