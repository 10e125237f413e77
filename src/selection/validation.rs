//! Validation hook run when the user leaves the packs panel
//!
//! Validators are looked up by identifier in a [`ValidatorRegistry`] of
//! factories registered at startup. A missing identifier or a failing
//! validator never blocks the user; only an explicit `Ok(false)` does.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use super::SelectionState;
use crate::error::InstallerError;
use crate::install_data::InstallContext;
use crate::pack::format_bytes;

/// Errors raised while resolving or running a validator.
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("no validator registered as '{0}'")]
    NotRegistered(String),

    #[error("validator failed: {0}")]
    Failed(String),
}

impl ValidatorError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Pluggable pack validator.
pub trait PackValidator {
    /// Return `Ok(false)` to veto leaving the panel.
    fn validate(
        &self,
        ctx: &dyn InstallContext,
        pack_id: &str,
        is_selected: bool,
    ) -> Result<bool, ValidatorError>;
}

impl<F> PackValidator for F
where
    F: Fn(&dyn InstallContext, &str, bool) -> Result<bool, ValidatorError>,
{
    fn validate(
        &self,
        ctx: &dyn InstallContext,
        pack_id: &str,
        is_selected: bool,
    ) -> Result<bool, ValidatorError> {
        self(ctx, pack_id, is_selected)
    }
}

type ValidatorFactory = Box<dyn Fn() -> Box<dyn PackValidator> + Send + Sync>;

/// Identifier to validator factory mapping.
#[derive(Default)]
pub struct ValidatorRegistry {
    factories: BTreeMap<String, ValidatorFactory>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; a later registration under the same name replaces it.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn PackValidator> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Box::new(factory)).is_some() {
            log::debug!("Validator '{}' re-registered", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate the validator registered as `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn PackValidator>, ValidatorError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ValidatorError::NotRegistered(name.to_string()))
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("validators", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Result of validating the current selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    InsufficientSpace { required: u64, available: u64 },
    UnmetDependency { pack: String, dependency: String },
    Vetoed { pack: String, validator: String },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// `Ok` when valid, otherwise a validation error carrying the message.
    pub fn into_result(self) -> crate::error::Result<()> {
        match self {
            Self::Valid => Ok(()),
            other => Err(InstallerError::validation(other.to_string())),
        }
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "selection is valid"),
            Self::InsufficientSpace { required, available } => write!(
                f,
                "not enough disk space: {} required, {} available",
                format_bytes(*required),
                format_bytes(*available)
            ),
            Self::UnmetDependency { pack, dependency } => {
                write!(f, "pack '{}' requires '{}', which is not selected", pack, dependency)
            }
            Self::Vetoed { pack, validator } => {
                write!(f, "validator '{}' rejected pack '{}'", validator, pack)
            }
        }
    }
}

impl SelectionState {
    /// Check the selection before leaving the packs panel.
    ///
    /// Order: free space, unmet dependencies, then every pack's validators in
    /// pack order. Each validator sees the pack key and whether it is selected.
    pub fn validate(
        &self,
        ctx: &dyn InstallContext,
        registry: &ValidatorRegistry,
    ) -> ValidationOutcome {
        let required = self.selected_bytes();
        if let Some(available) = ctx.free_bytes() {
            if required > available {
                log::warn!(
                    "Insufficient space: {} required, {} available",
                    format_bytes(required),
                    format_bytes(available)
                );
                return ValidationOutcome::InsufficientSpace { required, available };
            }
        }

        if let Some(unmet) = self.unmet_dependencies().first() {
            let pack = self.packs[unmet.pack].key().to_string();
            let dependency = self.packs[unmet.dependency].key().to_string();
            log::warn!("Pack '{}' is missing dependency '{}'", pack, dependency);
            return ValidationOutcome::UnmetDependency { pack, dependency };
        }

        for (idx, pack) in self.packs.iter().enumerate() {
            let selected = self.is_selected(idx);
            for name in &pack.validators {
                let validator = match registry.create(name) {
                    Ok(validator) => validator,
                    Err(e) => {
                        log::warn!("Skipping validator for pack '{}': {}", pack.key(), e);
                        continue;
                    }
                };
                match validator.validate(ctx, pack.key(), selected) {
                    Ok(true) => log::debug!("Validator '{}' accepted pack '{}'", name, pack.key()),
                    Ok(false) => {
                        log::info!("Validator '{}' rejected pack '{}'", name, pack.key());
                        return ValidationOutcome::Vetoed {
                            pack: pack.key().to_string(),
                            validator: name.clone(),
                        };
                    }
                    Err(e) => {
                        log::warn!(
                            "Validator '{}' on pack '{}' failed, continuing: {}",
                            name,
                            pack.key(),
                            e
                        );
                    }
                }
            }
        }

        ValidationOutcome::Valid
    }
}
