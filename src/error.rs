//! Error handling module for the wizard panels
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Module-specific failures (the process engine, automation XML) have their
//! own enums and convert into `InstallerError` at the crate boundary.
//! Descriptor loading reports through `anyhow` with file context instead.

use thiserror::Error;

use crate::automation::AutomationError;
use crate::process::EngineError;

/// Main error type for the wizard panels
#[derive(Error, Debug)]
pub enum InstallerError {
    /// IO errors (descriptor files, terminal, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Pack selection errors surfaced to the caller
    #[error("Selection error: {0}")]
    Selection(String),

    /// Validation vetoes and insufficient space
    #[error("Validation error: {0}")]
    Validation(String),

    /// Process engine errors
    #[error("Process error: {0}")]
    Process(#[from] EngineError),

    /// Automation snapshot errors
    #[error("Automation error: {0}")]
    Automation(#[from] AutomationError),
}

/// Result type alias for wizard panel operations
pub type Result<T> = std::result::Result<T, InstallerError>;

impl InstallerError {
    /// Create a selection error
    pub fn selection(msg: impl Into<String>) -> Self {
        Self::Selection(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
