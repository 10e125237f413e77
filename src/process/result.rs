//! Outcome of one process launch

use serde::{Deserialize, Serialize};

use crate::types::JobAction;

/// Everything needed to reconstruct a failed launch, plus the recovery
/// decision. Output is kept in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub job_name: String,
    /// `None` when the process could not be launched or died from a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub command_line: Vec<String>,
    pub message: String,
    /// Whether `Reconfigure` is an acceptable decision
    pub reconfigurable: bool,
    action: Option<JobAction>,
}

/// Serializable failure summary for display and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub command_line: String,
    pub stdout: String,
    pub stderr: String,
    pub message: String,
}

impl ExecutionResult {
    pub fn new(
        job_name: impl Into<String>,
        command_line: Vec<String>,
        reconfigurable: bool,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            command_line,
            message: String::new(),
            reconfigurable,
            action: None,
        }
    }

    /// Exited with status 0
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Record the recovery decision.
    pub fn set_action(&mut self, action: JobAction) {
        self.action = Some(action);
    }

    pub fn action(&self) -> Option<JobAction> {
        self.action
    }

    /// Command line joined with spaces
    pub fn command_line_string(&self) -> String {
        self.command_line.join(" ")
    }

    pub fn failure_report(&self) -> FailureReport {
        FailureReport {
            command_line: self.command_line_string(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            message: self.message.clone(),
        }
    }
}
