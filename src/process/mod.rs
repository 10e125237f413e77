//! External process execution
//!
//! Jobs are resolved against the install (OS filter, pack filter, variable
//! substitution), split into invocations, and run one after another by the
//! [`ProcessEngine`] on a worker thread.

pub mod engine;
pub mod handler;
pub mod job;
pub mod launcher;
pub mod result;

pub use engine::{
    CancellationToken, EngineError, EngineState, ProcessEngine, RunOutcome, WorkerHandle,
};
pub use handler::{ChannelHandler, ProgressEvent, ProgressHandler};
pub use job::{DEFAULT_MAX_COMMAND_LINE, Invocation, Job, resolve_jobs};
pub use launcher::{ProcessLauncher, SystemLauncher};
pub use result::{ExecutionResult, FailureReport};
