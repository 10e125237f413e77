//! Job execution engine
//!
//! Runs an ordered job list on a dedicated worker thread, streaming output
//! and progress to a [`ProgressHandler`] and stopping at each failure for a
//! continue / abort / reconfigure decision.
//!
//! # State Flow
//!
//! ```text
//! Idle
//!   ↓ run
//! Running(i/N) ──failure──→ AwaitingDecision
//!   ↑                         │ continue → Running(i/N)
//!   └─────────────────────────┤ reconfigure → Idle
//!                             │ abort → Failed
//! Finished(success)
//! ```
//!
//! Only one run may be active per engine; a second `run` while one is in
//! progress is refused, not queued.

use std::io::{BufRead, BufReader, Read};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use super::handler::ProgressHandler;
use super::job::{Invocation, Job};
use super::launcher::{ProcessLauncher, SystemLauncher};
use super::result::ExecutionResult;
use crate::process_guard::{TrackedChild, kill_process_group};
use crate::types::JobAction;

/// How often the output loop checks for cancellation and process exit
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// How long output is still collected after the job process has exited
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Errors starting or joining a run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a job sequence is already running")]
    AlreadyRunning,

    #[error("failed to start job worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("job worker panicked")]
    WorkerPanicked,
}

/// Engine state, observable from any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running { job: usize, total: usize },
    AwaitingDecision { job: usize, total: usize },
    Finished { success: bool },
    Failed,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every job ran; failures, if any, were continued past
    Finished { success: bool },
    /// A failure was answered with abort
    Failed,
    /// A failure was answered with reconfigure; rerun from the first job
    Reconfigure,
    /// Stopped through the cancellation token
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Finished { success: true })
    }
}

/// Cooperative cancellation flag shared with the worker.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct EngineInner {
    launcher: Arc<dyn ProcessLauncher>,
    running: AtomicBool,
    state: Mutex<EngineState>,
    cancel: CancellationToken,
}

impl EngineInner {
    fn set_state(&self, next: EngineState) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != next {
            log::debug!("Engine state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard(Arc<EngineInner>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// Handle to a run executing on the worker thread.
pub struct WorkerHandle<H> {
    thread: JoinHandle<(RunOutcome, H)>,
    cancel: CancellationToken,
}

impl<H> WorkerHandle<H> {
    /// Wait for the run and get the handler back.
    pub fn join(self) -> Result<(RunOutcome, H), EngineError> {
        self.thread.join().map_err(|_| EngineError::WorkerPanicked)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Sequential job runner.
#[derive(Clone)]
pub struct ProcessEngine {
    inner: Arc<EngineInner>,
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEngine")
            .field("state", &self.state())
            .field("running", &self.is_running())
            .finish()
    }
}

enum LaunchOutcome {
    Completed(ExecutionResult),
    Cancelled,
}

impl ProcessEngine {
    /// Engine launching real processes
    pub fn new() -> Self {
        Self::with_launcher(Arc::new(SystemLauncher))
    }

    pub fn with_launcher(launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                launcher,
                running: AtomicBool::new(false),
                state: Mutex::new(EngineState::Idle),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Token that stops the current run at the next check
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    fn begin(&self) -> Result<RunGuard, EngineError> {
        self.inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| {
                log::warn!("Job sequence already running, request ignored");
                EngineError::AlreadyRunning
            })?;
        self.inner.cancel.reset();
        Ok(RunGuard(Arc::clone(&self.inner)))
    }

    /// Run `jobs` on a new worker thread.
    pub fn run<H>(&self, jobs: Vec<Job>, handler: H) -> Result<WorkerHandle<H>, EngineError>
    where
        H: ProgressHandler + Send + 'static,
    {
        let guard = self.begin()?;
        let inner = Arc::clone(&self.inner);
        let thread = thread::Builder::new()
            .name("job-worker".to_string())
            .spawn(move || {
                let _guard = guard;
                let mut handler = handler;
                let outcome = execute(&inner, &jobs, &mut handler);
                (outcome, handler)
            })
            .map_err(EngineError::Spawn)?;

        Ok(WorkerHandle {
            thread,
            cancel: self.cancellation_token(),
        })
    }

    /// Run `jobs` on the calling thread.
    pub fn run_blocking<H>(&self, jobs: &[Job], handler: &mut H) -> Result<RunOutcome, EngineError>
    where
        H: ProgressHandler + ?Sized,
    {
        let _guard = self.begin()?;
        Ok(execute(&self.inner, jobs, handler))
    }
}

fn execute<H>(inner: &EngineInner, jobs: &[Job], handler: &mut H) -> RunOutcome
where
    H: ProgressHandler + ?Sized,
{
    let total = jobs.len();
    log::info!("Starting {} job(s)", total);
    handler.on_start(total);

    for (idx, job) in jobs.iter().enumerate() {
        let ordinal = idx + 1;
        if inner.cancel.is_cancelled() {
            return cancelled(inner, handler);
        }

        inner.set_state(EngineState::Running { job: ordinal, total });
        let max_steps = job.inputs.len();
        log::info!("Job {}/{}: {}", ordinal, total, job.name);
        handler.on_job_begin(&job.name, ordinal, max_steps);

        let mut progress = Progress::default();
        for invocation in job.invocations() {
            if job.is_batched() {
                progress.report(handler, invocation.files_before, &invocation);
            }

            let mut result = match launch(inner, job, &invocation, handler) {
                LaunchOutcome::Completed(result) => result,
                LaunchOutcome::Cancelled => return cancelled(inner, handler),
            };

            if job.is_batched() {
                progress.report(handler, invocation.files_after, &invocation);
            }
            if result.succeeded() {
                continue;
            }

            log::warn!("{}", result.message);
            inner.set_state(EngineState::AwaitingDecision { job: ordinal, total });
            handler.on_job_failed(&mut result);
            let action = decide(&result);
            log::info!("Failure of job '{}' answered with {}", job.name, action);

            match action {
                JobAction::Continue => {
                    inner.set_state(EngineState::Running { job: ordinal, total })
                }
                JobAction::Abort => {
                    inner.set_state(EngineState::Failed);
                    handler.on_finish(false);
                    return RunOutcome::Failed;
                }
                JobAction::Reconfigure => {
                    inner.set_state(EngineState::Idle);
                    handler.on_reconfigure();
                    return RunOutcome::Reconfigure;
                }
            }
        }

        handler.on_job_end(ordinal);
    }

    inner.set_state(EngineState::Finished { success: true });
    log::info!("All {} job(s) finished", total);
    handler.on_finish(true);
    RunOutcome::Finished { success: true }
}

fn cancelled<H: ProgressHandler + ?Sized>(inner: &EngineInner, handler: &mut H) -> RunOutcome {
    log::info!("Job sequence cancelled");
    inner.set_state(EngineState::Failed);
    handler.on_finish(false);
    RunOutcome::Cancelled
}

/// The decision, with unset or ineligible answers turned into abort.
fn decide(result: &ExecutionResult) -> JobAction {
    match result.action() {
        None => {
            log::warn!("No decision for failed job '{}', aborting", result.job_name);
            JobAction::Abort
        }
        Some(JobAction::Reconfigure) if !result.reconfigurable => {
            log::warn!("Job '{}' cannot be reconfigured, aborting", result.job_name);
            JobAction::Abort
        }
        Some(action) => action,
    }
}

/// Per-job step counter that never goes backwards.
#[derive(Default)]
struct Progress {
    step: Option<usize>,
}

impl Progress {
    fn report<H: ProgressHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        step: usize,
        invocation: &Invocation,
    ) {
        if self.step.is_some_and(|current| step < current) {
            return;
        }
        self.step = Some(step);
        let batch = invocation.files_after - invocation.files_before;
        let files = invocation.argv.len().saturating_sub(batch);
        let label = invocation.argv[files..].join(" ");
        handler.on_progress(step, &label);
    }
}

struct OutputLine {
    text: String,
    is_stderr: bool,
}

fn launch<H>(
    inner: &EngineInner,
    job: &Job,
    invocation: &Invocation,
    handler: &mut H,
) -> LaunchOutcome
where
    H: ProgressHandler + ?Sized,
{
    let mut result = ExecutionResult::new(&job.name, invocation.argv.clone(), job.reconfigurable);

    let mut child = match inner.launcher.spawn(invocation) {
        Ok(child) => child,
        Err(e) => {
            result.message = format!("failed to launch job '{}': {}", job.name, e);
            return LaunchOutcome::Completed(result);
        }
    };
    let tracked = TrackedChild::new(child.id());

    let (tx, rx) = mpsc::channel();
    let readers: Vec<JoinHandle<()>> = [
        child.stdout.take().map(|out| spawn_reader(out, false, tx.clone())),
        child.stderr.take().map(|err| spawn_reader(err, true, tx.clone())),
    ]
    .into_iter()
    .flatten()
    .collect();
    drop(tx);

    // A background process started by the job may keep the pipes open long
    // after the job itself exits, so the loop ends on exit plus a grace
    // period rather than on end of output.
    let mut was_cancelled = false;
    let mut drained = false;
    let mut status = None;
    let mut exited_at: Option<Instant> = None;
    let mut last_poll = Instant::now();
    loop {
        match rx.recv_timeout(CANCEL_POLL) {
            Ok(line) => {
                let buffer = if line.is_stderr { &mut result.stderr } else { &mut result.stdout };
                buffer.push_str(&line.text);
                buffer.push('\n');
                log::debug!("[{}] {}", job.name, line.text);
                handler.on_output_line(&line.text, line.is_stderr);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                drained = true;
                break;
            }
        }

        if last_poll.elapsed() < CANCEL_POLL {
            continue;
        }
        last_poll = Instant::now();

        if !was_cancelled && inner.cancel.is_cancelled() {
            log::info!("Cancelling job '{}'", job.name);
            terminate(&mut child, tracked.pid());
            was_cancelled = true;
        }
        if status.is_none() {
            match child.try_wait() {
                Ok(Some(exit)) => status = Some(Ok(exit)),
                Ok(None) => {}
                Err(e) => status = Some(Err(e)),
            }
            if status.is_some() {
                exited_at = Some(Instant::now());
            }
        }
        if exited_at.is_some_and(|at| at.elapsed() >= OUTPUT_GRACE) {
            log::warn!(
                "Job '{}' exited but its output is still open; leaving it to a background process",
                job.name
            );
            break;
        }
    }
    if drained {
        for reader in readers {
            let _ = reader.join();
        }
    }
    // Otherwise the readers stay detached and stop at their next line or at EOF

    let status = match status {
        Some(status) => status,
        None => child.wait(),
    };
    match status {
        Ok(status) => {
            result.exit_code = status.code();
            result.message = match status.code() {
                Some(0) => String::new(),
                Some(code) => format!("job '{}' exited with code {}", job.name, code),
                None => format!("job '{}' was terminated by a signal", job.name),
            };
        }
        Err(e) => result.message = format!("failed to wait for job '{}': {}", job.name, e),
    }
    drop(tracked);

    if was_cancelled {
        LaunchOutcome::Cancelled
    } else {
        LaunchOutcome::Completed(result)
    }
}

fn terminate(child: &mut Child, pid: u32) {
    kill_process_group(pid);
    if let Err(e) = child.kill() {
        log::debug!("Kill of process {} failed: {}", pid, e);
    }
}

/// Forward lines of `stream` until EOF. Invalid UTF-8 is replaced.
fn spawn_reader<R>(stream: R, is_stderr: bool, tx: Sender<OutputLine>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    while matches!(buf.last(), Some(b'\n' | b'\r')) {
                        buf.pop();
                    }
                    let text = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(OutputLine { text, is_stderr }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::debug!("Output stream closed: {}", e);
                    break;
                }
            }
        }
    })
}
