//! Progress callbacks of the job engine
//!
//! The engine's worker thread owns the handler and calls it in a fixed
//! order: `on_start`, then per job `on_job_begin`, output lines and
//! progress steps, `on_job_failed` for each failed launch, `on_job_end`,
//! and finally exactly one `on_finish` (or `on_reconfigure` when the user
//! asks to change settings).

use std::sync::mpsc::{self, Receiver, Sender};

use super::result::ExecutionResult;
use crate::types::JobAction;

/// Receiver of engine events.
pub trait ProgressHandler {
    fn on_start(&mut self, total_jobs: usize);

    /// `ordinal` is 1-based; `max_steps` is the number of input files of a
    /// batched job and 0 otherwise.
    fn on_job_begin(&mut self, name: &str, ordinal: usize, max_steps: usize);

    /// One line of child output, in arrival order.
    fn on_output_line(&mut self, line: &str, is_stderr: bool);

    /// Files done within the current batched job. Never decreases within a job.
    fn on_progress(&mut self, _step: usize, _message: &str) {}

    /// Decision point. Must call [`ExecutionResult::set_action`]; leaving
    /// it unset aborts the run.
    fn on_job_failed(&mut self, result: &mut ExecutionResult);

    fn on_job_end(&mut self, _ordinal: usize) {}

    /// The run stopped so settings can be changed; it will restart from the first job.
    fn on_reconfigure(&mut self) {}

    fn on_finish(&mut self, success: bool);
}

impl<H: ProgressHandler + ?Sized> ProgressHandler for &mut H {
    fn on_start(&mut self, total_jobs: usize) {
        (**self).on_start(total_jobs)
    }

    fn on_job_begin(&mut self, name: &str, ordinal: usize, max_steps: usize) {
        (**self).on_job_begin(name, ordinal, max_steps)
    }

    fn on_output_line(&mut self, line: &str, is_stderr: bool) {
        (**self).on_output_line(line, is_stderr)
    }

    fn on_progress(&mut self, step: usize, message: &str) {
        (**self).on_progress(step, message)
    }

    fn on_job_failed(&mut self, result: &mut ExecutionResult) {
        (**self).on_job_failed(result)
    }

    fn on_job_end(&mut self, ordinal: usize) {
        (**self).on_job_end(ordinal)
    }

    fn on_reconfigure(&mut self) {
        (**self).on_reconfigure()
    }

    fn on_finish(&mut self, success: bool) {
        (**self).on_finish(success)
    }
}

impl<H: ProgressHandler + ?Sized> ProgressHandler for Box<H> {
    fn on_start(&mut self, total_jobs: usize) {
        (**self).on_start(total_jobs)
    }

    fn on_job_begin(&mut self, name: &str, ordinal: usize, max_steps: usize) {
        (**self).on_job_begin(name, ordinal, max_steps)
    }

    fn on_output_line(&mut self, line: &str, is_stderr: bool) {
        (**self).on_output_line(line, is_stderr)
    }

    fn on_progress(&mut self, step: usize, message: &str) {
        (**self).on_progress(step, message)
    }

    fn on_job_failed(&mut self, result: &mut ExecutionResult) {
        (**self).on_job_failed(result)
    }

    fn on_job_end(&mut self, ordinal: usize) {
        (**self).on_job_end(ordinal)
    }

    fn on_reconfigure(&mut self) {
        (**self).on_reconfigure()
    }

    fn on_finish(&mut self, success: bool) {
        (**self).on_finish(success)
    }
}

/// Engine event forwarded by [`ChannelHandler`].
#[derive(Debug)]
pub enum ProgressEvent {
    Start { total: usize },
    JobBegin { name: String, ordinal: usize, max_steps: usize },
    Output { line: String, is_stderr: bool },
    Progress { step: usize, message: String },
    /// The worker blocks until a decision is sent on `reply`
    JobFailed { result: ExecutionResult, reply: Sender<JobAction> },
    JobEnd { ordinal: usize },
    Reconfigure,
    Finish { success: bool },
}

/// Forwards events to a control thread over a channel.
///
/// At a decision point the worker waits on a one-shot reply channel; a
/// dropped reply sender leaves the action unset, which aborts the run.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: Sender<ProgressEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("Progress receiver dropped, event discarded");
        }
    }
}

impl ProgressHandler for ChannelHandler {
    fn on_start(&mut self, total_jobs: usize) {
        self.send(ProgressEvent::Start { total: total_jobs });
    }

    fn on_job_begin(&mut self, name: &str, ordinal: usize, max_steps: usize) {
        self.send(ProgressEvent::JobBegin {
            name: name.to_string(),
            ordinal,
            max_steps,
        });
    }

    fn on_output_line(&mut self, line: &str, is_stderr: bool) {
        self.send(ProgressEvent::Output {
            line: line.to_string(),
            is_stderr,
        });
    }

    fn on_progress(&mut self, step: usize, message: &str) {
        self.send(ProgressEvent::Progress {
            step,
            message: message.to_string(),
        });
    }

    fn on_job_failed(&mut self, result: &mut ExecutionResult) {
        let (reply, decision) = mpsc::channel();
        self.send(ProgressEvent::JobFailed {
            result: result.clone(),
            reply,
        });
        match decision.recv() {
            Ok(action) => result.set_action(action),
            Err(_) => log::warn!("No decision received for failed job '{}'", result.job_name),
        }
    }

    fn on_job_end(&mut self, ordinal: usize) {
        self.send(ProgressEvent::JobEnd { ordinal });
    }

    fn on_reconfigure(&mut self) {
        self.send(ProgressEvent::Reconfigure);
    }

    fn on_finish(&mut self, success: bool) {
        self.send(ProgressEvent::Finish { success });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_channel_handler_round_trips_decision() {
        let (mut handler, events) = ChannelHandler::new();
        let control = thread::spawn(move || {
            for event in events {
                if let ProgressEvent::JobFailed { result, reply } = event {
                    assert_eq!(result.job_name, "build");
                    reply.send(JobAction::Continue).unwrap();
                }
            }
        });

        let mut result = ExecutionResult::new("build", vec!["false".into()], false);
        handler.on_job_failed(&mut result);
        assert_eq!(result.action(), Some(JobAction::Continue));

        drop(handler);
        control.join().unwrap();
    }

    #[test]
    fn test_channel_handler_without_receiver_leaves_action_unset() {
        let (mut handler, events) = ChannelHandler::new();
        drop(events);
        let mut result = ExecutionResult::new("build", vec!["false".into()], false);
        handler.on_job_failed(&mut result);
        assert_eq!(result.action(), None);
    }
}
