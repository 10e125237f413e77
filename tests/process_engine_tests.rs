//! Integration tests for the job engine
//!
//! Jobs are real `sh` commands. These tests verify that:
//! 1. Jobs run in order with 1-based ordinals and exactly one on_finish
//! 2. Continue, abort and reconfigure decisions behave as documented
//! 3. Large interleaved output on both streams does not deadlock
//! 4. Batched jobs report monotonic per-file progress
//! 5. The worker thread, channel handler and re-entry guard work together

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use wizard_panels::automation::AutomatedHandler;
use wizard_panels::process::{
    ChannelHandler, EngineError, EngineState, ExecutionResult, Job, ProcessEngine, ProgressEvent,
    ProgressHandler, RunOutcome,
};
use wizard_panels::types::JobAction;

/// Records every callback; answers failures from a queue of decisions.
#[derive(Default)]
struct Script {
    begins: Vec<(String, usize)>,
    lines: Vec<(String, bool)>,
    progress: Vec<usize>,
    failures: Vec<ExecutionResult>,
    decisions: Vec<JobAction>,
    finishes: Vec<bool>,
    reconfigures: usize,
}

impl Script {
    fn answering(decisions: &[JobAction]) -> Self {
        Self {
            decisions: decisions.iter().rev().copied().collect(),
            ..Self::default()
        }
    }
}

impl ProgressHandler for Script {
    fn on_start(&mut self, _total_jobs: usize) {}

    fn on_job_begin(&mut self, name: &str, ordinal: usize, _max_steps: usize) {
        self.begins.push((name.to_string(), ordinal));
    }

    fn on_output_line(&mut self, line: &str, is_stderr: bool) {
        self.lines.push((line.to_string(), is_stderr));
    }

    fn on_progress(&mut self, step: usize, _message: &str) {
        self.progress.push(step);
    }

    fn on_job_failed(&mut self, result: &mut ExecutionResult) {
        if let Some(action) = self.decisions.pop() {
            result.set_action(action);
        }
        self.failures.push(result.clone());
    }

    fn on_reconfigure(&mut self) {
        self.reconfigures += 1;
    }

    fn on_finish(&mut self, success: bool) {
        self.finishes.push(success);
    }
}

fn abc(failing: &str) -> Vec<Job> {
    ["A", "B", "C"]
        .iter()
        .map(|name| {
            let script = if *name == failing {
                format!("echo {} failing >&2; exit 1", name)
            } else {
                format!("echo {}", name)
            };
            Job::shell(*name, script)
        })
        .collect()
}

fn stdout_lines(script: &Script) -> Vec<&str> {
    script
        .lines
        .iter()
        .filter(|(_, is_stderr)| !is_stderr)
        .map(|(line, _)| line.as_str())
        .collect()
}

#[test]
fn test_continue_runs_every_job_in_order() {
    let engine = ProcessEngine::new();
    let mut script = Script::answering(&[JobAction::Continue]);

    let outcome = engine.run_blocking(&abc("B"), &mut script).unwrap();

    assert_eq!(outcome, RunOutcome::Finished { success: true });
    let ordinals: Vec<usize> = script.begins.iter().map(|(_, o)| *o).collect();
    assert_eq!(ordinals, vec![1, 2, 3]);
    assert_eq!(stdout_lines(&script), vec!["A", "C"]);
    assert_eq!(script.finishes, vec![true]);

    let failure = &script.failures[0];
    assert_eq!(failure.job_name, "B");
    assert_eq!(failure.exit_code, Some(1));
    assert_eq!(failure.stderr, "B failing\n");
    assert_eq!(failure.command_line_string(), "sh -c echo B failing >&2; exit 1");
}

#[test]
fn test_abort_stops_the_sequence() {
    let engine = ProcessEngine::new();
    let mut script = Script::answering(&[JobAction::Abort]);

    let outcome = engine.run_blocking(&abc("A"), &mut script).unwrap();

    assert_eq!(outcome, RunOutcome::Failed);
    assert_eq!(script.begins.len(), 1);
    assert!(stdout_lines(&script).is_empty());
    assert_eq!(script.finishes, vec![false]);
    assert_eq!(engine.state(), EngineState::Failed);
}

#[test]
fn test_reconfigure_restarts_from_first_job() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("configured");
    let jobs = vec![
        Job::shell("prepare", "echo prepare"),
        Job::shell("check", format!("test -e {}", marker.display())).reconfigurable(),
    ];
    let engine = ProcessEngine::new();
    let mut script = Script::answering(&[JobAction::Reconfigure]);

    let first = engine.run_blocking(&jobs, &mut script).unwrap();
    assert_eq!(first, RunOutcome::Reconfigure);
    assert_eq!(script.reconfigures, 1);
    assert!(script.finishes.is_empty());
    assert_eq!(engine.state(), EngineState::Idle);

    std::fs::write(&marker, "").unwrap();
    let second = engine.run_blocking(&jobs, &mut script).unwrap();
    assert!(second.is_success());
    let names: Vec<&str> = script.begins.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["prepare", "check", "prepare", "check"]);
}

#[test]
fn test_large_output_on_both_streams() {
    let engine = ProcessEngine::new();
    let mut script = Script::default();
    let job = Job::shell(
        "noisy",
        "i=0; while [ $i -lt 5000 ]; do echo out$i; echo err$i >&2; i=$((i+1)); done",
    );

    let outcome = engine.run_blocking(&[job], &mut script).unwrap();

    assert!(outcome.is_success());
    let out: Vec<&String> = script.lines.iter().filter(|(_, e)| !e).map(|(l, _)| l).collect();
    let err: Vec<&String> = script.lines.iter().filter(|(_, e)| *e).map(|(l, _)| l).collect();
    assert_eq!(out.len(), 5000);
    assert_eq!(err.len(), 5000);
    // Each stream keeps its own order
    assert_eq!(out[0], "out0");
    assert_eq!(out[4999], "out4999");
    assert_eq!(err[4999], "err4999");
}

#[test]
fn test_batched_job_progress_never_regresses() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<String> = (0..12).map(|i| format!("source_file_{:02}.c", i)).collect();
    let job = Job::new("compile", ["echo", "cc"])
        .with_inputs(files)
        .with_max_command_line(60)
        .in_directory(dir.path());
    let batches = job.invocations().len();
    assert!(batches > 1);

    let engine = ProcessEngine::new();
    let mut script = Script::default();
    assert!(engine.run_blocking(&[job], &mut script).unwrap().is_success());

    assert_eq!(stdout_lines(&script).len(), batches);
    assert!(script.progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(script.progress.first(), Some(&0));
    assert_eq!(script.progress.last(), Some(&12));
}

#[test]
fn test_failed_batch_is_a_decision_point() {
    let job = Job::new("compile", ["sh", "-c", "case \"$*\" in *bad*) exit 1;; esac", "cc"])
        .with_inputs(["good.c", "bad.c", "fine.c"])
        .with_max_command_line(1);
    let engine = ProcessEngine::new();
    let mut script = Script::answering(&[JobAction::Continue]);

    let outcome = engine.run_blocking(&[job], &mut script).unwrap();
    assert!(outcome.is_success());
    assert_eq!(script.failures.len(), 1);
    assert!(script.failures[0].command_line.contains(&"bad.c".to_string()));
    assert_eq!(script.progress.last(), Some(&3));
}

#[test]
fn test_worker_with_channel_handler() {
    let engine = ProcessEngine::new();
    let (handler, events) = ChannelHandler::new();
    let worker = engine.run(abc("B"), handler).unwrap();

    let mut seen = Vec::new();
    for event in events {
        match event {
            ProgressEvent::JobFailed { result, reply } => {
                seen.push(format!("failed {}", result.job_name));
                reply.send(JobAction::Continue).unwrap();
            }
            ProgressEvent::JobBegin { name, ordinal, .. } => {
                seen.push(format!("begin {} {}", name, ordinal))
            }
            ProgressEvent::Finish { success } => {
                seen.push(format!("finish {}", success));
                // The sender lives on inside the returned handler
                break;
            }
            _ => {}
        }
    }

    let (outcome, _handler) = worker.join().unwrap();
    assert!(outcome.is_success());
    assert_eq!(
        seen,
        vec!["begin A 1", "begin B 2", "failed B", "begin C 3", "finish true"]
    );
    assert!(!engine.is_running());
}

#[test]
fn test_second_run_is_refused_while_running() {
    let engine = ProcessEngine::new();
    let worker = engine
        .run(vec![Job::shell("slow", "sleep 1")], AutomatedHandler::default())
        .unwrap();

    let other = [Job::shell("other", "true")];
    let second = engine.run_blocking(&other, &mut AutomatedHandler::default());
    assert!(matches!(second, Err(EngineError::AlreadyRunning)));

    let (outcome, handler) = worker.join().unwrap();
    assert!(outcome.is_success());
    assert_eq!(handler.success(), Some(true));
}

#[test]
fn test_automated_handler_collects_failures() {
    let engine = ProcessEngine::new();
    let mut handler =
        AutomatedHandler::new(JobAction::Continue).with_override("C", JobAction::Abort);
    let jobs = vec![
        Job::shell("A", "exit 2"),
        Job::shell("B", "true"),
        Job::shell("C", "echo broken >&2; exit 3"),
    ];

    let outcome = engine.run_blocking(&jobs, &mut handler).unwrap();
    assert_eq!(outcome, RunOutcome::Failed);
    assert_eq!(handler.failures().len(), 2);
    assert_eq!(handler.failures()[1].stderr, "broken\n");
    assert_eq!(handler.success(), Some(false));
}

#[test]
fn test_cancel_kills_running_job() {
    let engine = ProcessEngine::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    struct Cancelled(Arc<Mutex<Vec<bool>>>);
    impl ProgressHandler for Cancelled {
        fn on_start(&mut self, _total_jobs: usize) {}
        fn on_job_begin(&mut self, _name: &str, _ordinal: usize, _max_steps: usize) {}
        fn on_output_line(&mut self, _line: &str, _is_stderr: bool) {}
        fn on_job_failed(&mut self, result: &mut ExecutionResult) {
            result.set_action(JobAction::Abort);
        }
        fn on_finish(&mut self, success: bool) {
            self.0.lock().unwrap().push(success);
        }
    }

    let worker = engine
        .run(
            vec![Job::shell("forever", "sleep 30"), Job::shell("after", "true")],
            Cancelled(Arc::clone(&seen)),
        )
        .unwrap();
    thread::sleep(Duration::from_millis(200));
    worker.cancel();

    let (outcome, _) = worker.join().unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(*seen.lock().unwrap(), vec![false]);
}

#[test]
fn test_background_process_does_not_hold_the_job() {
    let engine = ProcessEngine::new();
    let mut script = Script::default();
    let job = Job::shell("start-daemon", "sleep 30 & echo $!; echo started");

    let started = Instant::now();
    let outcome = engine.run_blocking(&[job], &mut script).unwrap();
    let elapsed = started.elapsed();

    let lines = stdout_lines(&script);
    if let Some(pid) = lines.first().and_then(|pid| pid.parse::<i32>().ok()) {
        let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
    }

    assert!(outcome.is_success());
    assert!(elapsed < Duration::from_secs(5), "job held for {:?}", elapsed);
    assert_eq!(lines.get(1), Some(&"started"));
    assert_eq!(script.finishes, vec![true]);
}
