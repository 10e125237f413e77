//! Child process lifecycle for job execution
//!
//! Every job command runs in its own process group and is recorded in a
//! global registry while it is alive. When the wizard is interrupted
//! (SIGINT, SIGTERM, SIGHUP) or the shutdown guard is dropped, each
//! recorded group receives SIGTERM, then SIGKILL after a grace period.
//! Children also get `PR_SET_PDEATHSIG` so a crashed wizard does not leave
//! a compiler or post-install script running.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// PIDs (process group leaders) of running job commands.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    /// Set once termination starts so signal handler and guard do not race
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// The process-wide registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        log::debug!("Tracking job process {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        if self.pids.remove(&pid) {
            log::debug!("Job process {} no longer tracked", pid);
        }
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    /// SIGTERM every tracked group, wait up to `grace_period`, then SIGKILL.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            log::debug!("Job process cleanup already running");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            return;
        }

        log::info!("Terminating {} running job process(es)", self.pids.len());
        let pids: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids {
            signal_group_or_process(pid, Signal::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                log::info!("All job processes exited");
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in &pids {
            if is_process_alive(pid) {
                log::warn!("Job process group {} ignored SIGTERM, killing it", pid);
                signal_group_or_process(pid, Signal::SIGKILL);
            }
        }
        self.pids.clear();
    }
}

/// Registers a PID on creation and unregisters it on drop.
#[derive(Debug)]
pub struct TrackedChild {
    pid: u32,
}

impl TrackedChild {
    pub fn new(pid: u32) -> Self {
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for TrackedChild {
    fn drop(&mut self) {
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(self.pid);
        }
    }
}

/// Kill the whole process group led by `pid` (cancellation).
pub fn kill_process_group(pid: u32) {
    signal_group_or_process(pid, Signal::SIGKILL);
}

fn signal_group_or_process(pid: u32, sig: Signal) {
    // Negative PID addresses the group, reaching grandchildren of `sh -c`
    if let Err(e) = signal::kill(Pid::from_raw(-(pid as i32)), sig) {
        log::debug!("Signalling group {} with {} failed ({}), trying the process", pid, sig, e);
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), sig) {
            log::warn!("Failed to send {} to {}: {}", sig, pid, e);
        }
    }
}

/// Alive and not a zombie
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // Third field is the state letter
        if let Some(state) = stat.split_whitespace().nth(2) {
            return !matches!(state, "Z" | "X");
        }
    }
    true
}

/// Terminates all tracked job processes when dropped.
///
/// Held by the binary for the duration of a run.
pub struct ShutdownGuard {
    registry: Arc<Mutex<ChildRegistry>>,
    grace_period: Duration,
}

impl ShutdownGuard {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            registry: ChildRegistry::global(),
            grace_period,
        }
    }

    pub fn child_count(&self) -> usize {
        self.registry.lock().map(|r| r.count()).unwrap_or(0)
    }
}

impl Default for ShutdownGuard {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(self.grace_period);
        }
    }
}

/// Install handlers that terminate running jobs on SIGINT, SIGTERM and
/// SIGHUP, then exit with `128 + signal`.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "signal",
            };
            log::info!("Received {}, stopping running jobs", name);
            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }
            std::process::exit(128 + sig);
        }
    });
    Ok(())
}

/// Spawn a command as the leader of a new process group.
pub trait CommandProcessGroup {
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe setpgid and prctl
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}
