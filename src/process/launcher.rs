//! Process launching, the engine's only OS dependency

use std::io;
use std::process::{Child, Command, Stdio};

use super::job::Invocation;
use crate::process_guard::CommandProcessGroup;

/// Starts a process for an invocation with piped stdout and stderr.
pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, invocation: &Invocation) -> io::Result<Child>;
}

/// Launches real processes, each in its own process group.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn spawn(&self, invocation: &Invocation) -> io::Result<Child> {
        let (program, args) = invocation.argv.split_first().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("job '{}' has an empty command line", invocation.job_name),
            )
        })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();
        if let Some(dir) = &invocation.working_directory {
            command.current_dir(dir);
        }

        log::debug!("Spawning {:?}", invocation.argv);
        command.spawn()
    }
}
