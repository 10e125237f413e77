//! Console front end
//!
//! Line-oriented counterparts of the pack and process panels: a pack list
//! with 1/0 prompts, and a [`ProgressHandler`] that prints job output and
//! asks `continue / abort / reconfigure` on failure. Reader and writer are
//! generic so tests can script both sides.

use std::io::{self, BufRead, Write};
use std::str::FromStr;

use crate::pack::format_bytes;
use crate::process::{ExecutionResult, ProgressHandler};
use crate::selection::SelectionState;
use crate::selection::flat::cell_state;
use crate::types::{JobAction, PackCellState};

/// Read one trimmed line; `None` at end of input.
fn read_answer<R: BufRead>(input: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

// ============================================================================
// Packs
// ============================================================================

/// One pack row as printed in the console list.
pub fn pack_line(state: &SelectionState, idx: usize) -> String {
    let Some(pack) = state.pack(idx) else {
        return String::new();
    };
    let mark = match cell_state(state, idx) {
        PackCellState::RequiredSelected => "<required>",
        PackCellState::Selected => "x",
        PackCellState::Partial => "~",
        PackCellState::Disabled => "-",
        PackCellState::Deselected => " ",
    };
    let mut line = format!("[{}] {} ({})", mark, pack.name, format_bytes(pack.nbytes));
    if !pack.description.is_empty() {
        line.push_str(&format!(" - {}", pack.description));
    }
    line
}

/// Print every pack with its state and the total size.
pub fn list_packs<W: Write>(state: &SelectionState, out: &mut W) -> io::Result<()> {
    for idx in 0..state.len() {
        writeln!(out, "{}", pack_line(state, idx))?;
    }
    writeln!(out, "Total size: {}", format_bytes(state.selected_bytes()))
}

/// Ask 1/0 for every editable pack.
///
/// An empty answer keeps the current state; anything else is asked again.
/// End of input stops prompting and keeps the remaining packs as they are.
pub fn prompt_pack_selection<R: BufRead, W: Write>(
    state: &mut SelectionState,
    input: &mut R,
    out: &mut W,
) -> io::Result<()> {
    for idx in 0..state.len() {
        if !cell_state(state, idx).is_editable() {
            writeln!(out, "{}", pack_line(state, idx))?;
            continue;
        }

        loop {
            writeln!(out, "{}", pack_line(state, idx))?;
            writeln!(out, "input 1 to select, 0 to deselect:")?;
            out.flush()?;

            let Some(answer) = read_answer(input)? else {
                writeln!(out)?;
                writeln!(out, "...pack selection done.")?;
                return Ok(());
            };
            let desired = match answer.as_str() {
                "" => break,
                "1" => true,
                "0" => false,
                _ => continue,
            };
            state.toggle_index(idx, desired);
            break;
        }
    }

    writeln!(out)?;
    writeln!(out, "...pack selection done.")
}

// ============================================================================
// Jobs
// ============================================================================

/// Interactive progress handler for terminals.
pub struct ConsoleHandler<R, W> {
    input: R,
    out: W,
    total: usize,
}

impl<R: BufRead, W: Write> ConsoleHandler<R, W> {
    pub fn new(input: R, out: W) -> Self {
        Self { input, out, total: 0 }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.input, self.out)
    }

    fn say(&mut self, message: std::fmt::Arguments<'_>) {
        if let Err(e) = self.out.write_fmt(message).and_then(|_| self.out.write_all(b"\n")) {
            log::debug!("Console write failed: {}", e);
        }
    }

    /// Ask until a valid answer arrives; end of input means abort.
    pub fn ask_action(&mut self, reconfigurable: bool) -> io::Result<JobAction> {
        let prompt = if reconfigurable {
            "[c]ontinue, [a]bort or [r]econfigure? "
        } else {
            "[c]ontinue or [a]bort? "
        };

        loop {
            write!(self.out, "{}", prompt)?;
            self.out.flush()?;

            let Some(answer) = read_answer(&mut self.input)? else {
                writeln!(self.out)?;
                return Ok(JobAction::Abort);
            };
            match JobAction::from_str(&answer) {
                Ok(JobAction::Reconfigure) if !reconfigurable => {
                    writeln!(self.out, "This job cannot be reconfigured.")?;
                }
                Ok(action) => return Ok(action),
                Err(_) => writeln!(self.out, "Please answer c, a or r.")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> ProgressHandler for ConsoleHandler<R, W> {
    fn on_start(&mut self, total_jobs: usize) {
        self.total = total_jobs;
        self.say(format_args!("[ Starting processing ]"));
    }

    fn on_job_begin(&mut self, name: &str, ordinal: usize, _max_steps: usize) {
        let total = self.total;
        self.say(format_args!("Starting process {} ({}/{})", name, ordinal, total));
    }

    fn on_output_line(&mut self, line: &str, is_stderr: bool) {
        if is_stderr {
            eprintln!("{}", line);
        } else {
            self.say(format_args!("{}", line));
        }
    }

    fn on_progress(&mut self, step: usize, message: &str) {
        self.say(format_args!("  [{}] {}", step, message));
    }

    fn on_job_failed(&mut self, result: &mut ExecutionResult) {
        let report = result.failure_report();
        self.say(format_args!("[ ERROR: {} ]", report.message));
        self.say(format_args!("Command line: {}", report.command_line));
        if !report.stderr.is_empty() {
            self.say(format_args!("stderr:\n{}", report.stderr.trim_end()));
        }

        match self.ask_action(result.reconfigurable) {
            Ok(action) => result.set_action(action),
            Err(e) => log::warn!("Could not read decision for job '{}': {}", result.job_name, e),
        }
    }

    fn on_reconfigure(&mut self) {
        self.say(format_args!("[ Processing stopped for reconfiguration ]"));
    }

    fn on_finish(&mut self, success: bool) {
        if success {
            self.say(format_args!("[ Processing finished ]"));
        } else {
            self.say(format_args!("[ Processing failed ]"));
        }
    }
}
