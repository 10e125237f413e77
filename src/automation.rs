//! Unattended installs
//!
//! Two pieces: the pack selection snapshot recorded into and replayed from
//! an automation XML document, and a [`ProgressHandler`] that answers job
//! failures from a script instead of a person.
//!
//! # Snapshot format
//!
//! ```xml
//! <packs>
//!   <pack index="0" id="core" name="Core" selected="true"/>
//!   <pack index="1" name="Docs" selected="false"/>
//! </packs>
//! ```
//!
//! The reader is liberal: any root element is accepted, packs may sit inside
//! a `<selected>` wrapper, every attribute is optional and `selected`
//! defaults to `true`.

use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use thiserror::Error;

use crate::install_data::InstallContext;
use crate::process::{ExecutionResult, FailureReport, ProgressHandler};
use crate::selection::{PackSnapshotEntry, SelectionDelta, SelectionState};
use crate::types::JobAction;

/// Errors reading or writing automation data.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("malformed automation XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed attribute: {0}")]
    Attribute(#[from] AttrError),

    #[error("invalid value '{value}' for attribute '{attribute}'")]
    InvalidValue { attribute: String, value: String },

    #[error("automation XML is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}

impl AutomationError {
    fn invalid(attribute: &str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            attribute: attribute.to_string(),
            value: value.into(),
        }
    }
}

// ============================================================================
// Snapshot XML
// ============================================================================

/// Serialize a selection snapshot.
pub fn write_snapshot_xml(entries: &[PackSnapshotEntry]) -> Result<String, AutomationError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("packs")))?;

    for entry in entries {
        let mut element = BytesStart::new("pack");
        let index = entry.index.map(|i| i.to_string());
        if let Some(index) = &index {
            element.push_attribute(("index", index.as_str()));
        }
        if !entry.id.is_empty() {
            element.push_attribute(("id", entry.id.as_str()));
        }
        element.push_attribute(("name", entry.name.as_str()));
        element.push_attribute(("selected", if entry.selected { "true" } else { "false" }));
        writer.write_event(Event::Empty(element))?;
    }

    writer.write_event(Event::End(BytesEnd::new("packs")))?;
    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}

/// Parse `<pack>` elements anywhere in the document.
///
/// An unparsable `index` is logged and ignored so the entry can still match
/// by id or name; an unparsable `selected` is an error.
pub fn read_snapshot_xml(xml: &str) -> Result<Vec<PackSnapshotEntry>, AutomationError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(ref e) | Event::Empty(ref e) if e.name().as_ref() == b"pack" => {
                entries.push(parse_pack(e)?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    log::debug!("Read {} pack entries from automation XML", entries.len());
    Ok(entries)
}

/// Replay an automation file onto `state`.
pub fn replay_file(
    path: impl AsRef<Path>,
    state: &mut SelectionState,
    ctx: &dyn InstallContext,
) -> crate::error::Result<SelectionDelta> {
    let path = path.as_ref();
    let xml = fs::read_to_string(path)?;
    let entries = read_snapshot_xml(&xml)?;
    let delta = state.apply_automation_snapshot(&entries, ctx);
    log::info!(
        "Replayed {:?}: {} pack(s) added, {} removed",
        path,
        delta.added.len(),
        delta.removed.len()
    );
    Ok(delta)
}

fn parse_pack(element: &BytesStart<'_>) -> Result<PackSnapshotEntry, AutomationError> {
    let mut entry = PackSnapshotEntry {
        index: None,
        id: String::new(),
        name: String::new(),
        selected: true,
    };

    for attr in element.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.trim().to_string();
        match attr.key.as_ref() {
            b"index" => match value.parse::<usize>() {
                Ok(index) => entry.index = Some(index),
                Err(_) => {
                    log::warn!("Invalid pack index \"{}\" in automation data, ignoring", value)
                }
            },
            b"id" => entry.id = value,
            b"name" => entry.name = value,
            b"selected" => {
                entry.selected = match value.to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => true,
                    "false" | "no" | "0" => false,
                    _ => return Err(AutomationError::invalid("selected", value)),
                }
            }
            _ => {}
        }
    }

    Ok(entry)
}

// ============================================================================
// Scripted decisions
// ============================================================================

/// Progress handler for unattended runs.
///
/// Output goes to the log; failures are answered with a per-job override or
/// the default action, and their reports are kept for the caller.
#[derive(Debug, Clone)]
pub struct AutomatedHandler {
    default_action: JobAction,
    overrides: BTreeMap<String, JobAction>,
    failures: Vec<FailureReport>,
    success: Option<bool>,
}

impl Default for AutomatedHandler {
    fn default() -> Self {
        Self::new(JobAction::Continue)
    }
}

impl AutomatedHandler {
    pub fn new(default_action: JobAction) -> Self {
        Self {
            default_action,
            overrides: BTreeMap::new(),
            failures: Vec::new(),
            success: None,
        }
    }

    /// Answer failures of `job` with `action` instead of the default
    pub fn with_override(mut self, job: impl Into<String>, action: JobAction) -> Self {
        self.overrides.insert(job.into(), action);
        self
    }

    /// Reports of every failure seen so far
    pub fn failures(&self) -> &[FailureReport] {
        &self.failures
    }

    /// `None` until the run finishes
    pub fn success(&self) -> Option<bool> {
        self.success
    }
}

impl ProgressHandler for AutomatedHandler {
    fn on_start(&mut self, total_jobs: usize) {
        log::info!("[ Starting {} job(s) ]", total_jobs);
    }

    fn on_job_begin(&mut self, name: &str, ordinal: usize, _max_steps: usize) {
        log::info!("[ {}: {} ]", ordinal, name);
    }

    fn on_output_line(&mut self, line: &str, is_stderr: bool) {
        if is_stderr {
            log::warn!("{}", line);
        } else {
            log::info!("{}", line);
        }
    }

    fn on_progress(&mut self, step: usize, message: &str) {
        log::debug!("step {}: {}", step, message);
    }

    fn on_job_failed(&mut self, result: &mut ExecutionResult) {
        let report = result.failure_report();
        log::error!("[ Job '{}' failed ]", result.job_name);
        log::error!("Command line: {}", report.command_line);
        log::error!("stdout:\n{}", report.stdout);
        log::error!("stderr:\n{}", report.stderr);
        self.failures.push(report);

        let action = self
            .overrides
            .get(&result.job_name)
            .copied()
            .unwrap_or(self.default_action);
        result.set_action(action);
    }

    fn on_finish(&mut self, success: bool) {
        if success {
            log::info!("[ Processing finished ]");
        } else {
            log::error!("[ Processing failed ]");
        }
        self.success = Some(success);
    }
}
