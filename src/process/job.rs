//! Job definitions and their resolution against the install
//!
//! A job is one external command. Compile-style jobs carry a list of input
//! files which are appended to the command line in batches so no single
//! invocation grows past `max_command_line` characters.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::install_data::InstallContext;
use crate::selection::SelectionState;
use crate::substitute::VariableSubstitutor;

/// Command line length at which a compile batch is started
pub const DEFAULT_MAX_COMMAND_LINE: usize = 4096;

fn default_max_command_line() -> usize {
    DEFAULT_MAX_COMMAND_LINE
}

/// One external command in a job sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,

    /// Program followed by its arguments
    pub command_line: Vec<String>,

    #[serde(default)]
    pub working_directory: Option<PathBuf>,

    /// Extra environment for the child
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Whether "reconfigure" is an acceptable answer to a failure
    #[serde(default)]
    pub reconfigurable: bool,

    /// Files appended to the command line in batches
    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default = "default_max_command_line")]
    pub max_command_line: usize,

    /// Operating systems the job runs on; empty means all
    #[serde(default)]
    pub os: Vec<String>,

    /// The job runs only if one of these packs is selected; empty means always
    #[serde(default)]
    pub packs: Vec<String>,
}

/// One process launch derived from a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub job_name: String,
    pub argv: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Input files finished before this invocation
    pub files_before: usize,
    /// Input files finished once this invocation completes
    pub files_after: usize,
}

impl Job {
    pub fn new<I, S>(name: impl Into<String>, command_line: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command_line: command_line.into_iter().map(Into::into).collect(),
            working_directory: None,
            env: BTreeMap::new(),
            reconfigurable: false,
            inputs: Vec::new(),
            max_command_line: DEFAULT_MAX_COMMAND_LINE,
            os: Vec::new(),
            packs: Vec::new(),
        }
    }

    /// Convenience for `sh -c <script>`
    pub fn shell(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(name, ["sh".to_string(), "-c".to_string(), script.into()])
    }

    pub fn in_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn reconfigurable(mut self) -> Self {
        self.reconfigurable = true;
        self
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_command_line(mut self, max: usize) -> Self {
        self.max_command_line = max;
        self
    }

    pub fn on_os(mut self, os: impl Into<String>) -> Self {
        self.os.push(os.into());
        self
    }

    pub fn for_pack(mut self, pack: impl Into<String>) -> Self {
        self.packs.push(pack.into());
        self
    }

    /// Compile-style job with per-file progress
    pub fn is_batched(&self) -> bool {
        !self.inputs.is_empty()
    }

    /// Space-joined command line, for display
    pub fn command_line_string(&self) -> String {
        self.command_line.join(" ")
    }

    /// True if the job runs on `os` (an `std::env::consts::OS` value)
    pub fn applies_to_os(&self, os: &str) -> bool {
        if self.os.is_empty() {
            return true;
        }
        self.os.iter().any(|wanted| os_matches(wanted, os))
    }

    /// True if the pack filter is empty or names a selected pack
    pub fn applies_to_selection(&self, state: &SelectionState) -> bool {
        self.packs.is_empty() || self.packs.iter().any(|pack| state.is_selected_ref(pack))
    }

    /// Copy with variables substituted in every string field.
    pub fn substituted(&self, subst: &VariableSubstitutor<'_>) -> Job {
        Job {
            name: self.name.clone(),
            command_line: subst.substitute_all(&self.command_line),
            working_directory: self
                .working_directory
                .as_ref()
                .map(|dir| PathBuf::from(subst.substitute(&dir.to_string_lossy()))),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), subst.substitute(v)))
                .collect(),
            reconfigurable: self.reconfigurable,
            inputs: subst.substitute_all(&self.inputs),
            max_command_line: self.max_command_line,
            os: self.os.clone(),
            packs: self.packs.clone(),
        }
    }

    /// Split the job into process launches.
    ///
    /// A plain job is a single invocation. A batched job appends input
    /// files one at a time and starts an invocation as soon as the command
    /// line reaches `max_command_line`; the remainder forms a final batch.
    pub fn invocations(&self) -> Vec<Invocation> {
        let invocation = |argv: Vec<String>, files_before: usize, files_after: usize| Invocation {
            job_name: self.name.clone(),
            argv,
            working_directory: self.working_directory.clone(),
            env: self.env.clone(),
            files_before,
            files_after,
        };

        if !self.is_batched() {
            return vec![invocation(self.command_line.clone(), 0, 0)];
        }

        let base_len: usize = self.command_line.iter().map(|arg| arg.len() + 1).sum();
        let mut batches = Vec::new();
        let mut argv = self.command_line.clone();
        let mut len = base_len;
        let mut done = 0;

        for (idx, file) in self.inputs.iter().enumerate() {
            argv.push(file.clone());
            len += file.len() + 1;
            if len >= self.max_command_line {
                batches.push(invocation(argv, done, idx + 1));
                done = idx + 1;
                argv = self.command_line.clone();
                len = base_len;
            }
        }
        if argv.len() > self.command_line.len() {
            batches.push(invocation(argv, done, self.inputs.len()));
        }
        batches
    }
}

fn os_matches(wanted: &str, os: &str) -> bool {
    let wanted = wanted.trim().to_ascii_lowercase();
    let family = if os == "windows" { "windows" } else { "unix" };
    match wanted.as_str() {
        "unix" => family == "unix",
        "mac" | "osx" | "macosx" => os == "macos",
        other => other == os,
    }
}

/// Jobs that apply to this machine and selection, with variables substituted.
pub fn resolve_jobs(
    jobs: &[Job],
    state: Option<&SelectionState>,
    ctx: &dyn InstallContext,
) -> Vec<Job> {
    let subst = VariableSubstitutor::new(ctx);
    jobs.iter()
        .filter(|job| {
            let keep = job.applies_to_os(std::env::consts::OS);
            if !keep {
                log::debug!("Job '{}' skipped: not for {}", job.name, std::env::consts::OS);
            }
            keep
        })
        .filter(|job| {
            let keep = state.is_none_or(|s| job.applies_to_selection(s));
            if !keep {
                log::debug!("Job '{}' skipped: none of its packs are selected", job.name);
            }
            keep
        })
        .map(|job| job.substituted(&subst))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install_data::InstallData;
    use crate::pack::Pack;

    #[test]
    fn test_plain_job_is_single_invocation() {
        let job = Job::new("hello", ["echo", "hi"]).in_directory("/tmp");
        let invocations = job.invocations();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].argv, vec!["echo", "hi"]);
        assert_eq!(invocations[0].working_directory, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_batched_job_splits_on_length() {
        // "cc " = 3 chars; each file "fN.c " = 5 chars
        let job = Job::new("compile", ["cc"])
            .with_inputs(["f1.c", "f2.c", "f3.c", "f4.c", "f5.c"])
            .with_max_command_line(13);
        let batches = job.invocations();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].argv, vec!["cc", "f1.c", "f2.c"]);
        assert_eq!((batches[0].files_before, batches[0].files_after), (0, 2));
        assert_eq!(batches[1].argv, vec!["cc", "f3.c", "f4.c"]);
        assert_eq!(batches[2].argv, vec!["cc", "f5.c"]);
        assert_eq!((batches[2].files_before, batches[2].files_after), (4, 5));
    }

    #[test]
    fn test_oversized_file_gets_its_own_batch() {
        let job = Job::new("compile", ["cc"])
            .with_inputs(["a_very_long_file_name.c", "b.c"])
            .with_max_command_line(10);
        let batches = job.invocations();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].argv, vec!["cc", "a_very_long_file_name.c"]);
        assert_eq!(batches[1].argv, vec!["cc", "b.c"]);
    }

    #[test]
    fn test_os_filter() {
        let job = Job::new("x", ["true"]).on_os("unix");
        assert!(job.applies_to_os("linux"));
        assert!(job.applies_to_os("macos"));
        assert!(!job.applies_to_os("windows"));

        let job = Job::new("x", ["true"]).on_os("Windows");
        assert!(job.applies_to_os("windows"));
        assert!(!job.applies_to_os("linux"));

        assert!(Job::new("x", ["true"]).on_os("mac").applies_to_os("macos"));
        assert!(Job::new("x", ["true"]).applies_to_os("freebsd"));
    }

    #[test]
    fn test_pack_filter() {
        let packs = vec![Pack::new("Core", 0).required(), Pack::new("Docs", 1).with_id("docs")];
        let state = SelectionState::new(packs, Vec::<String>::new());
        assert!(Job::new("x", ["true"]).for_pack("Core").applies_to_selection(&state));
        assert!(!Job::new("x", ["true"]).for_pack("docs").applies_to_selection(&state));
        let job = Job::new("x", ["true"]).for_pack("docs").for_pack("Core");
        assert!(job.applies_to_selection(&state));
    }

    #[test]
    fn test_resolve_jobs_filters_and_substitutes() {
        let packs = vec![Pack::new("Core", 0).required(), Pack::new("Docs", 1)];
        let state = SelectionState::new(packs, Vec::<String>::new());
        let data = InstallData::new().with_variable("INSTALL_PATH", "/opt/demo");
        let jobs = vec![
            Job::new("setup", ["$INSTALL_PATH/bin/setup", "--prefix=${INSTALL_PATH}"])
                .in_directory("$INSTALL_PATH")
                .with_env("HOME_DIR", "$INSTALL_PATH/home"),
            Job::new("docs", ["index-docs"]).for_pack("Docs"),
            Job::new("never", ["true"]).on_os("no-such-os"),
        ];

        let resolved = resolve_jobs(&jobs, Some(&state), &data);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].command_line, vec!["/opt/demo/bin/setup", "--prefix=/opt/demo"]);
        assert_eq!(resolved[0].working_directory, Some(PathBuf::from("/opt/demo")));
        assert_eq!(resolved[0].env["HOME_DIR"], "/opt/demo/home");

        assert_eq!(resolve_jobs(&jobs, None, &data).len(), 2);
    }

    #[test]
    fn test_deserialize_defaults() {
        let job: Job = serde_json::from_str(r#"{"name": "a", "command_line": ["true"]}"#).unwrap();
        assert_eq!(job.max_command_line, DEFAULT_MAX_COMMAND_LINE);
        assert!(!job.reconfigurable);
        assert!(job.os.is_empty());
    }
}
