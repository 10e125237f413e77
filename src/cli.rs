use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::types::JobAction;

/// wizard-panels - console and unattended front end of the installer panels
#[derive(Parser)]
#[command(name = "wizard-panels")]
#[command(about = "Pack selection, job execution and shortcut resolution for installers")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: show what would be executed without running it.
    ///
    /// Jobs are resolved (OS and pack filters, variables) and listed, but
    /// no process is started.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that builds a selection.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Install descriptor (JSON)
    pub descriptor: PathBuf,

    /// Select a pack (id or name), may be repeated
    #[arg(long = "select", value_name = "PACK")]
    pub select: Vec<String>,

    /// Deselect a pack (id or name), may be repeated
    #[arg(long = "deselect", value_name = "PACK")]
    pub deselect: Vec<String>,

    /// Replay a recorded automation snapshot before applying --select/--deselect
    #[arg(long, value_name = "XML")]
    pub replay: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the flat pack table
    Packs {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Ask 1/0 for every pack on the terminal
        #[arg(short, long)]
        interactive: bool,

        /// Write the resulting selection as automation XML
        #[arg(long, value_name = "XML")]
        record: Option<PathBuf>,
    },
    /// Show the pack tree with partial states and sizes
    Tree {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Click a tree node (pack id or name), may be repeated
        #[arg(long = "click", value_name = "PACK")]
        click: Vec<String>,
    },
    /// Run the descriptor's jobs for the selection
    Run {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Answer failures automatically instead of prompting
        #[arg(long)]
        automated: bool,

        /// Decision used for failures in automated mode (continue, abort)
        #[arg(long, default_value = "continue")]
        on_failure: JobAction,
    },
    /// Resolve the shortcut spec for the selection
    Shortcuts {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Validate a descriptor and its initial selection
    Validate {
        #[command(flatten)]
        selection: SelectionArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["wizard-panels"]).is_err());
    }

    #[test]
    fn test_cli_packs_with_selection() {
        let cli = Cli::try_parse_from([
            "wizard-panels",
            "packs",
            "install.json",
            "--select",
            "docs",
            "--select",
            "samples",
            "--record",
            "out.xml",
        ])
        .unwrap();
        match cli.command {
            Commands::Packs { selection, record, interactive } => {
                assert_eq!(selection.descriptor, PathBuf::from("install.json"));
                assert_eq!(selection.select, vec!["docs", "samples"]);
                assert_eq!(record, Some(PathBuf::from("out.xml")));
                assert!(!interactive);
            }
            _ => panic!("Expected Packs command"),
        }
    }

    #[test]
    fn test_cli_run_dry_run_global() {
        let cli = Cli::try_parse_from([
            "wizard-panels",
            "run",
            "install.json",
            "--automated",
            "--dry-run",
        ])
        .unwrap();
        assert!(cli.dry_run);
        match cli.command {
            Commands::Run { automated, on_failure, .. } => {
                assert!(automated);
                assert_eq!(on_failure, JobAction::Continue);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_run_on_failure_short_form() {
        let cli =
            Cli::try_parse_from(["wizard-panels", "run", "install.json", "--on-failure", "a"])
                .unwrap();
        match cli.command {
            Commands::Run { on_failure, .. } => assert_eq!(on_failure, JobAction::Abort),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_tree_clicks() {
        let cli =
            Cli::try_parse_from(["wizard-panels", "tree", "install.json", "--click", "tools"])
                .unwrap();
        match cli.command {
            Commands::Tree { click, .. } => assert_eq!(click, vec!["tools"]),
            _ => panic!("Expected Tree command"),
        }
    }
}
