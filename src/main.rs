//! wizard-panels - Main entry point
//!
//! Console and unattended driver for the pack, process and shortcut panels.

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info};
use std::fs;
use std::io::{self, Write};

use wizard_panels::automation::{self, AutomatedHandler, write_snapshot_xml};
use wizard_panels::cli::{Cli, Commands, SelectionArgs};
use wizard_panels::config_file::InstallDescriptor;
use wizard_panels::console::{ConsoleHandler, list_packs, prompt_pack_selection};
use wizard_panels::install_data::InstallData;
use wizard_panels::pack::format_bytes;
use wizard_panels::process::{Job, ProcessEngine, ProgressHandler, RunOutcome, resolve_jobs};
use wizard_panels::process_guard::{self, ShutdownGuard};
use wizard_panels::selection::tree::{NodeId, PackTree, ROOT};
use wizard_panels::selection::{SelectionState, ValidatorRegistry};
use wizard_panels::shortcut;
use wizard_panels::substitute::VariableSubstitutor;
use wizard_panels::types::JobAction;

/// Initialize the logger with appropriate settings
fn init_logger() {
    use env_logger::Builder;

    Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env() // Allows RUST_LOG env var to override
        .init();
}

/// Descriptor, selection and install context for one command
struct Session {
    descriptor: InstallDescriptor,
    state: SelectionState,
    data: InstallData,
}

fn load_session(args: &SelectionArgs) -> Result<Session> {
    info!("Loading install descriptor: {:?}", args.descriptor);
    let descriptor = InstallDescriptor::load_from_file(&args.descriptor)?;
    descriptor.validate().context("Install descriptor is invalid")?;

    let mut state = descriptor.to_selection_state();
    let data = descriptor.to_install_data();

    if let Some(path) = &args.replay {
        automation::replay_file(path, &mut state, &data)
            .with_context(|| format!("Failed to replay automation data from {:?}", path))?;
    }
    state.apply_requests(&args.select, &args.deselect)?;

    Ok(Session { descriptor, state, data })
}

/// Main application entry point
fn main() -> Result<()> {
    // Initialize logging first
    init_logger();
    info!("wizard-panels starting up");

    // Child process groups are terminated on SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        log::warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    let cli = Cli::parse();
    debug!("CLI arguments parsed");

    let ok = match cli.command {
        Commands::Packs {
            selection,
            interactive,
            record,
        } => {
            let mut session = load_session(&selection)?;
            let mut out = io::stdout().lock();
            if interactive {
                prompt_pack_selection(&mut session.state, &mut io::stdin().lock(), &mut out)?;
            }
            list_packs(&session.state, &mut out)?;
            if let Some(path) = record {
                let xml = write_snapshot_xml(&session.state.snapshot_for_automation())?;
                fs::write(&path, xml)
                    .with_context(|| format!("Failed to write automation data to {:?}", path))?;
                info!("Selection recorded to {:?}", path);
            }
            true
        }
        Commands::Tree { selection, click } => {
            let mut session = load_session(&selection)?;
            let mut tree = PackTree::build(&mut session.state);
            for reference in &click {
                match session.state.resolve(reference).and_then(|idx| tree.node_for_pack(idx)) {
                    Some(node) => {
                        tree.click(node, &mut session.state);
                    }
                    None => log::warn!("No tree node for pack '{}'", reference),
                }
            }
            let mut out = io::stdout().lock();
            print_tree(&tree, ROOT, 0, &mut out)?;
            writeln!(out, "Total size: {}", format_bytes(tree.total_bytes()))?;
            true
        }
        Commands::Run {
            selection,
            automated,
            on_failure,
        } => {
            let mut session = load_session(&selection)?;
            run_jobs(&mut session, cli.dry_run, automated, on_failure)?
        }
        Commands::Shortcuts { selection } => {
            let session = load_session(&selection)?;
            let subst = VariableSubstitutor::new(&session.data);
            let resolved = shortcut::resolve(&session.descriptor.shortcuts, &session.state, &subst);
            if !resolved.supported {
                println!("Shortcuts are not supported; nothing would be created.");
            }
            for placement in &resolved.placements {
                let group = if placement.in_program_group {
                    format!(" [{}]", resolved.program_group)
                } else {
                    String::new()
                };
                println!(
                    "{}{}: {} -> {}",
                    placement.location,
                    group,
                    placement.name,
                    placement.target.display()
                );
            }
            true
        }
        Commands::Validate { selection } => {
            let session = load_session(&selection)?;
            match session.state.validate(&session.data, &ValidatorRegistry::new()).into_result() {
                Ok(()) => {
                    info!("Descriptor validation successful");
                    println!("✓ Descriptor and selection are valid");
                    true
                }
                Err(e) => {
                    error!("{}", e);
                    eprintln!("✗ {}", e);
                    false
                }
            }
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn print_tree<W: Write>(
    tree: &PackTree,
    node: NodeId,
    depth: usize,
    out: &mut W,
) -> io::Result<()> {
    let Some(current) = tree.node(node) else {
        return Ok(());
    };
    if current.pack.is_some() {
        let mark = match (current.selected, current.partial, current.enabled) {
            (_, true, _) => "~",
            (true, _, _) => "x",
            (false, _, false) => "-",
            (false, _, true) => " ",
        };
        writeln!(
            out,
            "{}[{}] {} ({})",
            "  ".repeat(depth.saturating_sub(1)),
            mark,
            current.translated_text,
            format_bytes(current.total_size)
        )?;
    }
    for &child in &current.children {
        print_tree(tree, child, depth + 1, out)?;
    }
    Ok(())
}

fn print_jobs(jobs: &[Job]) {
    println!("[DRY RUN] {} job(s) would run:", jobs.len());
    for (idx, job) in jobs.iter().enumerate() {
        println!("  {}. {}: {}", idx + 1, job.name, job.command_line_string());
        if job.is_batched() {
            println!(
                "     {} input file(s), {} invocation(s)",
                job.inputs.len(),
                job.invocations().len()
            );
        }
    }
}

/// Run the selected jobs; a reconfigure answer goes back to pack selection.
fn run_jobs(
    session: &mut Session,
    dry_run: bool,
    automated: bool,
    on_failure: JobAction,
) -> Result<bool> {
    let engine = ProcessEngine::new();
    let _shutdown = ShutdownGuard::default();

    loop {
        let jobs = resolve_jobs(&session.descriptor.jobs, Some(&session.state), &session.data);
        if dry_run {
            print_jobs(&jobs);
            return Ok(true);
        }

        let mut handler: Box<dyn ProgressHandler> = if automated {
            Box::new(AutomatedHandler::new(on_failure))
        } else {
            Box::new(ConsoleHandler::new(io::stdin().lock(), io::stdout()))
        };

        let outcome = engine.run_blocking(&jobs, &mut handler)?;
        // The console handler holds the stdin lock
        drop(handler);

        match outcome {
            RunOutcome::Reconfigure if !automated => {
                info!("Reconfiguring pack selection");
                prompt_pack_selection(
                    &mut session.state,
                    &mut io::stdin().lock(),
                    &mut io::stdout().lock(),
                )?;
            }
            RunOutcome::Reconfigure => {
                error!("Reconfiguration requested in automated mode");
                return Ok(false);
            }
            outcome => return Ok(outcome.is_success()),
        }
    }
}
