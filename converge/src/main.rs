//! Phase orchestration CLI.
//!
//! Drives an artifact through the configured phases in `.converge/config.toml`,
//! persisting progress to `.converge/state/` so an interrupted run can resume.

use std::path::Path;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use converge::caller::ThreadSleeper;
use converge::cancel::{CancelFlag, install_ctrlc};
use converge::cycle::RunError;
use converge::exit_codes;
use converge::io::generation::CommandGenerator;
use converge::io::init::{InitOptions, init_workspace};
use converge::logging;
use converge::run::{RunMode, RunOutcome, StatusReport, execute_run, load_status};
use converge::validate::{StateValidation, validate_workspace};

#[derive(Parser)]
#[command(
    name = "converge",
    version,
    about = "Generate, critique, and refine an artifact through ordered phases"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.converge/` with a default config.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Check layout, config, prompt templates, and saved state.
    Validate,
    /// Start a new run over the configured phases.
    Run {
        /// Use this run id instead of generating one.
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Continue the saved run at its next unrecorded phase.
    Resume,
    /// Print the saved run's per-phase status.
    Status,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<RunError>() {
        Some(RunError::Cancelled) => exit_codes::CANCELLED,
        Some(RunError::Fatal { .. }) => exit_codes::ABORTED,
        _ => exit_codes::INVALID,
    }
}

fn dispatch(command: Command) -> Result<i32> {
    let root = Path::new(".");
    match command {
        Command::Init { force } => {
            let paths = init_workspace(root, &InitOptions { force })?;
            println!("initialized {}", paths.converge_dir.display());
            Ok(exit_codes::OK)
        }
        Command::Validate => {
            let outcome = validate_workspace(root)?;
            match outcome.state {
                StateValidation::NotStarted => {
                    println!("ok: {} phases, no saved run", outcome.phases);
                }
                StateValidation::Saved {
                    run_id,
                    completed,
                    total,
                } => println!("ok: run {run_id}, {completed}/{total} phases recorded"),
            }
            Ok(exit_codes::OK)
        }
        Command::Run { run_id } => run_phases(root, &RunMode::Fresh { run_id }),
        Command::Resume => run_phases(root, &RunMode::Resume),
        Command::Status => {
            print_status(&load_status(root)?);
            Ok(exit_codes::OK)
        }
    }
}

fn run_phases(root: &Path, mode: &RunMode) -> Result<i32> {
    let cancel = CancelFlag::new();
    install_ctrlc(&cancel)?;
    let outcome = execute_run(
        root,
        mode,
        |cfg| CommandGenerator::new(cfg.command_spec()),
        ThreadSleeper,
        cancel,
    )
    .context("converge run")?;
    print_outcome(&outcome);
    Ok(exit_codes::OK)
}

fn print_outcome(outcome: &RunOutcome) {
    if outcome.reports.is_empty() {
        println!("run {}: nothing to do, all phases recorded", outcome.run_id);
    }
    println!("run {}", outcome.run_id);
    println!("{:<28} {:<18} {:>10} {:>8}", "PHASE", "STATUS", "ITERATIONS", "CHARS");
    for output in &outcome.state.per_phase_outputs {
        println!(
            "{:<28} {:<18} {:>10} {:>8}",
            output.phase,
            output.status.as_str(),
            output.iterations,
            output.artifact.chars().count()
        );
    }
    if outcome.is_partial() {
        println!("partial: some phases did not converge");
    }
}

fn print_status(status: &StatusReport) {
    match &status.run_id {
        Some(run_id) => println!(
            "run {run_id} ({} refine rounds)",
            status.global_iteration_count
        ),
        None => println!("no saved run"),
    }
    for line in &status.phases {
        let state = line
            .output
            .as_ref()
            .map_or("pending", |output| output.status.as_str());
        println!("{:<28} {state}", line.phase);
    }
}
