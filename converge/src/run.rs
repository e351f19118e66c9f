//! Orchestration for `converge run`, `converge resume`, and `converge status`.
//!
//! Wires the workspace (config, inputs, prompt templates, saved state) to the
//! phase sequencer. The state is persisted after every phase and worker
//! records are written as they happen.

use std::cell::RefCell;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::agents::Workers;
use crate::caller::{ResilientCaller, Sleeper};
use crate::cancel::CancelFlag;
use crate::core::state::{PhaseOutput, WorkflowState};
use crate::core::types::PhaseStatus;
use crate::cycle::{CycleConfig, CycleController, PhaseReport, RunError, WorkerRecord};
use crate::io::config::{WorkflowConfig, load_config};
use crate::io::generation::TextGenerator;
use crate::io::init::WorkspacePaths;
use crate::io::check_path_segment;
use crate::io::inputs::load_inputs;
use crate::io::iteration_log::write_record;
use crate::io::prompt::TemplatePrompts;
use crate::io::state_store::{load_state, write_state};
use crate::sequence::run_sequence;

/// How `execute_run` obtains its workflow state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Start a new run, replacing any saved state.
    Fresh { run_id: Option<String> },
    /// Continue the saved run at its next unrecorded phase.
    Resume,
}

/// Result of a run or resume.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    /// Index of the first phase run by this invocation.
    pub started_at: usize,
    /// Reports for phases run by this invocation.
    pub reports: Vec<PhaseReport>,
    /// Final state, including phases recorded by earlier invocations.
    pub state: WorkflowState,
}

impl RunOutcome {
    /// True when some recorded phase did not converge.
    pub fn is_partial(&self) -> bool {
        self.state
            .per_phase_outputs
            .iter()
            .any(|output| output.status != PhaseStatus::Converged)
    }
}

/// Run (or resume) the configured phase plan.
///
/// `make_generator` builds the backend from the loaded config. Returns an
/// error wrapping [`RunError`] on fatal generation failures or cancellation;
/// partial results are persisted either way.
pub fn execute_run<G, S, M>(
    root: &Path,
    mode: &RunMode,
    make_generator: M,
    sleeper: S,
    cancel: CancelFlag,
) -> Result<RunOutcome>
where
    G: TextGenerator + Sync,
    S: Sleeper + Sync,
    M: FnOnce(&WorkflowConfig) -> G,
{
    let paths = WorkspacePaths::new(root);
    if !paths.converge_dir.is_dir() {
        return Err(anyhow!(
            "missing {} (run `converge init` first)",
            paths.converge_dir.display()
        ));
    }
    let cfg = load_config(&paths.config_path)?;
    let plan = cfg.phase_plan();
    let inputs = load_inputs(&paths.inputs_dir)?;
    let prompts = TemplatePrompts::with_overrides(&paths.prompts_dir, cfg.outline_rules())?;
    let workers: Workers = cfg.workers();

    let mut state = match mode {
        RunMode::Fresh { run_id } => {
            let run_id = match run_id {
                Some(id) => {
                    validate_run_id(id)?;
                    id.clone()
                }
                None => generate_run_id(&paths)?,
            };
            let state = WorkflowState::new(run_id);
            write_state(&paths.state_path, &state)?;
            info!(run_id = %state.run_id, "run started");
            state
        }
        RunMode::Resume => {
            if !paths.state_path.exists() {
                return Err(anyhow!("no saved run to resume (use `converge run`)"));
            }
            load_state(&paths.state_path)
                .with_context(|| format!("load {}", paths.state_path.display()))?
        }
    };

    let caller =
        ResilientCaller::with_sleeper(make_generator(&cfg), sleeper, cfg.retry_policy()?, cancel);
    let controller = CycleController::new(&caller, &prompts, &workers).with_config(CycleConfig {
        generator_retries: cfg.generator_retries,
    });

    let run_id = state.run_id.clone();
    let log_error: RefCell<Option<anyhow::Error>> = RefCell::new(None);
    let result = run_sequence(
        &controller,
        &plan,
        &inputs,
        &mut state,
        |record: &WorkerRecord| {
            if let Err(err) = write_record(&paths, &run_id, record) {
                warn!(error = %err, "failed to write worker record");
                log_error.borrow_mut().get_or_insert(err);
            }
        },
        |state: &WorkflowState, _: &PhaseReport| {
            if let Some(err) = log_error.borrow_mut().take() {
                return Err(RunError::Persist(format!("{err:#}")));
            }
            write_state(&paths.state_path, state)
                .map_err(|err| RunError::Persist(format!("{err:#}")))
        },
    );

    match result {
        Ok(outcome) => Ok(RunOutcome {
            run_id: outcome.run_id,
            started_at: outcome.started_at,
            reports: outcome.reports,
            state,
        }),
        Err(err) => {
            warn!(run_id = %run_id, error = %err, "run stopped");
            Err(anyhow::Error::new(err).context(format!("run {run_id}")))
        }
    }
}

/// One line of `converge status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseLine {
    pub phase: String,
    /// `None` while the phase has not been recorded.
    pub output: Option<PhaseOutput>,
}

/// Saved-run status against the configured plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub run_id: Option<String>,
    pub global_iteration_count: u32,
    pub phases: Vec<PhaseLine>,
}

pub fn load_status(root: &Path) -> Result<StatusReport> {
    let paths = WorkspacePaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let state = if paths.state_path.exists() {
        Some(load_state(&paths.state_path)?)
    } else {
        None
    };
    let phases = cfg
        .phases
        .iter()
        .map(|phase| PhaseLine {
            phase: phase.name.clone(),
            output: state
                .as_ref()
                .and_then(|state| state.output(&phase.name))
                .cloned(),
        })
        .collect();
    Ok(StatusReport {
        run_id: state.as_ref().map(|state| state.run_id.clone()),
        global_iteration_count: state.map_or(0, |state| state.global_iteration_count),
        phases,
    })
}

fn validate_run_id(id: &str) -> Result<()> {
    check_path_segment("run id", id)
}

/// `run-<unix seconds>`, suffixed when an iteration log dir already uses it.
fn generate_run_id(paths: &WorkspacePaths) -> Result<String> {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .context("system clock before unix epoch")?
        .as_secs();
    let base = format!("run-{secs}");
    for suffix in 1..=999u32 {
        let id = if suffix == 1 {
            base.clone()
        } else {
            format!("{base}-{suffix}")
        };
        if !paths.iterations_dir.join(&id).exists() {
            return Ok(id);
        }
    }
    Err(anyhow!(
        "unable to generate unique run id from base '{base}' (too many existing runs)"
    ))
}
