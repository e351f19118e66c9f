//! Cycle Controller: one phase's generate → critique → refine loop.
//!
//! States run `INITIAL_GENERATION → CRITIQUE → REFINE → CRITIQUE ...` until a
//! critique lands in the phase's terminal set (`Converged`) or the refine
//! budget runs out (`BudgetExhausted`). The controller is the only writer of
//! the phase's version history.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::agents::{
    Draft, PriorOutput, WorkerContext, WorkerError, WorkerOutput, WorkerResult, Workers,
};
use crate::caller::{CallError, ResilientCaller, Sleeper};
use crate::core::assessment::Severity;
use crate::core::scoring::{Selection, StructuralScorer, VersionScorer, select_version};
use crate::core::state::{StateError, WorkflowState};
use crate::core::types::{
    Critique, CritiqueRecord, FailureKind, Phase, PhaseStatus, StepFailure, Version, WorkerRole,
};
use crate::io::generation::TextGenerator;
use crate::io::prompt::PromptBuilder;

/// Failure that stops the whole run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("phase '{phase}': fatal generation failure: {message}")]
    Fatal { phase: String, message: String },
    #[error("run cancelled")]
    Cancelled,
    #[error("phase '{phase}': {message}")]
    Prompt { phase: String, message: String },
    #[error(transparent)]
    State(#[from] StateError),
    #[error("persist progress: {0}")]
    Persist(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleConfig {
    /// Extra generator attempts after a rejected initial draft.
    pub generator_retries: u32,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            generator_retries: 2,
        }
    }
}

/// One worker run, in call order, for the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerRecord {
    pub phase: String,
    /// Set for records produced while developing a parallel candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<u32>,
    pub sequence: u32,
    pub iteration: u32,
    pub result: WorkerResult,
}

/// Everything a finished phase produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: String,
    pub status: PhaseStatus,
    /// Refine rounds run, including rounds whose refinement was rejected.
    pub iterations: u32,
    pub history: Vec<Version>,
    pub critiques: Vec<CritiqueRecord>,
    pub failures: Vec<StepFailure>,
    pub selection: Option<Selection>,
    /// Selected artifact; empty when the phase failed.
    pub artifact: String,
    pub generator_attempts: u32,
}

/// Borrowed phase data every worker context is built from.
struct PhaseScope<'a> {
    phase: &'a Phase,
    inputs: &'a BTreeMap<String, String>,
    prior: Vec<(String, String)>,
}

impl<'a> PhaseScope<'a> {
    fn context<'b>(
        &'b self,
        iteration: u32,
        artifact: Option<&'b str>,
        critique: Option<&'b Critique>,
        feedback: Vec<String>,
    ) -> WorkerContext<'b> {
        WorkerContext {
            phase: &self.phase.name,
            guidance: self.phase.guidance.as_deref(),
            shape: self.phase.shape,
            iteration,
            inputs: self.inputs,
            prior_outputs: self
                .prior
                .iter()
                .map(|(phase, artifact)| PriorOutput { phase, artifact })
                .collect(),
            artifact,
            critique,
            feedback,
        }
    }
}

/// Mutable bookkeeping for one `run_phase` call.
struct PhaseRun<'f, F> {
    phase: String,
    sequence: u32,
    failures: Vec<StepFailure>,
    on_worker: &'f mut F,
}

impl<F: FnMut(&WorkerRecord)> PhaseRun<'_, F> {
    fn emit(&mut self, iteration: u32, result: WorkerResult) {
        let record = WorkerRecord {
            phase: self.phase.clone(),
            candidate: None,
            sequence: self.sequence,
            iteration,
            result,
        };
        self.sequence += 1;
        (self.on_worker)(&record);
    }

    /// Record a failed worker run. Recoverable failures come back as their
    /// kind; anything that must stop the run comes back as `Err`.
    fn fail(
        &mut self,
        iteration: u32,
        role: WorkerRole,
        err: WorkerError,
    ) -> Result<FailureKind, RunError> {
        let kind = match &err {
            WorkerError::Validation { .. } => FailureKind::Validation,
            WorkerError::Extraction { .. } => FailureKind::Extraction,
            WorkerError::Call(CallError::RetriesExhausted { .. }) => FailureKind::RetriesExhausted,
            WorkerError::Call(CallError::Fatal(message)) => {
                return Err(RunError::Fatal {
                    phase: self.phase.clone(),
                    message: message.clone(),
                });
            }
            WorkerError::Call(CallError::Cancelled) => return Err(RunError::Cancelled),
            WorkerError::Prompt { .. } => {
                return Err(RunError::Prompt {
                    phase: self.phase.clone(),
                    message: err.to_string(),
                });
            }
        };
        warn!(
            phase = %self.phase,
            iteration,
            role = role.as_str(),
            error = %err,
            "worker step failed"
        );
        self.emit(iteration, WorkerResult::failed(role, &err));
        self.failures.push(StepFailure {
            iteration,
            role,
            kind,
            message: err.to_string(),
        });
        Ok(kind)
    }
}

/// Runs phases against one caller, prompt builder, and worker set.
pub struct CycleController<'a, G, S, P: ?Sized> {
    caller: &'a ResilientCaller<G, S>,
    prompts: &'a P,
    workers: &'a Workers,
    config: CycleConfig,
    scorer: &'a (dyn VersionScorer + Sync),
}

impl<'a, G, S, P> CycleController<'a, G, S, P>
where
    G: TextGenerator,
    S: Sleeper,
    P: PromptBuilder + ?Sized,
{
    pub fn new(caller: &'a ResilientCaller<G, S>, prompts: &'a P, workers: &'a Workers) -> Self {
        Self {
            caller,
            prompts,
            workers,
            config: CycleConfig::default(),
            scorer: &StructuralScorer::DEFAULT,
        }
    }

    pub fn with_config(mut self, config: CycleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_scorer(mut self, scorer: &'a (dyn VersionScorer + Sync)) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn caller(&self) -> &ResilientCaller<G, S> {
        self.caller
    }

    pub fn scorer(&self) -> &(dyn VersionScorer + Sync) {
        self.scorer
    }

    fn check_cancelled(&self) -> Result<(), RunError> {
        if self.caller.cancel_flag().is_cancelled() {
            info!("run cancelled");
            return Err(RunError::Cancelled);
        }
        Ok(())
    }

    /// Run `phase` to completion.
    ///
    /// Writes the phase's version history and bumps the global iteration
    /// count; recording the phase output is left to the sequencer. Step
    /// failures are absorbed into the report. Only fatal generation errors,
    /// prompt errors, and cancellation return `Err`.
    #[instrument(skip_all, fields(phase = %phase.name))]
    pub fn run_phase<F>(
        &self,
        phase: &Phase,
        inputs: &BTreeMap<String, String>,
        state: &mut WorkflowState,
        on_worker: &mut F,
    ) -> Result<PhaseReport, RunError>
    where
        F: FnMut(&WorkerRecord),
    {
        let name = phase.name.as_str();
        state.reset_phase_history(name);
        let scope = PhaseScope {
            phase,
            inputs,
            prior: state
                .prior_outputs()
                .map(|(phase, artifact)| (phase.to_string(), artifact.to_string()))
                .collect(),
        };
        let mut run = PhaseRun {
            phase: name.to_string(),
            sequence: 0,
            failures: Vec::new(),
            on_worker,
        };
        info!(max_iterations = phase.max_iterations, "phase started");

        // INITIAL_GENERATION
        let mut generator_attempts = 0u32;
        let mut feedback = Vec::new();
        let mut initial = None;
        while generator_attempts <= self.config.generator_retries {
            self.check_cancelled()?;
            generator_attempts += 1;
            let context = scope.context(0, None, None, feedback.clone());
            match self.workers.generator.run(self.caller, self.prompts, &context) {
                Ok(draft) => {
                    initial = Some(draft.body.clone());
                    run.emit(0, WorkerResult::completed(WorkerOutput::Generator(draft)));
                    break;
                }
                Err(err) => {
                    feedback = match &err {
                        WorkerError::Validation { violations, .. } => violations.clone(),
                        WorkerError::Extraction { missing, .. } => missing
                            .iter()
                            .map(|field| format!("missing section: {field}"))
                            .collect(),
                        _ => Vec::new(),
                    };
                    if run.fail(0, WorkerRole::Generator, err)? == FailureKind::RetriesExhausted {
                        break;
                    }
                }
            }
        }

        let Some(initial) = initial else {
            warn!(generator_attempts, "no valid initial artifact, phase failed");
            return Ok(PhaseReport {
                phase: name.to_string(),
                status: PhaseStatus::Failed,
                iterations: 0,
                history: Vec::new(),
                critiques: Vec::new(),
                failures: run.failures,
                selection: None,
                artifact: String::new(),
                generator_attempts,
            });
        };
        state.push_version(
            name,
            Version {
                iteration: 0,
                producer: WorkerRole::Generator,
                content: initial,
            },
        );

        let mut iteration = 0u32;
        let mut critiques: Vec<CritiqueRecord> = Vec::new();
        let status = loop {
            self.check_cancelled()?;
            let history = state.history(name);
            let latest_index = history.len() - 1;
            let latest = history[latest_index].content.clone();

            // CRITIQUE
            let context = scope.context(iteration, Some(&latest), None, Vec::new());
            let critique = match self.workers.critic.run(self.caller, self.prompts, &context) {
                Ok(critique) => {
                    let output = WorkerOutput::Critic(critique.clone());
                    run.emit(iteration, WorkerResult::completed(output));
                    critique
                }
                Err(err) => {
                    let raw_text = err.raw_text().unwrap_or_default().to_string();
                    let kind = run.fail(iteration, WorkerRole::Critic, err)?;
                    if kind == FailureKind::RetriesExhausted {
                        break PhaseStatus::FellBack;
                    }
                    // An unusable critique never counts as done.
                    Critique {
                        raw_text,
                        assessment: Severity::worst(),
                        assessment_recognized: false,
                        recommendations: Vec::new(),
                    }
                }
            };
            debug!(iteration, assessment = %critique.assessment, "critique recorded");
            let converged =
                critique.assessment_recognized && phase.is_terminal(critique.assessment);
            critiques.push(CritiqueRecord {
                version: latest_index,
                critique,
            });
            if converged {
                break PhaseStatus::Converged;
            }
            if iteration >= phase.max_iterations {
                break PhaseStatus::BudgetExhausted;
            }

            // REFINE
            iteration += 1;
            let critique = critiques.last().map(|record| &record.critique);
            let context = scope.context(iteration, Some(&latest), critique, Vec::new());
            match self.workers.refiner.run(self.caller, self.prompts, &context) {
                Ok(Draft { body, raw_text }) => {
                    state.push_version(
                        name,
                        Version {
                            iteration,
                            producer: WorkerRole::Refiner,
                            content: body.clone(),
                        },
                    );
                    run.emit(
                        iteration,
                        WorkerResult::completed(WorkerOutput::Refiner(Draft { body, raw_text })),
                    );
                }
                Err(err) => {
                    let kind = run.fail(iteration, WorkerRole::Refiner, err)?;
                    if kind == FailureKind::RetriesExhausted {
                        break PhaseStatus::FellBack;
                    }
                    debug!(iteration, "refinement rejected, keeping previous version");
                }
            }
            if iteration >= phase.max_iterations {
                break PhaseStatus::BudgetExhausted;
            }
        };

        let history = state.history(name).to_vec();
        let selection = select_version(
            &history,
            &critiques,
            &phase.terminal_assessments,
            self.scorer,
        );
        let artifact = selection
            .map(|selection| history[selection.index].content.clone())
            .unwrap_or_default();
        state.global_iteration_count += iteration;
        info!(
            status = status.as_str(),
            iterations = iteration,
            versions = history.len(),
            selected = ?selection.map(|selection| selection.index),
            "phase finished"
        );

        Ok(PhaseReport {
            phase: name.to_string(),
            status,
            iterations: iteration,
            history,
            critiques,
            failures: run.failures,
            selection,
            artifact,
            generator_attempts,
        })
    }
}
