//! Phase Sequencer: runs the phase plan in order, carrying earlier outputs
//! forward as shared context.
//!
//! A phase that fails still records an (empty) output so later phases run and
//! the run ends with a best-effort artifact per phase.

use std::collections::BTreeMap;

use tracing::{info, instrument, warn};

use crate::caller::Sleeper;
use crate::candidates::{choose_candidate, develop_candidates, merge_candidate};
use crate::core::state::{PhaseOutput, WorkflowState};
use crate::core::types::{Phase, PhaseStatus};
use crate::cycle::{CycleController, PhaseReport, RunError, WorkerRecord};
use crate::io::generation::TextGenerator;
use crate::io::prompt::PromptBuilder;

/// Summary of one `run_sequence` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceOutcome {
    pub run_id: String,
    /// Index of the first phase run by this call.
    pub started_at: usize,
    /// Reports for the phases run by this call, in order.
    pub reports: Vec<PhaseReport>,
}

impl SequenceOutcome {
    /// True when some phase ended without converging.
    pub fn is_partial(&self) -> bool {
        self.reports
            .iter()
            .any(|report| report.status != PhaseStatus::Converged)
    }
}

/// Run every phase of `plan` not yet recorded in `state`.
///
/// Resumes at `state.current_phase_index`; recorded outputs must match the
/// plan's prefix. `on_phase` runs after each phase is recorded (e.g. to
/// persist the state); its error stops the run.
#[instrument(skip_all, fields(run_id = %state.run_id, phases = plan.len()))]
pub fn run_sequence<G, S, P, W, Q>(
    controller: &CycleController<'_, G, S, P>,
    plan: &[Phase],
    inputs: &BTreeMap<String, String>,
    state: &mut WorkflowState,
    mut on_worker: W,
    mut on_phase: Q,
) -> Result<SequenceOutcome, RunError>
where
    G: TextGenerator + Sync,
    S: Sleeper + Sync,
    P: PromptBuilder + Sync + ?Sized,
    W: FnMut(&WorkerRecord),
    Q: FnMut(&WorkflowState, &PhaseReport) -> Result<(), RunError>,
{
    let names: Vec<&str> = plan.iter().map(|phase| phase.name.as_str()).collect();
    state.check_plan(&names)?;
    let started_at = state.current_phase_index;
    if started_at > 0 {
        info!(started_at, "resuming run");
    }

    let mut reports = Vec::new();
    for (index, phase) in plan.iter().enumerate().skip(started_at) {
        let report = if phase.candidates > 1 {
            run_candidates(controller, phase, inputs, state, &mut on_worker)?
        } else {
            controller.run_phase(phase, inputs, state, &mut on_worker)?
        };
        if report.status == PhaseStatus::Failed {
            warn!(phase = %phase.name, "phase failed, recording empty output");
        }

        state.record_phase(
            index,
            PhaseOutput {
                phase: phase.name.clone(),
                artifact: report.artifact.clone(),
                status: report.status,
                iterations: report.iterations,
            },
        )?;
        on_phase(state, &report)?;
        reports.push(report);
    }

    info!(
        phases_run = reports.len(),
        global_iterations = state.global_iteration_count,
        "sequence finished"
    );
    Ok(SequenceOutcome {
        run_id: state.run_id.clone(),
        started_at,
        reports,
    })
}

fn run_candidates<G, S, P, W>(
    controller: &CycleController<'_, G, S, P>,
    phase: &Phase,
    inputs: &BTreeMap<String, String>,
    state: &mut WorkflowState,
    on_worker: &mut W,
) -> Result<PhaseReport, RunError>
where
    G: TextGenerator + Sync,
    S: Sleeper + Sync,
    P: PromptBuilder + Sync + ?Sized,
    W: FnMut(&WorkerRecord),
{
    let mut outcomes = develop_candidates(controller, phase, inputs, state)?;
    for outcome in &outcomes {
        for record in &outcome.records {
            on_worker(record);
        }
    }
    // `phase.candidates > 1`, so there is always a winner.
    let winner = choose_candidate(&outcomes, controller.scorer()).unwrap_or_default();
    merge_candidate(state, &outcomes[winner]);
    Ok(outcomes.swap_remove(winner).report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Workers;
    use crate::core::assessment::Severity;
    use crate::test_support::{
        EchoPrompts, ScriptedGenerator, critique_reply, draft_reply, outline, scripted_caller,
    };

    fn valid(extra: &str) -> String {
        outline(&["Introduction", extra, "Conclusion"])
    }

    fn converging(extra: &str) -> [String; 2] {
        [
            draft_reply(&valid(extra)),
            critique_reply(Severity::Excellent, &["Ship it"]),
        ]
    }

    fn scripted(replies: Vec<String>) -> ScriptedGenerator {
        ScriptedGenerator::new(replies.into_iter().map(Ok).collect())
    }

    #[test]
    fn later_phases_see_earlier_outputs() {
        let replies: Vec<String> = converging("First")
            .into_iter()
            .chain(converging("Second"))
            .collect();
        let caller = scripted_caller(scripted(replies));
        let workers = Workers::default();
        let controller = CycleController::new(&caller, &EchoPrompts, &workers);
        let plan = vec![Phase::new("one", 2), Phase::new("two", 2)];
        let mut state = WorkflowState::new("run-1");

        let mut persisted = Vec::new();
        let outcome = run_sequence(
            &controller,
            &plan,
            &BTreeMap::new(),
            &mut state,
            |_| {},
            |state: &WorkflowState, report: &PhaseReport| {
                persisted.push((state.current_phase_index, report.phase.clone()));
                Ok(())
            },
        )
        .expect("sequence");

        assert_eq!(outcome.reports.len(), 2);
        assert!(!outcome.is_partial());
        assert_eq!(persisted, vec![(1, "one".to_string()), (2, "two".to_string())]);
        assert_eq!(state.output("one").map(|o| o.artifact.as_str()), Some(valid("First").as_str()));

        let prompts = caller.generator().prompts();
        assert!(!prompts[0].contains("prior one:"));
        assert!(prompts[2].starts_with("generator two 0"));
        assert!(prompts[2].contains("prior one: ## Introduction"));
    }

    #[test]
    fn failed_phase_records_empty_output_and_continues() {
        let short = draft_reply(&outline(&["Only"]));
        let mut replies = vec![short.clone(), short.clone(), short];
        replies.extend(converging("Second"));
        let caller = scripted_caller(scripted(replies));
        let workers = Workers::default();
        let controller = CycleController::new(&caller, &EchoPrompts, &workers);
        let plan = vec![Phase::new("one", 2), Phase::new("two", 2)];
        let mut state = WorkflowState::new("run-1");

        let outcome = run_sequence(
            &controller,
            &plan,
            &BTreeMap::new(),
            &mut state,
            |_| {},
            |_: &WorkflowState, _: &PhaseReport| Ok(()),
        )
        .expect("sequence");

        assert!(outcome.is_partial());
        let one = state.output("one").expect("one recorded");
        assert_eq!(one.status, PhaseStatus::Failed);
        assert_eq!(one.artifact, "");
        assert_eq!(state.output("two").map(|o| o.status), Some(PhaseStatus::Converged));
    }

    #[test]
    fn resume_skips_recorded_phases() {
        let caller = scripted_caller(scripted(converging("Second").to_vec()));
        let workers = Workers::default();
        let controller = CycleController::new(&caller, &EchoPrompts, &workers);
        let plan = vec![Phase::new("one", 2), Phase::new("two", 2)];
        let mut state = WorkflowState::new("run-1");
        state
            .record_phase(
                0,
                PhaseOutput {
                    phase: "one".to_string(),
                    artifact: "saved".to_string(),
                    status: PhaseStatus::Converged,
                    iterations: 0,
                },
            )
            .expect("record");

        let outcome = run_sequence(
            &controller,
            &plan,
            &BTreeMap::new(),
            &mut state,
            |_| {},
            |_: &WorkflowState, _: &PhaseReport| Ok(()),
        )
        .expect("sequence");

        assert_eq!(outcome.started_at, 1);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(caller.generator().calls(), 2);
        assert!(caller.generator().prompts()[0].contains("prior one: saved"));
    }

    #[test]
    fn resume_rejects_a_different_plan() {
        let caller = scripted_caller(ScriptedGenerator::default());
        let workers = Workers::default();
        let controller = CycleController::new(&caller, &EchoPrompts, &workers);
        let mut state = WorkflowState::new("run-1");
        state
            .record_phase(
                0,
                PhaseOutput {
                    phase: "other".to_string(),
                    artifact: String::new(),
                    status: PhaseStatus::Failed,
                    iterations: 0,
                },
            )
            .expect("record");

        let err = run_sequence(
            &controller,
            &[Phase::new("one", 2)],
            &BTreeMap::new(),
            &mut state,
            |_| {},
            |_: &WorkflowState, _: &PhaseReport| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, RunError::State(_)));
    }

    #[test]
    fn persistence_error_stops_the_run() {
        let replies: Vec<String> = converging("First")
            .into_iter()
            .chain(converging("Second"))
            .collect();
        let caller = scripted_caller(scripted(replies));
        let workers = Workers::default();
        let controller = CycleController::new(&caller, &EchoPrompts, &workers);
        let plan = vec![Phase::new("one", 2), Phase::new("two", 2)];
        let mut state = WorkflowState::new("run-1");

        let err = run_sequence(
            &controller,
            &plan,
            &BTreeMap::new(),
            &mut state,
            |_| {},
            |_: &WorkflowState, _: &PhaseReport| Err(RunError::Persist("disk full".to_string())),
        )
        .unwrap_err();
        assert_eq!(err, RunError::Persist("disk full".to_string()));
        assert_eq!(caller.generator().calls(), 2);
    }
}
