//! Parallel development of independent candidates for one phase.
//!
//! Each candidate runs its own cycle on a scoped thread against a private copy
//! of the workflow state. Only the winner's final history and iteration count
//! are merged back into the shared state.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::panic;
use std::thread;

use tracing::{info, instrument};

use crate::caller::Sleeper;
use crate::core::scoring::VersionScorer;
use crate::core::state::WorkflowState;
use crate::core::types::{Phase, PhaseStatus};
use crate::cycle::{CycleController, PhaseReport, RunError, WorkerRecord};
use crate::io::generation::TextGenerator;
use crate::io::prompt::PromptBuilder;

/// One finished candidate.
#[derive(Debug, Clone)]
pub struct CandidateOutcome {
    pub index: u32,
    pub report: PhaseReport,
    /// Worker records tagged with this candidate's index.
    pub records: Vec<WorkerRecord>,
}

/// Develop `phase.candidates` candidates concurrently.
///
/// Outcomes come back in candidate order. If any candidate hits a fatal error
/// or cancellation, the first such error is returned after all threads join.
#[instrument(skip_all, fields(phase = %phase.name, candidates = phase.candidates))]
pub fn develop_candidates<G, S, P>(
    controller: &CycleController<'_, G, S, P>,
    phase: &Phase,
    inputs: &BTreeMap<String, String>,
    state: &WorkflowState,
) -> Result<Vec<CandidateOutcome>, RunError>
where
    G: TextGenerator + Sync,
    S: Sleeper + Sync,
    P: PromptBuilder + Sync + ?Sized,
{
    let results: Vec<Result<CandidateOutcome, RunError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..phase.candidates)
            .map(|index| {
                scope.spawn(move || -> Result<CandidateOutcome, RunError> {
                    let mut private = state.clone();
                    let mut records = Vec::new();
                    let report = controller.run_phase(
                        phase,
                        inputs,
                        &mut private,
                        &mut |record: &WorkerRecord| {
                            let mut record = record.clone();
                            record.candidate = Some(index);
                            records.push(record);
                        },
                    )?;
                    Ok(CandidateOutcome {
                        index,
                        report,
                        records,
                    })
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
            .collect()
    });
    results.into_iter().collect()
}

/// Index of the best candidate: converged first, then highest score of the
/// selected artifact, then lowest index.
pub fn choose_candidate<V: VersionScorer + ?Sized>(
    outcomes: &[CandidateOutcome],
    scorer: &V,
) -> Option<usize> {
    outcomes
        .iter()
        .enumerate()
        .max_by_key(|(position, outcome)| {
            (
                outcome.report.status == PhaseStatus::Converged,
                scorer.score(&outcome.report.artifact),
                Reverse(*position),
            )
        })
        .map(|(position, _)| position)
}

/// Merge the winning candidate's final result into the shared state.
pub fn merge_candidate(state: &mut WorkflowState, winner: &CandidateOutcome) {
    let phase = winner.report.phase.as_str();
    state.reset_phase_history(phase);
    for version in &winner.report.history {
        state.push_version(phase, version.clone());
    }
    state.global_iteration_count += winner.report.iterations;
    info!(
        phase,
        candidate = winner.index,
        status = winner.report.status.as_str(),
        "candidate merged"
    );
}
