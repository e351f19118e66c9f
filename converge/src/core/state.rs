//! The single mutable record of a workflow run.
//!
//! Field names are the persisted layout and stay stable across versions so a
//! saved run can be resumed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{PhaseStatus, Version};

/// Final result recorded for one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseOutput {
    pub phase: String,
    /// Selected artifact; empty when the phase failed.
    pub artifact: String,
    pub status: PhaseStatus,
    pub iterations: u32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("phase '{phase}' recorded at index {got}, expected index {expected}")]
    OutOfOrder {
        phase: String,
        expected: usize,
        got: usize,
    },
    #[error("phase '{0}' already has a recorded output")]
    AlreadyRecorded(String),
    #[error("saved run expects phase '{saved}' at index {index}, plan has '{planned}'")]
    PlanMismatch {
        index: usize,
        saved: String,
        planned: String,
    },
}

/// Mutable workflow record. Owned by the phase sequencer; the cycle controller
/// borrows it mutably while a phase runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: String,
    pub current_phase_index: usize,
    /// Phase outputs in phase order; entries are only ever appended.
    pub per_phase_outputs: Vec<PhaseOutput>,
    pub version_history: BTreeMap<String, Vec<Version>>,
    pub global_iteration_count: u32,
}

impl WorkflowState {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            current_phase_index: 0,
            per_phase_outputs: Vec::new(),
            version_history: BTreeMap::new(),
            global_iteration_count: 0,
        }
    }

    pub fn output(&self, phase: &str) -> Option<&PhaseOutput> {
        self.per_phase_outputs.iter().find(|out| out.phase == phase)
    }

    /// `(phase, artifact)` pairs recorded so far, in phase order.
    pub fn prior_outputs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.per_phase_outputs
            .iter()
            .map(|out| (out.phase.as_str(), out.artifact.as_str()))
    }

    pub fn history(&self, phase: &str) -> &[Version] {
        self.version_history
            .get(phase)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Append a version to `phase`'s history and return its index.
    pub fn push_version(&mut self, phase: &str, version: Version) -> usize {
        let history = self.version_history.entry(phase.to_string()).or_default();
        history.push(version);
        history.len() - 1
    }

    /// Drop any partial history left for `phase` by an interrupted attempt.
    pub fn reset_phase_history(&mut self, phase: &str) {
        self.version_history.remove(phase);
    }

    /// Record a finished phase and advance `current_phase_index`.
    ///
    /// Outputs must arrive in phase order and a phase is recorded once.
    pub fn record_phase(&mut self, index: usize, output: PhaseOutput) -> Result<(), StateError> {
        if self.output(&output.phase).is_some() {
            return Err(StateError::AlreadyRecorded(output.phase));
        }
        if index != self.per_phase_outputs.len() || index != self.current_phase_index {
            return Err(StateError::OutOfOrder {
                phase: output.phase,
                expected: self.per_phase_outputs.len(),
                got: index,
            });
        }
        self.per_phase_outputs.push(output);
        self.current_phase_index = index + 1;
        Ok(())
    }

    /// Check that recorded outputs are a prefix of `plan`.
    pub fn check_plan(&self, plan: &[&str]) -> Result<(), StateError> {
        for (index, output) in self.per_phase_outputs.iter().enumerate() {
            match plan.get(index) {
                Some(planned) if *planned == output.phase => {}
                planned => {
                    return Err(StateError::PlanMismatch {
                        index,
                        saved: output.phase.clone(),
                        planned: planned.copied().unwrap_or("<none>").to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::WorkerRole;

    fn output(phase: &str) -> PhaseOutput {
        PhaseOutput {
            phase: phase.to_string(),
            artifact: format!("{phase} artifact"),
            status: PhaseStatus::Converged,
            iterations: 1,
        }
    }

    #[test]
    fn outputs_are_recorded_in_order() {
        let mut state = WorkflowState::new("run-1");
        state.record_phase(0, output("a")).expect("a");
        state.record_phase(1, output("b")).expect("b");
        assert_eq!(state.current_phase_index, 2);
        let names: Vec<&str> = state.prior_outputs().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn duplicate_and_out_of_order_outputs_are_rejected() {
        let mut state = WorkflowState::new("run-1");
        state.record_phase(0, output("a")).expect("a");
        assert_eq!(
            state.record_phase(1, output("a")),
            Err(StateError::AlreadyRecorded("a".to_string()))
        );
        assert!(matches!(
            state.record_phase(3, output("c")),
            Err(StateError::OutOfOrder { expected: 1, got: 3, .. })
        ));
        assert_eq!(state.per_phase_outputs.len(), 1);
    }

    #[test]
    fn history_is_appended_per_phase() {
        let mut state = WorkflowState::new("run-1");
        let version = Version {
            iteration: 0,
            producer: WorkerRole::Generator,
            content: "v0".to_string(),
        };
        assert_eq!(state.push_version("a", version.clone()), 0);
        assert_eq!(state.push_version("a", version), 1);
        assert_eq!(state.history("a").len(), 2);
        assert!(state.history("b").is_empty());
    }

    #[test]
    fn plan_mismatch_is_detected() {
        let mut state = WorkflowState::new("run-1");
        state.record_phase(0, output("a")).expect("a");
        assert!(state.check_plan(&["a", "b"]).is_ok());
        assert!(matches!(
            state.check_plan(&["b"]),
            Err(StateError::PlanMismatch { index: 0, .. })
        ));
    }
}
