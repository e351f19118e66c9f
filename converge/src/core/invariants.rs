//! Semantic invariants of a saved workflow state not expressible via JSON Schema.

use std::collections::HashSet;

use super::state::WorkflowState;
use super::types::WorkerRole;

/// Check semantic invariants:
/// - `current_phase_index` equals the number of recorded outputs
/// - no phase is recorded twice
/// - each history starts with a generator version and iterations never decrease
/// - only the generator produces iteration 0, and no critic produces versions
pub fn validate_state(state: &WorkflowState) -> Vec<String> {
    let mut errors = Vec::new();

    if state.current_phase_index != state.per_phase_outputs.len() {
        errors.push(format!(
            "current_phase_index {} does not match {} recorded outputs",
            state.current_phase_index,
            state.per_phase_outputs.len()
        ));
    }

    let mut seen = HashSet::new();
    for output in &state.per_phase_outputs {
        if !seen.insert(output.phase.as_str()) {
            errors.push(format!("duplicate output for phase '{}'", output.phase));
        }
    }

    for (phase, history) in &state.version_history {
        if let Some(first) = history.first()
            && first.producer != WorkerRole::Generator
        {
            errors.push(format!("{phase}: history must start with a generator version"));
        }
        for (index, version) in history.iter().enumerate() {
            if version.producer == WorkerRole::Critic {
                errors.push(format!("{phase}[{index}]: critic cannot produce versions"));
            }
            if (version.iteration == 0) != (version.producer == WorkerRole::Generator) {
                errors.push(format!(
                    "{phase}[{index}]: iteration {} inconsistent with producer {}",
                    version.iteration,
                    version.producer.as_str()
                ));
            }
        }
        if history
            .windows(2)
            .any(|pair| pair[1].iteration < pair[0].iteration)
        {
            errors.push(format!("{phase}: iterations must not decrease"));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::PhaseOutput;
    use crate::core::types::{PhaseStatus, Version};

    fn version(iteration: u32, producer: WorkerRole) -> Version {
        Version {
            iteration,
            producer,
            content: "x".to_string(),
        }
    }

    #[test]
    fn fresh_state_is_valid() {
        assert!(validate_state(&WorkflowState::new("run-1")).is_empty());
    }

    #[test]
    fn reports_index_history_and_duplicate_errors() {
        let mut state = WorkflowState::new("run-1");
        let output = PhaseOutput {
            phase: "a".to_string(),
            artifact: String::new(),
            status: PhaseStatus::Failed,
            iterations: 0,
        };
        state.per_phase_outputs = vec![output.clone(), output];
        state.current_phase_index = 1;
        state.version_history.insert(
            "a".to_string(),
            vec![version(1, WorkerRole::Refiner), version(0, WorkerRole::Critic)],
        );

        let errors = validate_state(&state);
        assert!(errors.iter().any(|err| err.contains("current_phase_index")));
        assert!(errors.iter().any(|err| err.contains("duplicate output")));
        assert!(errors.iter().any(|err| err.contains("start with a generator")));
        assert!(errors.iter().any(|err| err.contains("critic cannot")));
        assert!(errors.iter().any(|err| err.contains("must not decrease")));
    }
}
