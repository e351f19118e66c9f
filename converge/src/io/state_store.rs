//! Workflow state load/save with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::invariants::validate_state;
use crate::core::state::WorkflowState;

const STATE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/workflow_state.v1.schema.json"
));

/// Load and validate workflow state from disk (schema + invariants).
pub fn load_state(path: &Path) -> Result<WorkflowState> {
    debug!(path = %path.display(), "loading workflow state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse state {}", path.display()))?;
    validate_schema(&value)?;
    let state: WorkflowState = serde_json::from_value(value)
        .with_context(|| format!("deserialize state {}", path.display()))?;
    check_invariants(&state)?;
    debug!(
        run_id = %state.run_id,
        current_phase_index = state.current_phase_index,
        "workflow state loaded"
    );
    Ok(state)
}

/// Atomically write workflow state to disk (temp file + rename).
///
/// Refuses to persist a state that violates its invariants.
pub fn write_state(path: &Path, state: &WorkflowState) -> Result<()> {
    check_invariants(state)?;
    debug!(
        path = %path.display(),
        run_id = %state.run_id,
        current_phase_index = state.current_phase_index,
        "writing workflow state"
    );
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

fn validate_schema(state: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(STATE_SCHEMA).context("parse state schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(state) {
        let messages = compiled
            .iter_errors(state)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "state schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn check_invariants(state: &WorkflowState) -> Result<()> {
    let errors = validate_state(state);
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("state invariants failed: {}", errors.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::PhaseOutput;
    use crate::core::types::{PhaseStatus, Version, WorkerRole};

    fn sample_state() -> WorkflowState {
        let mut state = WorkflowState::new("run-1");
        state.push_version(
            "outline",
            Version {
                iteration: 0,
                producer: WorkerRole::Generator,
                content: "## Introduction".to_string(),
            },
        );
        state.push_version(
            "outline",
            Version {
                iteration: 1,
                producer: WorkerRole::Refiner,
                content: "## Introduction\n## Conclusion".to_string(),
            },
        );
        state
            .record_phase(
                0,
                PhaseOutput {
                    phase: "outline".to_string(),
                    artifact: "## Introduction\n## Conclusion".to_string(),
                    status: PhaseStatus::BudgetExhausted,
                    iterations: 1,
                },
            )
            .expect("record");
        state.global_iteration_count = 1;
        state
    }

    /// Verifies write → load round-trip preserves the whole state.
    #[test]
    fn state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state").join("workflow_state.json");
        let state = sample_state();
        write_state(&path, &state).expect("write");
        assert_eq!(load_state(&path).expect("load"), state);
    }

    /// Verifies load rejects documents that violate the schema.
    ///
    /// Writes a state with an unknown status value, expects a schema error.
    #[test]
    fn load_rejects_schema_violations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("workflow_state.json");
        let mut value = serde_json::to_value(sample_state()).expect("to value");
        value["per_phase_outputs"][0]["status"] = Value::String("done".to_string());
        fs::write(&path, value.to_string()).expect("write");

        let err = load_state(&path).unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
    }

    /// Verifies load rejects schema-valid documents that break invariants.
    #[test]
    fn load_rejects_invariant_violations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("workflow_state.json");
        let mut value = serde_json::to_value(sample_state()).expect("to value");
        value["current_phase_index"] = Value::from(3);
        fs::write(&path, value.to_string()).expect("write");

        let err = load_state(&path).unwrap_err();
        assert!(err.to_string().contains("invariants failed"));
    }

    #[test]
    fn embedded_schema_compiles() {
        let schema: Value = serde_json::from_str(STATE_SCHEMA).expect("parse schema");
        assert!(validator_for(&schema).is_ok());
    }
}
