//! Validation helpers for the `.converge/` layout, config, and saved state.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::io::config::load_config;
use crate::io::init::WorkspacePaths;
use crate::io::prompt::TemplatePrompts;
use crate::io::state_store::load_state;

/// Saved-run validation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateValidation {
    /// No saved state; no run started yet.
    NotStarted,
    /// Saved state is valid and matches the configured plan.
    Saved {
        run_id: String,
        completed: usize,
        total: usize,
    },
}

/// High-level validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub phases: usize,
    pub state: StateValidation,
}

/// Validate `.converge/` layout, config, prompt overrides, and saved state.
pub fn validate_workspace(root: &Path) -> Result<ValidateOutcome> {
    let paths = WorkspacePaths::new(root);

    ensure_dir(&paths.converge_dir)?;
    ensure_dir(&paths.state_dir)?;
    ensure_dir(&paths.inputs_dir)?;
    ensure_dir(&paths.prompts_dir)?;
    ensure_dir(&paths.iterations_dir)?;
    ensure_file(&paths.config_path)?;
    ensure_file(&paths.gitignore_path)?;
    ensure_gitignore(&paths.gitignore_path)?;

    let cfg = load_config(&paths.config_path).context("load config.toml")?;
    TemplatePrompts::with_overrides(&paths.prompts_dir, cfg.outline_rules())
        .context("load prompt templates")?;
    let plan: Vec<&str> = cfg.phases.iter().map(|phase| phase.name.as_str()).collect();

    if !paths.state_path.exists() {
        return Ok(ValidateOutcome {
            phases: plan.len(),
            state: StateValidation::NotStarted,
        });
    }
    let state = load_state(&paths.state_path).context("load workflow_state.json")?;
    state.check_plan(&plan)?;

    Ok(ValidateOutcome {
        phases: plan.len(),
        state: StateValidation::Saved {
            run_id: state.run_id,
            completed: state.current_phase_index,
            total: plan.len(),
        },
    })
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing directory {}", path.display()));
    }
    if !path.is_dir() {
        return Err(anyhow!("expected directory {}", path.display()));
    }
    Ok(())
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing file {}", path.display()));
    }
    if !path.is_file() {
        return Err(anyhow!("expected file {}", path.display()));
    }
    Ok(())
}

fn ensure_gitignore(path: &Path) -> Result<()> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    for required in ["state/", "iterations/"] {
        if !contents.lines().any(|line| line.trim() == required) {
            return Err(anyhow!("missing '{}' in {}", required, path.display()));
        }
    }
    Ok(())
}
