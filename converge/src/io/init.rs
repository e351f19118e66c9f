//! Scaffolding for the `.converge/` workspace.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use super::config::{WorkflowConfig, write_config};

/// All canonical paths within `.converge/` for a project root.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub converge_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
    pub state_dir: PathBuf,
    pub state_path: PathBuf,
    pub inputs_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub iterations_dir: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let converge_dir = root.join(".converge");
        let state_dir = converge_dir.join("state");
        Self {
            root: root.clone(),
            config_path: converge_dir.join("config.toml"),
            gitignore_path: converge_dir.join(".gitignore"),
            state_path: state_dir.join("workflow_state.json"),
            state_dir,
            inputs_dir: converge_dir.join("inputs"),
            prompts_dir: converge_dir.join("prompts"),
            iterations_dir: converge_dir.join("iterations"),
            converge_dir,
        }
    }

    /// Directory holding worker records for one phase of one run.
    pub fn phase_log_dir(&self, run_id: &str, phase: &str) -> PathBuf {
        self.iterations_dir.join(run_id).join(phase)
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing converge-owned files.
    pub force: bool,
}

/// Create `.converge/` scaffolding in `root`.
///
/// Fails if `.converge/` already exists unless `options.force` is set.
/// Forcing rewrites the config and placeholders but keeps saved state.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<WorkspacePaths> {
    let paths = WorkspacePaths::new(root);
    if paths.converge_dir.exists() && !paths.converge_dir.is_dir() {
        return Err(anyhow!("converge init: .converge exists but is not a directory"));
    }
    if paths.converge_dir.exists() && !options.force {
        return Err(anyhow!(
            "converge init: .converge already exists (use --force to overwrite)"
        ));
    }

    for dir in [
        &paths.converge_dir,
        &paths.state_dir,
        &paths.inputs_dir,
        &paths.prompts_dir,
        &paths.iterations_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    write_file(&paths.gitignore_path, CONVERGE_GITIGNORE)?;
    write_config(&paths.config_path, &WorkflowConfig::default())?;
    write_file(&paths.inputs_dir.join("framework.md"), FRAMEWORK_PLACEHOLDER)?;
    debug!(root = %root.display(), force = options.force, "workspace initialized");

    Ok(paths)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const FRAMEWORK_PLACEHOLDER: &str =
    "# Framework\n\nDescribe the framework every phase should build on.\n";
const CONVERGE_GITIGNORE: &str = "state/\niterations/\n";
