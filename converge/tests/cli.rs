//! CLI tests for `converge` commands.
//!
//! Spawns the converge binary against a `sh` backend whose reply depends on
//! the first prompt line, which the prompt overrides set to the worker role.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use converge::exit_codes;
use converge::io::config::{BackendConfig, PhaseConfig, WorkflowConfig, write_config};
use converge::io::init::{InitOptions, WorkspacePaths, init_workspace};
use converge::io::state_store::load_state;

const BACKEND_SCRIPT: &str = r#"read role
case "$role" in
  generator) printf '# Draft\n## Introduction\n- why\n## Argument\n- how\n## Conclusion\n- so\n' ;;
  critic) printf '# Assessment\nEXCELLENT\n\n# Recommendations\n- Keep it\n' ;;
  *) printf '# Draft\nrefined\n' ;;
esac
"#;

fn converge(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_converge"))
        .current_dir(root)
        .args(args)
        .output()
        .expect("spawn converge")
}

fn setup(root: &Path, command: Vec<String>, fatal_exit_codes: Vec<i32>) -> WorkspacePaths {
    let paths = init_workspace(root, &InitOptions { force: false }).expect("init");
    let cfg = WorkflowConfig {
        backend: BackendConfig {
            command,
            timeout_secs: 30,
            fatal_exit_codes,
            ..BackendConfig::default()
        },
        phases: ["outline", "review"]
            .iter()
            .map(|name| PhaseConfig {
                name: name.to_string(),
                max_iterations: Some(1),
                terminal_assessments: None,
                shape: Default::default(),
                guidance: None,
                candidates: 1,
            })
            .collect(),
        ..WorkflowConfig::default()
    };
    write_config(&paths.config_path, &cfg).expect("write config");
    for role in ["generator", "critic", "refiner"] {
        fs::write(
            paths.prompts_dir.join(format!("{role}.md")),
            format!("{role}\n{{{{ phase }}}}\n"),
        )
        .expect("write prompt");
    }
    paths
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

#[test]
fn init_then_validate_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");
    let init = converge(temp.path(), &["init"]);
    assert_eq!(init.status.code(), Some(exit_codes::OK));

    let again = converge(temp.path(), &["init"]);
    assert_eq!(again.status.code(), Some(exit_codes::INVALID));

    let validate = converge(temp.path(), &["validate"]);
    assert_eq!(validate.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&validate.stdout).contains("no saved run"));
}

/// Full run: both phases converge on the first critique.
///
/// Asserts: exit OK, state persisted with both outputs, per-phase table
/// printed, and `status`/`resume` report the finished run.
#[test]
fn run_converges_and_persists_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = setup(temp.path(), sh(BACKEND_SCRIPT), Vec::new());

    let run = converge(temp.path(), &["run", "--run-id", "run-cli"]);
    let stdout = String::from_utf8_lossy(&run.stdout);
    assert_eq!(
        run.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&run.stderr)
    );
    assert!(stdout.contains("run run-cli"));
    assert!(stdout.contains("converged"));

    let state = load_state(&paths.state_path).expect("load state");
    assert_eq!(state.current_phase_index, 2);
    assert!(state.per_phase_outputs[0].artifact.contains("## Argument"));
    assert!(
        paths
            .phase_log_dir("run-cli", "outline")
            .join("000-generator.json")
            .is_file()
    );

    let status = converge(temp.path(), &["status"]);
    assert_eq!(status.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&status.stdout).contains("run run-cli"));

    let resume = converge(temp.path(), &["resume"]);
    assert_eq!(resume.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&resume.stdout).contains("nothing to do"));
}

#[test]
fn fatal_backend_exit_aborts_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = setup(temp.path(), sh("cat >/dev/null; exit 3"), vec![3]);

    let run = converge(temp.path(), &["run", "--run-id", "run-fatal"]);
    assert_eq!(run.status.code(), Some(exit_codes::ABORTED));

    let state = load_state(&paths.state_path).expect("load state");
    assert_eq!(state.current_phase_index, 0);
}

#[test]
fn resume_without_run_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    setup(temp.path(), sh(BACKEND_SCRIPT), Vec::new());

    let resume = converge(temp.path(), &["resume"]);
    assert_eq!(resume.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&resume.stderr).contains("no saved run"));
}
