//! Workflow configuration stored at `.converge/config.toml`.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::agents::{CriticAgent, GeneratorAgent, RefinerAgent, Workers};
use crate::core::assessment::Severity;
use crate::core::backoff::RetryPolicy;
use crate::core::contracts::OutlineRules;
use crate::core::types::{ArtifactShape, Phase};
use crate::io::check_path_segment;
use crate::io::generation::{CommandSpec, GenerationOptions};

/// Workflow configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to the
/// values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Refine rounds allowed per phase unless the phase overrides it.
    pub max_iterations_per_phase: u32,
    /// Total generation calls per step, including the first.
    pub max_retry_attempts: u32,
    pub backoff_base_seconds: f64,
    pub backoff_max_seconds: f64,
    pub backoff_jitter_seconds: f64,
    /// Assessments that end a phase unless the phase overrides them.
    pub terminal_assessments: Vec<Severity>,
    /// Extra generator attempts after a rejected initial draft.
    pub generator_retries: u32,
    pub min_sections: usize,
    pub max_sections: usize,
    pub backend: BackendConfig,
    pub models: ModelsConfig,
    pub phases: Vec<PhaseConfig>,
}

/// Command used to reach the text-generation service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    /// Program and args; the prompt is written to stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Exit codes treated as non-retryable.
    pub fatal_exit_codes: Vec<i32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "llm".to_string(),
                "-m".to_string(),
                "{model}".to_string(),
                "-o".to_string(),
                "temperature".to_string(),
                "{temperature}".to_string(),
            ],
            timeout_secs: 10 * 60,
            output_limit_bytes: 200_000,
            fatal_exit_codes: Vec::new(),
        }
    }
}

/// Model options per worker role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelsConfig {
    pub generator: GenerationOptions,
    pub critic: GenerationOptions,
    pub refiner: GenerationOptions,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            generator: GenerationOptions::default(),
            critic: GenerationOptions {
                temperature: 0.3,
                ..GenerationOptions::default()
            },
            refiner: GenerationOptions::default(),
        }
    }
}

/// One entry of the ordered phase plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_assessments: Option<Vec<Severity>>,
    #[serde(default)]
    pub shape: ArtifactShape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default = "one")]
    pub candidates: u32,
}

fn one() -> u32 {
    1
}

impl PhaseConfig {
    fn named(name: &str, guidance: &str) -> Self {
        Self {
            name: name.to_string(),
            max_iterations: None,
            terminal_assessments: None,
            shape: ArtifactShape::Outline,
            guidance: Some(guidance.to_string()),
            candidates: 1,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations_per_phase: 2,
            max_retry_attempts: 5,
            backoff_base_seconds: 2.0,
            backoff_max_seconds: 60.0,
            backoff_jitter_seconds: 2.0,
            terminal_assessments: vec![Severity::Excellent, Severity::VeryGood],
            generator_retries: 2,
            min_sections: 3,
            max_sections: 8,
            backend: BackendConfig::default(),
            models: ModelsConfig::default(),
            phases: vec![
                PhaseConfig::named(
                    "framework_integration",
                    "Integrate the framework document into a first outline.",
                ),
                PhaseConfig::named(
                    "literature_mapping",
                    "Map the relevant literature onto the outline's sections.",
                ),
                PhaseConfig::named(
                    "content_development",
                    "Develop the argument within each section.",
                ),
                PhaseConfig::named(
                    "structural_validation",
                    "Check the outline's structure and flow end to end.",
                ),
            ],
        }
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|err| anyhow!("{name} must be a non-negative number of seconds ({err})"))
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retry_attempts == 0 {
            return Err(anyhow!("max_retry_attempts must be > 0"));
        }
        self.retry_policy()?;
        if self.backoff_max_seconds < self.backoff_base_seconds {
            return Err(anyhow!("backoff_max_seconds must be >= backoff_base_seconds"));
        }
        if self.terminal_assessments.is_empty() {
            return Err(anyhow!("terminal_assessments must not be empty"));
        }
        if self.min_sections == 0 || self.min_sections > self.max_sections {
            return Err(anyhow!("min_sections must be > 0 and <= max_sections"));
        }
        if self.backend.command.is_empty() || self.backend.command[0].trim().is_empty() {
            return Err(anyhow!("backend.command must be a non-empty array"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        if self.backend.output_limit_bytes == 0 {
            return Err(anyhow!("backend.output_limit_bytes must be > 0"));
        }
        if self.phases.is_empty() {
            return Err(anyhow!("phases must list at least one phase"));
        }
        let mut names = HashSet::new();
        for phase in &self.phases {
            check_path_segment("phase name", &phase.name)?;
            if !names.insert(phase.name.as_str()) {
                return Err(anyhow!("duplicate phase '{}'", phase.name));
            }
            if phase.candidates == 0 {
                return Err(anyhow!("phase '{}': candidates must be > 0", phase.name));
            }
            if phase
                .terminal_assessments
                .as_ref()
                .is_some_and(Vec::is_empty)
            {
                return Err(anyhow!(
                    "phase '{}': terminal_assessments must not be empty",
                    phase.name
                ));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy {
            max_attempts: self.max_retry_attempts,
            base_delay: seconds("backoff_base_seconds", self.backoff_base_seconds)?,
            max_delay: seconds("backoff_max_seconds", self.backoff_max_seconds)?,
            max_jitter: seconds("backoff_jitter_seconds", self.backoff_jitter_seconds)?,
        })
    }

    pub fn outline_rules(&self) -> OutlineRules {
        OutlineRules {
            min_sections: self.min_sections,
            max_sections: self.max_sections,
        }
    }

    /// Resolve the phase plan, applying workflow-level defaults.
    pub fn phase_plan(&self) -> Vec<Phase> {
        let default_terminal: BTreeSet<Severity> =
            self.terminal_assessments.iter().copied().collect();
        self.phases
            .iter()
            .map(|phase| Phase {
                name: phase.name.clone(),
                max_iterations: phase.max_iterations.unwrap_or(self.max_iterations_per_phase),
                terminal_assessments: phase
                    .terminal_assessments
                    .as_ref()
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_else(|| default_terminal.clone()),
                shape: phase.shape,
                guidance: phase.guidance.clone(),
                candidates: phase.candidates,
            })
            .collect()
    }

    pub fn workers(&self) -> Workers {
        Workers {
            generator: GeneratorAgent::new(self.models.generator.clone(), self.outline_rules()),
            critic: CriticAgent::new(self.models.critic.clone()),
            refiner: RefinerAgent::new(self.models.refiner.clone()),
        }
    }

    pub fn command_spec(&self) -> CommandSpec {
        CommandSpec {
            command: self.backend.command.clone(),
            timeout: Duration::from_secs(self.backend.timeout_secs),
            output_limit_bytes: self.backend.output_limit_bytes,
            fatal_exit_codes: self.backend.fatal_exit_codes.clone(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WorkflowConfig::default()`.
pub fn load_config(path: &Path) -> Result<WorkflowConfig> {
    if !path.exists() {
        let cfg = WorkflowConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WorkflowConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &WorkflowConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
