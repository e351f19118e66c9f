//! Shared deterministic types for the convergence core.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.
//! Serialized names are part of the persisted state layout and must not change.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::assessment::Severity;

/// Role of the worker that produced a version or a critique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    Generator,
    Critic,
    Refiner,
}

impl WorkerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerRole::Generator => "generator",
            WorkerRole::Critic => "critic",
            WorkerRole::Refiner => "refiner",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the artifact a phase develops.
///
/// Outline-shaped artifacts carry extra structural checks on generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactShape {
    #[default]
    Outline,
    Prose,
}

/// One immutable snapshot in a phase's version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Refine round that produced this version (0 for the initial generation).
    pub iteration: u32,
    pub producer: WorkerRole,
    pub content: String,
}

/// Structured assessment of an artifact produced by the critic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    pub raw_text: String,
    pub assessment: Severity,
    /// False when no severity token was found and the fail-safe default applied.
    pub assessment_recognized: bool,
    pub recommendations: Vec<String>,
}

/// A critique tied to the history entry it judged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CritiqueRecord {
    /// Index into the phase's version history.
    pub version: usize,
    pub critique: Critique,
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// A critique reached the phase's terminal assessment set.
    Converged,
    /// The refine budget ran out before convergence.
    BudgetExhausted,
    /// A step exhausted its retries; the previous valid artifact was kept.
    FellBack,
    /// No valid initial artifact could be produced.
    Failed,
}

impl PhaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::Converged => "converged",
            PhaseStatus::BudgetExhausted => "budget_exhausted",
            PhaseStatus::FellBack => "fell_back",
            PhaseStatus::Failed => "failed",
        }
    }
}

/// Kind of a recorded, non-fatal step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Extraction,
    RetriesExhausted,
}

/// A failure recorded against an iteration without aborting the phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub iteration: u32,
    pub role: WorkerRole,
    pub kind: FailureKind,
    pub message: String,
}

/// Static definition of a development phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub name: String,
    pub max_iterations: u32,
    pub terminal_assessments: BTreeSet<Severity>,
    pub shape: ArtifactShape,
    /// Free-form instructions handed to the prompt builder.
    pub guidance: Option<String>,
    /// Number of independent candidates to develop (1 means sequential).
    pub candidates: u32,
}

impl Phase {
    pub fn new(name: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            name: name.into(),
            max_iterations,
            terminal_assessments: Severity::default_terminal_set(),
            shape: ArtifactShape::Outline,
            guidance: None,
            candidates: 1,
        }
    }

    pub fn is_terminal(&self, severity: Severity) -> bool {
        self.terminal_assessments.contains(&severity)
    }
}
