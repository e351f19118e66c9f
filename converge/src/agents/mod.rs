//! Role-tagged workers: Generator, Critic, Refiner.
//!
//! A worker turns a [`WorkerContext`] into a prompt, calls the model through
//! the [`ResilientCaller`], extracts fields, and checks its role contract.
//! Workers never write workflow state; the cycle controller records results.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::caller::{CallError, ResilientCaller, Sleeper};
use crate::core::types::{ArtifactShape, Critique, WorkerRole};
use crate::io::generation::{GenerationOptions, GenerationRequest, TextGenerator};
use crate::io::prompt::PromptBuilder;

pub mod critic;
pub mod generator;
pub mod refiner;

pub use critic::CriticAgent;
pub use generator::GeneratorAgent;
pub use refiner::RefinerAgent;

/// Field that carries the artifact body in generator and refiner replies.
pub const DRAFT_FIELD: &str = "draft";

/// An earlier phase's selected artifact.
#[derive(Debug, Clone, Serialize)]
pub struct PriorOutput<'a> {
    pub phase: &'a str,
    pub artifact: &'a str,
}

/// Read-only view of the current phase handed to a worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerContext<'a> {
    pub phase: &'a str,
    pub guidance: Option<&'a str>,
    pub shape: ArtifactShape,
    pub iteration: u32,
    /// Immutable cross-phase inputs.
    pub inputs: &'a BTreeMap<String, String>,
    pub prior_outputs: Vec<PriorOutput<'a>>,
    /// Latest artifact (critic and refiner).
    pub artifact: Option<&'a str>,
    /// Latest critique (refiner).
    pub critique: Option<&'a Critique>,
    /// Contract violations from the previous rejected attempt.
    pub feedback: Vec<String>,
}

/// Generator or refiner output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Draft {
    pub body: String,
    pub raw_text: String,
}

/// Worker failure that did not come from the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("{role} output failed its contract: {}", .violations.join("; "))]
    Validation {
        role: WorkerRole,
        violations: Vec<String>,
        raw_text: String,
    },
    #[error("{role} output is missing fields: {}", .missing.join(", "))]
    Extraction {
        role: WorkerRole,
        missing: Vec<String>,
        raw_text: String,
    },
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("build {role} prompt: {message}")]
    Prompt { role: WorkerRole, message: String },
}

impl WorkerError {
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            WorkerError::Validation { raw_text, .. } | WorkerError::Extraction { raw_text, .. } => {
                Some(raw_text)
            }
            _ => None,
        }
    }
}

/// Role-specific payload of a completed worker run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WorkerOutput {
    Generator(Draft),
    Critic(Critique),
    Refiner(Draft),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Completed,
    Failed,
}

/// Auditable record of one worker run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerResult {
    pub role: WorkerRole,
    pub status: WorkerStatus,
    pub content: Option<WorkerOutput>,
    pub error: Option<String>,
    pub raw_text: Option<String>,
}

impl WorkerResult {
    pub fn completed(output: WorkerOutput) -> Self {
        let role = match &output {
            WorkerOutput::Generator(_) => WorkerRole::Generator,
            WorkerOutput::Critic(_) => WorkerRole::Critic,
            WorkerOutput::Refiner(_) => WorkerRole::Refiner,
        };
        Self {
            role,
            status: WorkerStatus::Completed,
            content: Some(output),
            error: None,
            raw_text: None,
        }
    }

    pub fn failed(role: WorkerRole, err: &WorkerError) -> Self {
        Self {
            role,
            status: WorkerStatus::Failed,
            content: None,
            error: Some(err.to_string()),
            raw_text: err.raw_text().map(str::to_string),
        }
    }
}

/// The three workers a cycle uses.
#[derive(Debug, Clone, Default)]
pub struct Workers {
    pub generator: GeneratorAgent,
    pub critic: CriticAgent,
    pub refiner: RefinerAgent,
}

/// Build the role prompt and call the model.
pub(crate) fn call_model<G, S, P>(
    role: WorkerRole,
    options: &GenerationOptions,
    caller: &ResilientCaller<G, S>,
    prompts: &P,
    context: &WorkerContext<'_>,
) -> Result<String, WorkerError>
where
    G: TextGenerator,
    S: Sleeper,
    P: PromptBuilder + ?Sized,
{
    let prompt = prompts
        .build(role, context)
        .map_err(|err| WorkerError::Prompt {
            role,
            message: format!("{err:#}"),
        })?;
    let request = GenerationRequest {
        prompt,
        options: options.clone(),
    };
    Ok(caller.invoke(&request)?)
}
