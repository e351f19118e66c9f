//! Refiner: revises the latest artifact using the latest critique.

use crate::caller::{ResilientCaller, Sleeper};
use crate::core::contracts::check_refined;
use crate::core::extract::extract;
use crate::core::types::WorkerRole;
use crate::io::generation::{GenerationOptions, TextGenerator};
use crate::io::prompt::PromptBuilder;

use super::{DRAFT_FIELD, Draft, WorkerContext, WorkerError, call_model};

#[derive(Debug, Clone, Default)]
pub struct RefinerAgent {
    pub options: GenerationOptions,
}

impl RefinerAgent {
    pub fn new(options: GenerationOptions) -> Self {
        Self { options }
    }

    /// Refine `context.artifact`. An unchanged or empty draft is a contract failure.
    pub fn run<G, S, P>(
        &self,
        caller: &ResilientCaller<G, S>,
        prompts: &P,
        context: &WorkerContext<'_>,
    ) -> Result<Draft, WorkerError>
    where
        G: TextGenerator,
        S: Sleeper,
        P: PromptBuilder + ?Sized,
    {
        let raw_text = call_model(WorkerRole::Refiner, &self.options, caller, prompts, context)?;
        let extraction = extract(&raw_text, &[DRAFT_FIELD]);
        let Some(body) = extraction.field(DRAFT_FIELD).map(str::to_string) else {
            return Err(WorkerError::Extraction {
                role: WorkerRole::Refiner,
                missing: extraction.missing,
                raw_text,
            });
        };

        let violations = check_refined(context.artifact.unwrap_or_default(), &body);
        if !violations.is_empty() {
            return Err(WorkerError::Validation {
                role: WorkerRole::Refiner,
                violations,
                raw_text,
            });
        }
        Ok(Draft { body, raw_text })
    }
}
