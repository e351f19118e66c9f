//! Generator: produces the initial artifact for a phase.

use tracing::debug;

use crate::caller::{ResilientCaller, Sleeper};
use crate::core::contracts::{OutlineRules, check_generated};
use crate::core::extract::extract;
use crate::core::types::WorkerRole;
use crate::io::generation::{GenerationOptions, TextGenerator};
use crate::io::prompt::PromptBuilder;

use super::{DRAFT_FIELD, Draft, WorkerContext, WorkerError, call_model};

#[derive(Debug, Clone, Default)]
pub struct GeneratorAgent {
    pub options: GenerationOptions,
    pub rules: OutlineRules,
}

impl GeneratorAgent {
    pub fn new(options: GenerationOptions, rules: OutlineRules) -> Self {
        Self { options, rules }
    }

    /// Generate a draft and check it against the generator contract.
    ///
    /// A rejected draft is returned as an error and never reaches history.
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
        let raw_text = call_model(WorkerRole::Generator, &self.options, caller, prompts, context)?;
        let extraction = extract(&raw_text, &[DRAFT_FIELD]);
        let Some(body) = extraction.field(DRAFT_FIELD).map(str::to_string) else {
            return Err(WorkerError::Extraction {
                role: WorkerRole::Generator,
                missing: extraction.missing,
                raw_text,
            });
        };

        let violations = check_generated(&body, context.shape, &self.rules);
        if !violations.is_empty() {
            debug!(?violations, "generated draft rejected");
            return Err(WorkerError::Validation {
                role: WorkerRole::Generator,
                violations,
                raw_text,
            });
        }
        Ok(Draft { body, raw_text })
    }
}
