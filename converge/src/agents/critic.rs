//! Critic: assesses the latest artifact.

use tracing::debug;

use crate::caller::{ResilientCaller, Sleeper};
use crate::core::assessment::{parse_recommendations, resolve_assessment};
use crate::core::contracts::check_critique;
use crate::core::extract::extract;
use crate::core::types::{Critique, WorkerRole};
use crate::io::generation::{GenerationOptions, TextGenerator};
use crate::io::prompt::PromptBuilder;

use super::{WorkerContext, WorkerError, call_model};

#[derive(Debug, Clone, Default)]
pub struct CriticAgent {
    pub options: GenerationOptions,
}

impl CriticAgent {
    pub fn new(options: GenerationOptions) -> Self {
        Self { options }
    }

    /// Critique `context.artifact`.
    ///
    /// The assessment always resolves; a reply without a recognizable
    /// severity token gets the worst severity.
    pub fn run<G, S, P>(
        &self,
        caller: &ResilientCaller<G, S>,
        prompts: &P,
        context: &WorkerContext<'_>,
    ) -> Result<Critique, WorkerError>
    where
        G: TextGenerator,
        S: Sleeper,
        P: PromptBuilder + ?Sized,
    {
        let raw_text = call_model(WorkerRole::Critic, &self.options, caller, prompts, context)?;
        let extraction = extract(&raw_text, &["assessment", "recommendations"]);
        let (assessment, assessment_recognized) = resolve_assessment(&extraction.fields, &raw_text);
        let recommendations = parse_recommendations(&extraction.fields, &raw_text);
        debug!(
            %assessment,
            assessment_recognized,
            recommendations = recommendations.len(),
            "critique parsed"
        );

        let critique = Critique {
            raw_text,
            assessment,
            assessment_recognized,
            recommendations,
        };
        let violations = check_critique(&critique);
        if !violations.is_empty() {
            return Err(WorkerError::Validation {
                role: WorkerRole::Critic,
                violations,
                raw_text: critique.raw_text,
            });
        }
        Ok(critique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assessment::Severity;
    use crate::test_support::{
        EchoPrompts, ScriptedGenerator, critique_reply, scripted_caller, worker_context,
    };

    #[test]
    fn parses_heading_critique() {
        let reply = critique_reply(Severity::VeryGood, &["Sharpen the thesis"]);
        let caller = scripted_caller(ScriptedGenerator::replies(&[reply.as_str()]));
        let inputs = Default::default();
        let critique = CriticAgent::default()
            .run(&caller, &EchoPrompts, &worker_context(&inputs))
            .expect("critique");
        assert_eq!(critique.assessment, Severity::VeryGood);
        assert!(critique.assessment_recognized);
        assert_eq!(critique.recommendations, vec!["Sharpen the thesis".to_string()]);
    }

    #[test]
    fn parses_json_critique() {
        let reply = r#"{"assessment": "MINOR_REFINEMENT", "recommendations": ["Add sources"]}"#;
        let caller = scripted_caller(ScriptedGenerator::replies(&[reply]));
        let inputs = Default::default();
        let critique = CriticAgent::default()
            .run(&caller, &EchoPrompts, &worker_context(&inputs))
            .expect("critique");
        assert_eq!(critique.assessment, Severity::MinorRefinement);
        assert_eq!(critique.recommendations, vec!["Add sources".to_string()]);
    }

    #[test]
    fn unrecognized_assessment_defaults_to_worst() {
        let reply = "# Recommendations\n- Everything";
        let caller = scripted_caller(ScriptedGenerator::replies(&[reply]));
        let inputs = Default::default();
        let critique = CriticAgent::default()
            .run(&caller, &EchoPrompts, &worker_context(&inputs))
            .expect("critique");
        assert_eq!(critique.assessment, Severity::MajorRevision);
        assert!(!critique.assessment_recognized);
    }

    #[test]
    fn missing_recommendations_fail_the_contract() {
        let caller = scripted_caller(ScriptedGenerator::replies(&["# Assessment\nEXCELLENT"]));
        let inputs = Default::default();
        let err = CriticAgent::default()
            .run(&caller, &EchoPrompts, &worker_context(&inputs))
            .expect_err("invalid");
        assert!(matches!(err, WorkerError::Validation { role: WorkerRole::Critic, .. }));
    }
}
