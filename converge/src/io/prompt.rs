//! Prompt construction for worker roles.
//!
//! The core only depends on [`PromptBuilder`]; prompt text is opaque to it.
//! [`TemplatePrompts`] renders minijinja templates embedded in the binary,
//! optionally overridden per role by `<role>.md` files in a prompts directory.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, Value, context};
use tracing::debug;

use crate::agents::WorkerContext;
use crate::core::contracts::OutlineRules;
use crate::core::types::{ArtifactShape, WorkerRole};

const GENERATOR_TEMPLATE: &str = include_str!("prompts/generator.md");
const CRITIC_TEMPLATE: &str = include_str!("prompts/critic.md");
const REFINER_TEMPLATE: &str = include_str!("prompts/refiner.md");

const ROLES: [WorkerRole; 3] = [WorkerRole::Generator, WorkerRole::Critic, WorkerRole::Refiner];

/// Turns a worker context into prompt text. Must be free of side effects.
pub trait PromptBuilder {
    fn build(&self, role: WorkerRole, context: &WorkerContext<'_>) -> Result<String>;
}

/// Template-backed prompt builder.
pub struct TemplatePrompts {
    env: Environment<'static>,
    overrides: HashMap<WorkerRole, String>,
    rules: OutlineRules,
}

impl TemplatePrompts {
    /// Builder using only the embedded templates.
    pub fn embedded(rules: OutlineRules) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("generator", GENERATOR_TEMPLATE)
            .context("load generator template")?;
        env.add_template("critic", CRITIC_TEMPLATE)
            .context("load critic template")?;
        env.add_template("refiner", REFINER_TEMPLATE)
            .context("load refiner template")?;
        Ok(Self {
            env,
            overrides: HashMap::new(),
            rules,
        })
    }

    /// Embedded templates, replaced by `<dir>/<role>.md` where such a file exists.
    pub fn with_overrides(dir: &Path, rules: OutlineRules) -> Result<Self> {
        let mut prompts = Self::embedded(rules)?;
        for role in ROLES {
            let path = dir.join(format!("{}.md", role.as_str()));
            if !path.is_file() {
                continue;
            }
            let source = fs::read_to_string(&path)
                .with_context(|| format!("read prompt template {}", path.display()))?;
            // Fail at load time rather than mid-run.
            prompts
                .env
                .template_from_str(&source)
                .with_context(|| format!("parse prompt template {}", path.display()))?;
            debug!(role = role.as_str(), path = %path.display(), "using prompt override");
            prompts.overrides.insert(role, source);
        }
        Ok(prompts)
    }

    fn render(&self, role: WorkerRole, ctx: Value) -> Result<String> {
        let rendered = match self.overrides.get(&role) {
            Some(source) => self.env.render_str(source, ctx)?,
            None => self.env.get_template(role.as_str())?.render(ctx)?,
        };
        Ok(rendered)
    }
}

fn shape_name(shape: ArtifactShape) -> &'static str {
    match shape {
        ArtifactShape::Outline => "outline",
        ArtifactShape::Prose => "prose",
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|s| !s.is_empty())
}

impl PromptBuilder for TemplatePrompts {
    fn build(&self, role: WorkerRole, input: &WorkerContext<'_>) -> Result<String> {
        let critique = input.critique;
        let ctx = context! {
            phase => input.phase,
            guidance => non_empty(input.guidance),
            shape => shape_name(input.shape),
            iteration => input.iteration,
            inputs => input.inputs,
            prior_outputs => &input.prior_outputs,
            artifact => input.artifact.map(str::trim),
            assessment => critique.map(|c| c.assessment.as_str()),
            recommendations => critique.map(|c| c.recommendations.clone()).unwrap_or_default(),
            critique_text => critique.and_then(|c| non_empty(Some(c.raw_text.as_str()))),
            feedback => &input.feedback,
            min_sections => self.rules.min_sections,
            max_sections => self.rules.max_sections,
        };
        self.render(role, ctx)
            .with_context(|| format!("render {role} prompt"))
    }
}
