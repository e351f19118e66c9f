//! Test-only collaborators: scripted generators, recording sleepers, canned replies.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use crate::agents::WorkerContext;
use crate::caller::{ResilientCaller, Sleeper};
use crate::cancel::CancelFlag;
use crate::core::assessment::Severity;
use crate::core::backoff::RetryPolicy;
use crate::core::types::{ArtifactShape, WorkerRole};
use crate::io::generation::{GenerationError, GenerationRequest, TextGenerator};
use crate::io::init::{InitOptions, WorkspacePaths, init_workspace};
use crate::io::prompt::PromptBuilder;

type Reply = Result<String, GenerationError>;

/// Generator that replays a queue of canned replies in call order.
///
/// Once the queue is empty it returns `fallback`, or a fatal error when none is set.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    queue: Mutex<VecDeque<Reply>>,
    fallback: Option<Reply>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            queue: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub fn replies(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn always(reply: Reply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().expect("queue lock").len()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Reply {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let next = self.queue.lock().expect("queue lock").pop_front();
        next.or_else(|| self.fallback.clone()).unwrap_or_else(|| {
            Err(GenerationError::Fatal(
                "scripted generator exhausted".to_string(),
            ))
        })
    }
}

/// Generator backed by a closure; useful when calls may interleave across threads.
pub struct FnGenerator<F>(pub F);

impl<F> TextGenerator for FnGenerator<F>
where
    F: Fn(&GenerationRequest) -> Reply,
{
    fn generate(&self, request: &GenerationRequest) -> Reply {
        (self.0)(request)
    }
}

/// Sleeper that records requested durations instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("sleeps lock").clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("sleeps lock").push(duration);
    }
}

/// Prompt builder whose first line is `<role> <phase> <iteration>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoPrompts;

impl PromptBuilder for EchoPrompts {
    fn build(&self, role: WorkerRole, context: &WorkerContext<'_>) -> Result<String> {
        let mut prompt = format!("{} {} {}\n", role, context.phase, context.iteration);
        for prior in &context.prior_outputs {
            prompt.push_str(&format!("prior {}: {}\n", prior.phase, prior.artifact));
        }
        for item in &context.feedback {
            prompt.push_str(&format!("feedback: {item}\n"));
        }
        if let Some(artifact) = context.artifact {
            prompt.push_str(artifact);
        }
        Ok(prompt)
    }
}

/// Caller over `generator` with a recording sleeper and a fixed jitter seed.
pub fn scripted_caller<G: TextGenerator>(generator: G) -> ResilientCaller<G, RecordingSleeper> {
    ResilientCaller::with_sleeper(
        generator,
        RecordingSleeper::default(),
        RetryPolicy::default(),
        CancelFlag::new(),
    )
    .with_seed(42)
}

/// Outline body with one `## ` section per title.
pub fn outline(titles: &[&str]) -> String {
    titles
        .iter()
        .map(|title| format!("## {title}\n- point about {}", title.to_lowercase()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Generator/refiner reply carrying `body` under `# Draft`.
pub fn draft_reply(body: &str) -> String {
    format!("# Draft\n{body}\n\n# Notes\nnone\n")
}

/// Critic reply with an assessment and bullet recommendations.
pub fn critique_reply(assessment: Severity, recommendations: &[&str]) -> String {
    let bullets: Vec<String> = recommendations.iter().map(|r| format!("- {r}")).collect();
    format!(
        "# Assessment\n{}\n\n# Recommendations\n{}\n",
        assessment.as_str(),
        bullets.join("\n")
    )
}

/// Minimal context for the `test_phase` phase.
pub fn worker_context(inputs: &BTreeMap<String, String>) -> WorkerContext<'_> {
    WorkerContext {
        phase: "test_phase",
        guidance: None,
        shape: ArtifactShape::Outline,
        iteration: 0,
        inputs,
        prior_outputs: Vec::new(),
        artifact: None,
        critique: None,
        feedback: Vec::new(),
    }
}

/// Temporary directory with an initialized `.converge/` workspace.
pub struct TestWorkspace {
    temp: TempDir,
    paths: WorkspacePaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = init_workspace(temp.path(), &InitOptions { force: false })?;
        Ok(Self { temp, paths })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }
}
