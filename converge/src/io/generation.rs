//! Text-generation backend boundary.
//!
//! The [`TextGenerator`] trait decouples the cycle controller from the actual
//! LLM backend. [`CommandGenerator`] shells out to a configured CLI; tests use
//! scripted generators that return canned text without spawning processes.

use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Per-call model options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub model_id: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model_id: "claude-sonnet".to_string(),
            max_output_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// One call to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub options: GenerationOptions,
}

/// Backend failure, classified by whether a retry can help.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// Rate limits, resets, timeouts, empty responses.
    #[error("transient generation failure: {0}")]
    Transient(String),
    /// Auth failures and permanently rejected requests.
    #[error("fatal generation failure: {0}")]
    Fatal(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

/// Abstraction over text-generation backends.
pub trait TextGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

impl<T: TextGenerator + ?Sized> TextGenerator for &T {
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        (**self).generate(request)
    }
}

/// Backend settings for [`CommandGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program and args; `{model}`, `{max_tokens}`, `{temperature}` are substituted.
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// Exit codes that mean "do not retry".
    pub fatal_exit_codes: Vec<i32>,
}

/// Generator that pipes the prompt to a CLI and reads the reply from stdout.
pub struct CommandGenerator {
    spec: CommandSpec,
}

const FATAL_STDERR_MARKERS: &[&str] = &[
    "invalid api key",
    "authentication",
    "unauthorized",
    "permission denied",
    "invalid_request_error",
];

impl CommandGenerator {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    fn build_command(&self, options: &GenerationOptions) -> Result<Command, GenerationError> {
        let (program, args) = self
            .spec
            .command
            .split_first()
            .ok_or_else(|| GenerationError::Fatal("backend command is empty".to_string()))?;
        let mut cmd = Command::new(program);
        for arg in args {
            cmd.arg(substitute(arg, options));
        }
        Ok(cmd)
    }
}

fn substitute(arg: &str, options: &GenerationOptions) -> String {
    arg.replace("{model}", &options.model_id)
        .replace("{max_tokens}", &options.max_output_tokens.to_string())
        .replace("{temperature}", &options.temperature.to_string())
}

impl TextGenerator for CommandGenerator {
    #[instrument(skip_all, fields(model = %request.options.model_id, prompt_bytes = request.prompt.len()))]
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let cmd = self.build_command(&request.options)?;
        let output = match run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.spec.timeout,
            self.spec.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => {
                if is_spawn_error(&err) {
                    return Err(GenerationError::Fatal(format!("{err:#}")));
                }
                return Err(GenerationError::Transient(format!("{err:#}")));
            }
        };
        classify_output(&output, &self.spec.fatal_exit_codes)
    }
}

fn is_spawn_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.to_string() == "spawn command")
}

/// Map a finished process to a reply or a classified failure.
pub fn classify_output(
    output: &CommandOutput,
    fatal_exit_codes: &[i32],
) -> Result<String, GenerationError> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.timed_out {
        warn!("generation backend timed out");
        return Err(GenerationError::Transient("backend timed out".to_string()));
    }
    if !output.status.success() {
        let code = output.status.code();
        let detail = format!("backend exited with {:?}: {}", code, stderr.trim());
        let lowered = stderr.to_lowercase();
        let fatal_code = code.is_some_and(|code| fatal_exit_codes.contains(&code));
        if fatal_code || FATAL_STDERR_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Err(GenerationError::Fatal(detail));
        }
        return Err(GenerationError::Transient(detail));
    }
    if output.stdout_truncated > 0 {
        warn!(
            stdout_truncated = output.stdout_truncated,
            "backend reply exceeded output limit"
        );
        return Err(GenerationError::Transient(format!(
            "output truncated: {} bytes over the limit",
            output.stdout_truncated
        )));
    }
    let reply = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if reply.is_empty() {
        return Err(GenerationError::Transient("empty response".to_string()));
    }
    debug!(reply_bytes = reply.len(), "backend replied");
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(command: &[&str]) -> CommandSpec {
        CommandSpec {
            command: command.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
            fatal_exit_codes: vec![3],
        }
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            options: GenerationOptions::default(),
        }
    }

    #[test]
    fn placeholders_are_substituted() {
        let options = GenerationOptions {
            model_id: "m1".to_string(),
            max_output_tokens: 12,
            temperature: 0.5,
        };
        assert_eq!(substitute("--model={model}", &options), "--model=m1");
        assert_eq!(substitute("{max_tokens}/{temperature}", &options), "12/0.5");
    }

    #[cfg(unix)]
    #[test]
    fn echoes_prompt_through_cat() {
        let generator = CommandGenerator::new(spec(&["cat"]));
        let reply = generator.generate(&request("  hello  ")).expect("reply");
        assert_eq!(reply, "hello");
    }

    #[cfg(unix)]
    #[test]
    fn empty_reply_is_transient() {
        let generator = CommandGenerator::new(spec(&["sh", "-c", "cat >/dev/null"]));
        let err = generator.generate(&request("x")).expect_err("empty");
        assert_eq!(err, GenerationError::Transient("empty response".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn exit_codes_are_classified() {
        let generator = CommandGenerator::new(spec(&["sh", "-c", "cat >/dev/null; exit 1"]));
        assert!(generator.generate(&request("x")).expect_err("fail").is_transient());

        let generator = CommandGenerator::new(spec(&["sh", "-c", "cat >/dev/null; exit 3"]));
        assert!(!generator.generate(&request("x")).expect_err("fail").is_transient());

        let generator = CommandGenerator::new(spec(&[
            "sh",
            "-c",
            "cat >/dev/null; echo 'Error: invalid API key' >&2; exit 1",
        ]));
        assert!(!generator.generate(&request("x")).expect_err("fail").is_transient());
    }

    /// Verifies a reply cut off at the output limit is never returned as text.
    ///
    /// Asserts: transient error naming the truncation, so the caller retries.
    #[cfg(unix)]
    #[test]
    fn truncated_reply_is_transient() {
        let mut spec = spec(&[
            "sh",
            "-c",
            "cat >/dev/null; printf '# Draft\\n## Introduction\\n## Body\\n## Conclusion of the full argument'",
        ]);
        spec.output_limit_bytes = 40;
        let generator = CommandGenerator::new(spec);
        let err = generator.generate(&request("x")).expect_err("truncated");
        assert!(err.is_transient());
        assert!(err.to_string().contains("output truncated"), "{err}");
    }

    #[test]
    fn missing_binary_is_fatal() {
        let generator = CommandGenerator::new(spec(&["definitely-not-a-real-binary-xyz"]));
        let err = generator.generate(&request("x")).expect_err("spawn");
        assert!(!err.is_transient(), "{err}");
    }
}
