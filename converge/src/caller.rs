//! Resilient Caller: bounded retry with exponential backoff around every
//! generation call.
//!
//! Transient failures are absorbed until the retry budget runs out; fatal
//! failures return immediately. The wait before each retry is logged before
//! sleeping, and cancellation is checked right before each sleep.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancelFlag;
use crate::core::backoff::RetryPolicy;
use crate::io::generation::{GenerationError, GenerationRequest, TextGenerator};

/// Blocking wait between attempts. Injectable so tests never sleep.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Failure surfaced by [`ResilientCaller::invoke`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("fatal generation failure: {0}")]
    Fatal(String),
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("run cancelled")]
    Cancelled,
}

/// Wraps a [`TextGenerator`] with a [`RetryPolicy`].
pub struct ResilientCaller<G, S = ThreadSleeper> {
    generator: G,
    sleeper: S,
    policy: RetryPolicy,
    cancel: CancelFlag,
    rng: Mutex<StdRng>,
}

impl<G: TextGenerator> ResilientCaller<G, ThreadSleeper> {
    pub fn new(generator: G, policy: RetryPolicy, cancel: CancelFlag) -> Self {
        Self::with_sleeper(generator, ThreadSleeper, policy, cancel)
    }
}

impl<G: TextGenerator, S: Sleeper> ResilientCaller<G, S> {
    pub fn with_sleeper(generator: G, sleeper: S, policy: RetryPolicy, cancel: CancelFlag) -> Self {
        Self {
            generator,
            sleeper,
            policy,
            cancel,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Use a fixed jitter seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    fn jitter_fraction(&self) -> f64 {
        // A poisoned lock only costs the jitter.
        self.rng
            .lock()
            .map(|mut rng| rng.gen_range(0.0..1.0))
            .unwrap_or(0.0)
    }

    /// Call the generator, retrying transient failures per the policy.
    pub fn invoke(&self, request: &GenerationRequest) -> Result<String, CallError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match self.generator.generate(request) {
                Ok(text) => {
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "generation succeeded after retry");
                    }
                    debug!(reply_bytes = text.len(), "generation call completed");
                    return Ok(text);
                }
                Err(GenerationError::Fatal(message)) => {
                    warn!(error = %message, "fatal generation failure, not retrying");
                    return Err(CallError::Fatal(message));
                }
                Err(GenerationError::Transient(message)) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        warn!(attempts = attempt, error = %message, "retries exhausted");
                        return Err(CallError::RetriesExhausted {
                            attempts: attempt,
                            last: message,
                        });
                    }
                    if self.cancel.is_cancelled() {
                        info!(attempt, "cancelled before retry");
                        return Err(CallError::Cancelled);
                    }
                    let wait = self.policy.backoff(attempt - 1, self.jitter_fraction());
                    warn!(
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %message,
                        "generation failed, retrying"
                    );
                    self.sleeper.sleep(wait);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::generation::GenerationOptions;
    use crate::test_support::{RecordingSleeper, ScriptedGenerator};

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "p".to_string(),
            options: GenerationOptions::default(),
        }
    }

    fn caller(
        generator: ScriptedGenerator,
        cancel: CancelFlag,
    ) -> ResilientCaller<ScriptedGenerator, RecordingSleeper> {
        ResilientCaller::with_sleeper(
            generator,
            RecordingSleeper::default(),
            RetryPolicy::default(),
            cancel,
        )
        .with_seed(7)
    }

    /// Verifies the retry bound against an always-transient backend.
    ///
    /// Asserts:
    /// - exactly `max_attempts` calls are made
    /// - the error is annotated as retries exhausted
    /// - recorded sleep covers the jitter-free backoff schedule
    #[test]
    fn always_transient_exhausts_retries() {
        let generator = ScriptedGenerator::always(Err(GenerationError::Transient(
            "429 rate limited".to_string(),
        )));
        let caller = caller(generator, CancelFlag::new());

        let err = caller.invoke(&request()).expect_err("exhausted");
        assert_eq!(
            err,
            CallError::RetriesExhausted {
                attempts: 5,
                last: "429 rate limited".to_string()
            }
        );
        assert!(err.to_string().contains("retries exhausted"));
        assert_eq!(caller.generator().calls(), 5);
        let sleeps = caller.sleeper().sleeps();
        assert_eq!(sleeps.len(), 4);
        let total: Duration = sleeps.iter().sum();
        assert!(total >= caller.policy().minimum_total_backoff());
        for (attempt, slept) in sleeps.iter().enumerate() {
            assert!(*slept >= caller.policy().base_backoff(attempt as u32));
        }
    }

    #[test]
    fn fatal_is_not_retried() {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerationError::Fatal("401 unauthorized".to_string())),
            Ok("never reached".to_string()),
        ]);
        let caller = caller(generator, CancelFlag::new());

        let err = caller.invoke(&request()).expect_err("fatal");
        assert_eq!(err, CallError::Fatal("401 unauthorized".to_string()));
        assert_eq!(caller.generator().calls(), 1);
        assert!(caller.sleeper().sleeps().is_empty());
    }

    #[test]
    fn recovers_after_transient_failures() {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerationError::Transient("reset".to_string())),
            Err(GenerationError::Transient("reset".to_string())),
            Ok("done".to_string()),
        ]);
        let caller = caller(generator, CancelFlag::new());

        assert_eq!(caller.invoke(&request()).expect("reply"), "done");
        assert_eq!(caller.generator().calls(), 3);
        assert_eq!(caller.sleeper().sleeps().len(), 2);
    }

    #[test]
    fn cancellation_stops_before_sleeping() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let generator = ScriptedGenerator::always(Err(GenerationError::Transient("x".to_string())));
        let caller = caller(generator, cancel);

        assert_eq!(caller.invoke(&request()), Err(CallError::Cancelled));
        assert_eq!(caller.generator().calls(), 1);
        assert!(caller.sleeper().sleeps().is_empty());
    }
}
