//! Retry policy and exponential backoff schedule.

use std::time::Duration;

/// Bounded retry with exponential backoff and additive jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the uniform jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_jitter: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt `attempt` (0-based), without jitter.
    ///
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay with jitter; `jitter_fraction` is clamped to `[0, 1]`.
    pub fn backoff(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let fraction = jitter_fraction.clamp(0.0, 1.0);
        let jitter = Duration::try_from_secs_f64(self.max_jitter.as_secs_f64() * fraction)
            .map_or(self.max_jitter, |jitter| jitter.min(self.max_jitter));
        self.base_backoff(attempt)
            .saturating_add(jitter)
            .min(self.max_delay)
    }

    /// Sum of jitter-free delays over all retries this policy allows.
    pub fn minimum_total_backoff(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.base_backoff(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}
