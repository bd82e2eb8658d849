//! Retry policy for saga steps: bounded attempts with exponential backoff.

use rand::Rng;
use std::time::Duration;

/// Bounded-attempt retry with exponential backoff and optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` disables retries.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_interval: Duration,

    /// Ceiling on the computed delay.
    pub max_interval: Duration,

    /// Multiplier applied per attempt.
    pub backoff_factor: f64,

    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Defaults with a custom attempt count.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            jitter: false,
            ..Self::default()
        }
    }

    /// Fully explicit policy without jitter.
    pub fn exponential(
        max_attempts: u32,
        initial_interval: Duration,
        max_interval: Duration,
        backoff_factor: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_interval,
            max_interval,
            backoff_factor,
            jitter: false,
        }
    }

    /// Delay before the retry following `attempt` (1-indexed).
    ///
    /// `initial_interval * backoff_factor^(attempt - 1)`, capped at
    /// `max_interval`, plus 0-25% jitter when enabled.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let scaled = self.initial_interval.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = scaled.min(self.max_interval.as_secs_f64());

        let final_delay = if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.0..0.25);
            capped * (1.0 + jitter_factor)
        } else {
            capped
        };

        Duration::from_secs_f64(final_delay)
    }
}
