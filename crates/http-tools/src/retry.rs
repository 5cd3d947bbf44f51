//! Bounded retry with exponential backoff.
//!
//! Attempt `i` (0-indexed) that fails with a retryable error is followed by a sleep of
//! `min(base * 2^i, max)` plus uniform jitter in `[0, 10%]` of that delay. Nothing is slept after
//! the final attempt.

use crate::error::{ExecutorError, Result, TransportKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

/// Upper bound of the jitter, as a fraction of the capped delay.
pub const JITTER_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the initial attempt (0 and 1 both mean no retries).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap applied to the exponential delay (before jitter), in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Response statuses treated as transient.
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: BTreeSet<u16>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_retryable_status_codes() -> BTreeSet<u16> {
    [429, 500, 502, 503, 504].into_iter().collect()
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Capped exponential delay after failed attempt `attempt` (0-indexed), without jitter.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.base_delay_ms);
        let max = Duration::from_millis(self.max_delay_ms);
        let mult = 2u32.saturating_pow(attempt.min(31));
        base.saturating_mul(mult).min(max)
    }

    /// Backoff delay plus a random jitter drawn from `rng`.
    pub fn retry_delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        with_jitter(self.backoff_delay(attempt), rng.gen_range(0.0..=1.0))
    }

    /// Retryable: a status from the configured set, or a connect/timeout transport failure.
    #[must_use]
    pub fn should_retry(&self, err: &ExecutorError) -> bool {
        match err {
            ExecutorError::Status { status, .. } => self.retryable_status_codes.contains(status),
            ExecutorError::Transport { kind, .. } => {
                matches!(kind, TransportKind::Connect | TransportKind::Timeout)
            }
            _ => false,
        }
    }

    /// Drive `attempt_fn` until it succeeds, fails with a non-retryable error, or the attempt
    /// budget is spent (reported as [`ExecutorError::RetriesExhausted`]).
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error unchanged, or `RetriesExhausted` wrapping the last
    /// retryable one.
    pub async fn run<T, F, Fut>(&self, label: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts();
        let mut attempt: u32 = 0;
        loop {
            let err = match attempt_fn(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };

            if !self.should_retry(&err) {
                return Err(err);
            }
            if attempt + 1 >= attempts {
                tracing::warn!("{label}: attempt {}/{attempts} failed: {err}; giving up", attempt + 1);
                return Err(ExecutorError::RetriesExhausted {
                    attempts,
                    last: Box::new(err),
                });
            }

            let delay = {
                let mut rng = rand::thread_rng();
                self.retry_delay(attempt, &mut rng)
            };
            tracing::warn!(
                "{label}: attempt {}/{attempts} failed: {err}; retrying in {:.2}s",
                attempt + 1,
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// `delay` stretched by `unit * JITTER_FRACTION`; `unit` is clamped to `[0, 1]`.
#[must_use]
pub fn with_jitter(delay: Duration, unit: f64) -> Duration {
    delay + delay.mul_f64(JITTER_FRACTION * unit.clamp(0.0, 1.0))
}
