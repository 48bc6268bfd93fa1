//! Bounded retry with exponential backoff for remote store calls.

use crate::error::{RetryExhausted, StoreError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// How often and how patiently a remote operation is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Adds up to 25% random delay on top of each backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the `retry`-th retry (1-based).
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let capped = self
            .initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff);

        if self.jitter && !capped.is_zero() {
            let jitter_range = capped.as_millis() as u64 / 4;
            let jitter = rand::rng().random_range(0..=jitter_range);
            capped.saturating_add(Duration::from_millis(jitter))
        } else {
            capped
        }
    }
}

/// Runs `operation` until it succeeds or `policy.max_attempts` is reached.
///
/// Every attempt after the first is announced with `[attempt/max] description`.
/// On exhaustion the last error is returned unchanged inside [`RetryExhausted`].
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    description: &str,
    mut operation: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if attempt > 1 {
            warn!(attempt, max_attempts, "[{attempt}/{max_attempts}] {description}");
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(source) if attempt >= max_attempts => {
                return Err(RetryExhausted {
                    description: description.to_string(),
                    attempts: attempt,
                    source,
                });
            }
            Err(e) => {
                let backoff = policy.backoff_duration(attempt);
                warn!(
                    operation = description,
                    attempt,
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "Remote operation failed, backing off"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
