// src/retry.rs
//! Bounded retry with exponential backoff, applied uniformly to summarization
//! and publishing.

use std::future::Future;
use std::time::Duration;

use crate::error::ExternalError;

/// Decides whether a failed attempt is worth repeating.
pub type RetryPredicate = fn(&ExternalError) -> bool;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 act as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            retryable: ExternalError::is_transient,
        }
    }
}

/// Final failure after the policy gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    pub attempts: u32,
    pub error: ExternalError,
}

impl std::fmt::Display for Exhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempt(s))", self.error, self.attempts)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, given that `attempt` (1-based) failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<(T, u32), Exhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(v) => return Ok((v, attempt)),
                Err(e) => {
                    if attempt >= max || !(self.retryable)(&e) {
                        return Err(Exhausted { attempts: attempt, error: e });
                    }
                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        target: "retry",
                        op = label,
                        attempt,
                        ?delay,
                        error = %e,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
