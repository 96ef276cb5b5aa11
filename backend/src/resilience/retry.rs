// Bounded retry with constant or exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first; the op runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Doubling backoff when true, constant `base_delay` otherwise.
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential: true,
        }
    }
}

impl RetryPolicy {
    pub fn constant(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            exponential: false,
        }
    }

    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            exponential: true,
        }
    }

    /// Sleep before retry number `attempt` (zero-based):
    /// `min(base * 2^attempt, max)` in exponential mode, `base` otherwise.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.exponential {
            let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
            self.base_delay.saturating_mul(factor).min(self.max_delay)
        } else {
            self.base_delay
        }
    }
}

/// Failure modes of a resilience-wrapped call.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The named breaker rejected the call without invoking the operation.
    #[error("circuit '{resource}' is open, call rejected")]
    CircuitOpen { resource: String },
    /// Retries exhausted; carries the final underlying error unchanged.
    #[error("{0}")]
    Exhausted(E),
}

/// Retry `op` up to `max_retries` additional times, sleeping between
/// attempts per the policy. No breaker involved; the last error is
/// surfaced unchanged.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_retries {
                    return Err(err);
                }
                warn!(
                    "Attempt {}/{} failed ({}), retrying",
                    attempt + 1,
                    policy.max_retries + 1,
                    err
                );
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
        }
    }
}
