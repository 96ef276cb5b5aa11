// Resilience Layer - bounded retry and per-resource circuit breaking
//
// Every remote call the automation engine makes (SMS gateway, SMTP) goes
// through this module so a failing downstream channel degrades gracefully
// instead of cascading failures across concurrent workflow runs.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use retry::{retry, ResilienceError, RetryPolicy};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Holds one circuit breaker per named external resource.
///
/// Constructed once at process start and passed by reference to every
/// component that performs remote calls. Breakers for different resources
/// are fully independent: one channel's failures never throttle another.
pub struct ResilienceRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    config: BreakerConfig,
}

impl ResilienceRegistry {
    pub fn new() -> Self {
        Self::with_config(BreakerConfig::default())
    }

    pub fn with_config(config: BreakerConfig) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Get or create the breaker for a named resource.
    pub fn breaker(&self, resource: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker registry poisoned");
        breakers
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(resource, self.config.clone())))
            .clone()
    }

    /// Run `op` through the named breaker with the given retry policy.
    ///
    /// Each attempt checks the breaker first; an OPEN breaker rejects the
    /// call without invoking `op` at all. Exhausting the retry budget
    /// surfaces the last underlying error unchanged.
    pub async fn call<T, E, F, Fut>(
        &self,
        resource: &str,
        policy: &RetryPolicy,
        mut op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let breaker = self.breaker(resource);
        let mut attempt: u32 = 0;

        loop {
            if !breaker.try_acquire() {
                return Err(ResilienceError::CircuitOpen {
                    resource: resource.to_string(),
                });
            }

            match op().await {
                Ok(value) => {
                    breaker.record_success();
                    return Ok(value);
                }
                Err(err) => {
                    breaker.record_failure();
                    if attempt >= policy.max_retries {
                        return Err(ResilienceError::Exhausted(err));
                    }
                    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for ResilienceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
