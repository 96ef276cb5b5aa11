// Circuit breaker state machine, one instance per named external resource.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally; consecutive failures are counted.
    Closed,
    /// Requests are rejected without reaching the resource.
    Open,
    /// One trial request is allowed through to probe recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial call.
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(15),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// Tracks the health of one logical resource ("sms-sender", "email-sender").
///
/// Shared by every concurrent run that calls the resource, so all state
/// lives behind a mutex. Transitions:
/// Closed --threshold failures--> Open --timeout--> HalfOpen --success--> Closed
/// with any HalfOpen failure returning to Open and restarting the clock.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Ask permission to perform one call.
    ///
    /// Returns false when the breaker is open (and the recovery timeout has
    /// not elapsed) or while a half-open trial is already in flight. When
    /// the timeout has elapsed, the caller becomes the single trial request.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker state poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.recovery_timeout);
                if elapsed >= self.config.recovery_timeout {
                    info!("Circuit '{}' half-open, allowing trial call", self.name);
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker state poisoned");
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                info!("Circuit '{}' closed after successful trial", self.name);
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.last_failure_at = None;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker state poisoned");
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        "Circuit '{}' opened after {} consecutive failures",
                        self.name, inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit '{}' re-opened after failed trial", self.name);
                inner.state = CircuitState::Open;
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker state poisoned").state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().expect("breaker state poisoned").failure_count
    }
}
