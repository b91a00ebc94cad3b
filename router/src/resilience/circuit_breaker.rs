//! Per-facilitator circuit breaker.
//!
//! When a facilitator fails repeatedly the circuit opens and calls are
//! rejected immediately, without touching the network, until a cooldown
//! elapses. Then a single probe call is let through: success closes the
//! circuit, failure reopens it and restarts the cooldown.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::CallError;

/// Circuit breaker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Global toggle; when false no facilitator gets a breaker.
    pub enabled: bool,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a probe is allowed.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Observable state of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Calls are rejected.
    Open,
    /// A single probe call is in flight.
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    consecutive_failures: u32,
}

/// Circuit breaker guarding one facilitator.
///
/// State transitions and the counter update that triggers them happen under
/// one lock, which is never held across an `.await`.
#[derive(Debug)]
pub struct CircuitBreaker {
    facilitator: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed circuit breaker for `facilitator`.
    #[must_use]
    pub fn new(facilitator: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            facilitator: facilitator.into(),
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown,
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                consecutive_failures: 0,
            }),
        }
    }

    /// Current state. An open circuit whose cooldown has elapsed still reports
    /// [`CircuitState::Open`] until the next call probes it.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        match self.lock().phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// Consecutive failures counted so far.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Asks for permission to make a call.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::CircuitOpen`] while the circuit is open and cooling
    /// down, or while a half-open probe is already in flight.
    pub fn acquire(&self) -> Result<CallPermit<'_>, CallError> {
        let mut inner = self.lock();
        let probe = match inner.phase {
            Phase::Closed => false,
            Phase::HalfOpen => return Err(CallError::CircuitOpen),
            Phase::Open { since } => {
                if since.elapsed() < self.cooldown {
                    return Err(CallError::CircuitOpen);
                }
                inner.phase = Phase::HalfOpen;
                tracing::info!(facilitator = %self.facilitator, "Circuit half-open, allowing probe call");
                true
            }
        };
        Ok(CallPermit {
            breaker: self,
            probe,
            resolved: false,
        })
    }

    /// Runs `call` under this breaker, recording its outcome.
    ///
    /// If the returned future is dropped before `call` completes (for example
    /// by the timeout layer), the call counts as a failure.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::CircuitOpen`] without polling `call` when rejected,
    /// otherwise the call's own error.
    pub async fn call<T, Fut>(&self, call: Fut) -> Result<T, CallError>
    where
        Fut: Future<Output = Result<T, CallError>>,
    {
        let permit = self.acquire()?;
        let result = call.await;
        if result.is_ok() {
            permit.succeed();
        } else {
            permit.fail();
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.lock();
        match inner.phase {
            Phase::HalfOpen if probe => {
                inner.phase = Phase::Closed;
                inner.consecutive_failures = 0;
                tracing::info!(facilitator = %self.facilitator, "Circuit closed after successful probe");
            }
            Phase::Closed if !probe => inner.consecutive_failures = 0,
            // late result of a call admitted before the circuit opened
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.lock();
        match inner.phase {
            Phase::HalfOpen if probe => {
                inner.phase = Phase::Open {
                    since: Instant::now(),
                };
                tracing::warn!(facilitator = %self.facilitator, "Circuit reopened after failed probe");
            }
            Phase::Closed if !probe => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.phase = Phase::Open {
                        since: Instant::now(),
                    };
                    tracing::warn!(
                        facilitator = %self.facilitator,
                        failures = inner.consecutive_failures,
                        cooldown_ms = self.cooldown.as_millis(),
                        "Circuit opened after repeated failures"
                    );
                }
            }
            _ => {}
        }
    }
}

/// Permission to make one call through a [`CircuitBreaker`].
///
/// Resolve it with [`CallPermit::succeed`] or [`CallPermit::fail`]; dropping
/// it unresolved records a failure.
#[derive(Debug)]
#[must_use = "an unresolved permit records a failure when dropped"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl CallPermit<'_> {
    /// Whether this permit is the half-open probe.
    #[must_use]
    pub const fn is_probe(&self) -> bool {
        self.probe
    }

    /// Records a successful call.
    pub fn succeed(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.probe);
    }

    /// Records a failed call.
    pub fn fail(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_failure(self.probe);
        }
    }
}
