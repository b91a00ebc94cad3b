//! Per-facilitator resilience pipeline.
//!
//! Three independent layers are composed from outermost to innermost as
//! **retry ⊃ timeout ⊃ circuit breaker ⊃ call**:
//!
//! - [`RetryPolicy`] re-runs the whole inner pipeline with a constant backoff.
//! - [`TimeoutPolicy`] bounds each try and aborts the in-flight call on expiry.
//! - [`CircuitBreaker`] (optional) rejects calls while the facilitator is
//!   considered down.
//!
//! [`ResiliencePolicy`] either yields the call's success or one terminal
//! [`CallError`] once retries are spent; nothing above it retries again.

mod circuit_breaker;
mod retry;
mod timeout;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::RetryPolicy;
pub use timeout::TimeoutPolicy;

use crate::error::CallError;

/// Resilience settings applied to every facilitator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResilienceConfig {
    /// Per-try timeout; `None` disables it.
    pub timeout: Option<Duration>,
    /// Total tries per attempt, including the first.
    pub max_attempts: u32,
    /// Constant delay between tries.
    pub backoff: Duration,
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(10)),
            max_attempts: 3,
            backoff: Duration::from_millis(250),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// The composed retry, timeout and circuit-breaker policy of one facilitator.
#[derive(Debug, Clone)]
pub struct ResiliencePolicy {
    facilitator: Arc<str>,
    retry: RetryPolicy,
    timeout: TimeoutPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl ResiliencePolicy {
    /// Composes a policy from explicit layers.
    #[must_use]
    pub fn new(
        facilitator: impl Into<Arc<str>>,
        retry: RetryPolicy,
        timeout: TimeoutPolicy,
        breaker: Option<Arc<CircuitBreaker>>,
    ) -> Self {
        Self {
            facilitator: facilitator.into(),
            retry,
            timeout,
            breaker,
        }
    }

    /// Builds the policy for `facilitator` from shared settings.
    ///
    /// A breaker is attached only when breakers are enabled globally and
    /// `breaker_override` is not `Some(false)`.
    #[must_use]
    pub fn from_config(
        facilitator: &str,
        config: &ResilienceConfig,
        breaker_override: Option<bool>,
    ) -> Self {
        let with_breaker = config.circuit_breaker.enabled && breaker_override != Some(false);
        let breaker = with_breaker
            .then(|| Arc::new(CircuitBreaker::new(facilitator, &config.circuit_breaker)));
        Self::new(
            facilitator,
            RetryPolicy::new(config.max_attempts, config.backoff),
            TimeoutPolicy::new(config.timeout),
            breaker,
        )
    }

    /// The facilitator's circuit breaker, if it has one.
    #[must_use]
    pub const fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// The retry layer.
    #[must_use]
    pub const fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The timeout layer.
    #[must_use]
    pub const fn timeout(&self) -> &TimeoutPolicy {
        &self.timeout
    }

    /// Runs `call` through the pipeline. `call` is invoked once per try and
    /// must produce a fresh future each time.
    ///
    /// # Errors
    ///
    /// Returns the error of the last try once all tries failed.
    pub async fn execute<T, F, Fut>(&self, mut call: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let breaker = self.breaker.as_deref();
        let timeout = &self.timeout;
        self.retry
            .execute(move |_attempt| timeout.execute(guarded(breaker, call())))
            .instrument(tracing::debug_span!("resilience", facilitator = %self.facilitator))
            .await
    }
}

async fn guarded<T, Fut>(breaker: Option<&CircuitBreaker>, call: Fut) -> Result<T, CallError>
where
    Fut: Future<Output = Result<T, CallError>>,
{
    match breaker {
        Some(breaker) => breaker.call(call).await,
        None => call.await,
    }
}
