//! Constant-backoff retry layer.

use std::future::Future;
use std::time::Duration;

use crate::error::CallError;

/// Runs an operation up to `max_attempts` times, sleeping `backoff` between attempts.
///
/// Every [`CallError`] is retryable here, including timeouts and open-breaker
/// rejections. When attempts run out, the last error is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Total attempts, including the first one.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay between attempts.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Runs `operation`, passing the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt once all attempts failed.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, CallError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => return Err(err),
                Err(err) => {
                    tracing::debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = self.backoff.as_millis(),
                        error = %err,
                        "Call failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_max_attempts_with_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        let started = tokio::time::Instant::now();
        let result: Result<(), _> = policy
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err(CallError::InvalidResponse {
                        method: crate::proto::PaymentMethod::Verify,
                        message: format!("attempt {attempt}"),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err().to_string(), "unexpected verify response: attempt 3");
        // two backoff sleeps between three attempts
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(10));

        let result = policy
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(CallError::CircuitOpen)
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_rejections_consume_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, Duration::ZERO);

        let result: Result<(), _> = policy
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::CircuitOpen) }
            })
            .await;

        assert!(matches!(result, Err(CallError::CircuitOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }
}
