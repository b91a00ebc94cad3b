//! Hard timeout layer.

use std::future::Future;
use std::time::Duration;

use crate::error::CallError;

/// Bounds a call's duration.
///
/// When the timeout fires the inner future is dropped, which aborts the
/// in-flight HTTP request and releases its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeoutPolicy {
    duration: Option<Duration>,
}

impl TimeoutPolicy {
    /// Creates a timeout policy; `None` disables the timeout.
    #[must_use]
    pub const fn new(duration: Option<Duration>) -> Self {
        Self { duration }
    }

    /// The configured timeout, if any.
    #[must_use]
    pub const fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Awaits `call`, giving up with [`CallError::Timeout`] once the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns the call's own error, or [`CallError::Timeout`].
    pub async fn execute<T, Fut>(&self, call: Fut) -> Result<T, CallError>
    where
        Fut: Future<Output = Result<T, CallError>>,
    {
        match self.duration {
            None => call.await,
            Some(after) => tokio::time::timeout(after, call)
                .await
                .unwrap_or(Err(CallError::Timeout { after })),
        }
    }
}
