//! Error types for facilitator routing.
//!
//! The taxonomy follows the layers a request passes through:
//!
//! - [`FacilitatorError`]: one upstream reply with a non-200 status.
//! - [`CallError`]: anything a single call can fail with, including the
//!   timeout and circuit-breaker layers. Retried inside the resilience policy.
//! - [`FacilitatorFailedError`]: the terminal outcome of one attempt against
//!   one facilitator, after the policy gave up.
//! - [`AllFacilitatorsFailedError`]: returned to the caller when no attempt
//!   succeeded, listing every attempt in order.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::proto::PaymentMethod;

/// Boxed error used at trait seams (transports, sinks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An upstream facilitator answered with a status other than `200 OK`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("facilitator {facilitator} responded with HTTP {status}: {body}")]
pub struct FacilitatorError {
    /// Facilitator id.
    pub facilitator: String,
    /// HTTP status of the reply.
    pub status: StatusCode,
    /// Error body: the reply's JSON object, or `{"raw": <text>}` otherwise.
    pub body: Value,
    /// Response headers, normalized with [`normalize_headers`].
    pub headers: BTreeMap<String, String>,
}

impl FacilitatorError {
    /// Builds the error from a raw upstream reply.
    #[must_use]
    pub fn from_reply(
        facilitator: impl Into<String>,
        status: StatusCode,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Self {
        Self {
            facilitator: facilitator.into(),
            status,
            body: error_body(body),
            headers: normalize_headers(headers),
        }
    }
}

/// Parses a best-effort error body.
///
/// JSON objects are kept as-is; anything else (plain text, HTML, JSON
/// scalars or arrays) is wrapped as `{"raw": "<text>"}`.
#[must_use]
pub fn error_body(body: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => value,
        _ => serde_json::json!({ "raw": String::from_utf8_lossy(body) }),
    }
}

/// Flattens a header map into sorted lower-case name → value pairs.
///
/// Repeated headers are joined with `", "`. Non-UTF-8 values are decoded lossily.
#[must_use]
pub fn normalize_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut normalized = BTreeMap::<String, String>::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        normalized
            .entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    normalized
}

/// Failure to exchange bytes with a facilitator (DNS, TLS, connection reset, ...).
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    /// Creates a transport error with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transport error wrapping an underlying cause.
    #[must_use]
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Everything a single call through the resilience pipeline can fail with.
///
/// The retry layer treats every variant as retryable.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The facilitator answered with a non-200 status.
    #[error(transparent)]
    Upstream(#[from] FacilitatorError),

    /// The request could not be sent or the reply could not be read.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The facilitator answered 200 with a body that is not a valid response.
    #[error("unexpected {method} response: {message}")]
    InvalidResponse {
        /// Method whose response shape was expected.
        method: PaymentMethod,
        /// Parse error description.
        message: String,
    },

    /// The call did not finish within the configured timeout.
    #[error("timed out after {}ms", .after.as_millis())]
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The circuit breaker rejected the call without contacting the facilitator.
    #[error("circuit breaker is open")]
    CircuitOpen,
}

impl CallError {
    /// Short machine-readable classification, recorded as the event's `errorType`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Upstream(_) => "http_status",
            Self::Transport(_) => "transport",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Timeout { .. } => "timeout",
            Self::CircuitOpen => "circuit_open",
        }
    }

    /// Returns the upstream reply error, if this is one.
    #[must_use]
    pub const fn as_upstream(&self) -> Option<&FacilitatorError> {
        match self {
            Self::Upstream(err) => Some(err),
            _ => None,
        }
    }
}

/// One attempt against one facilitator failed after its resilience policy was exhausted.
#[derive(Debug, thiserror::Error)]
#[error("{facilitator} {method} failed: {source}")]
pub struct FacilitatorFailedError {
    /// Facilitator id.
    pub facilitator: String,
    /// Method that was attempted.
    pub method: PaymentMethod,
    /// The terminal error of the attempt.
    #[source]
    pub source: CallError,
}

impl FacilitatorFailedError {
    /// Human-readable failure message, without the facilitator prefix.
    #[must_use]
    pub fn message(&self) -> String {
        self.source.to_string()
    }
}

/// One entry of [`AllFacilitatorsFailedError::errors`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedAttempt {
    /// Facilitator id (or the id the caller asked for).
    pub facilitator: String,
    /// Why the attempt failed.
    pub error: String,
}

impl FailedAttempt {
    /// Creates an entry.
    #[must_use]
    pub fn new(facilitator: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            facilitator: facilitator.into(),
            error: error.into(),
        }
    }
}

impl From<&FacilitatorFailedError> for FailedAttempt {
    fn from(err: &FacilitatorFailedError) -> Self {
        Self::new(err.facilitator.clone(), err.message())
    }
}

/// No facilitator produced a successful response for a request.
///
/// `errors` lists every attempt in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllFacilitatorsFailedError {
    /// Method that was attempted.
    pub method: PaymentMethod,
    /// Per-attempt failures, chronological.
    pub errors: Vec<FailedAttempt>,
}

impl AllFacilitatorsFailedError {
    /// Creates an aggregate with a single entry.
    #[must_use]
    pub fn single(method: PaymentMethod, attempt: FailedAttempt) -> Self {
        Self {
            method,
            errors: vec![attempt],
        }
    }
}

impl fmt::Display for AllFacilitatorsFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all facilitators failed to {}", self.method)?;
        for (i, attempt) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{}: {}", attempt.facilitator, attempt.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AllFacilitatorsFailedError {}

/// Facilitator lookup or selection failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The id is not a whitelisted, resolvable facilitator.
    #[error("facilitator not found: {0}")]
    NotFound(String),

    /// Round-robin selection on a registry without facilitators.
    #[error("no facilitators configured")]
    Empty,
}

/// Misuse of a [`RequestContext`](crate::context::RequestContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The validated payment snapshot may only be set once per request.
    #[error("request context already holds a validated payment")]
    AlreadyValidated,
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_error_body_keeps_objects_and_wraps_the_rest() {
        assert_eq!(error_body(br#"{"error":"bad"}"#), json!({"error": "bad"}));
        assert_eq!(error_body(b"Bad Gateway"), json!({"raw": "Bad Gateway"}));
        assert_eq!(error_body(b"[1,2]"), json!({"raw": "[1,2]"}));
    }

    #[test]
    fn test_headers_are_lowercased_and_joined() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Request-Id", HeaderValue::from_static("abc"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let normalized = normalize_headers(&headers);
        assert_eq!(normalized["x-request-id"], "abc");
        assert_eq!(normalized["set-cookie"], "a=1, b=2");
    }

    #[test]
    fn test_aggregate_display_lists_attempts_in_order() {
        let err = AllFacilitatorsFailedError {
            method: PaymentMethod::Settle,
            errors: vec![
                FailedAttempt::new("a", "timed out after 10ms"),
                FailedAttempt::new("b", "circuit breaker is open"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "all facilitators failed to settle: a: timed out after 10ms; b: circuit breaker is open"
        );
    }

    #[test]
    fn test_call_error_kinds() {
        assert_eq!(CallError::CircuitOpen.kind(), "circuit_open");
        assert_eq!(
            CallError::Timeout {
                after: Duration::from_millis(5)
            }
            .to_string(),
            "timed out after 5ms"
        );
    }
}
