//! Analytics events, one per facilitator attempt.
//!
//! The [`EventRecorder`] turns an [`AttemptOutcome`] plus the request's
//! [`RequestContext`] into an immutable [`FacilitatorEvent`] and hands it to
//! an [`EventSink`] in the background. Recording never blocks or fails the
//! request that produced the event.

mod recorder;
mod sink;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use recorder::{EventRecorder, EventsConfig};
pub use sink::{EventSink, InMemorySink, LogSink, SinkError};

use crate::context::RequestContext;
use crate::proto::PaymentMethod;
use crate::timestamp::UnixMillis;

/// Outcome class of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// The facilitator returned a valid 200 response.
    Success,
    /// The attempt failed after its resilience policy was exhausted.
    Failure,
}

impl EventType {
    /// Lowercase name, as serialized.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Key under which a sink deduplicates events: later writes replace earlier ones.
pub type DedupKey = (Uuid, EventType, String, PaymentMethod);

/// The persisted record of one attempt.
///
/// ```json
/// {
///   "requestId": "6f1c...",
///   "eventType": "failure",
///   "facilitatorName": "payai",
///   "method": "settle",
///   "statusCode": 502,
///   "durationMs": 812,
///   "errorBody": { "raw": "Bad Gateway" },
///   "errorType": "http_status",
///   "responseHeaders": { "content-type": "text/plain" },
///   "metadata": { "error": "..." },
///   "paymentPayload": { ... },
///   "paymentRequirements": { ... },
///   "clientIp": "203.0.113.7",
///   "userAgent": "curl/8.5.0",
///   "requestCreatedAt": 1760781600000,
///   "createdAt": 1760781600812
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorEvent {
    /// The request's event id.
    pub request_id: Uuid,
    /// Success or failure.
    pub event_type: EventType,
    /// Facilitator id.
    pub facilitator_name: String,
    /// Method attempted.
    pub method: PaymentMethod,
    /// HTTP status of the final reply, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Wall time of the whole attempt, retries included.
    pub duration_ms: u64,
    /// Error body of the final non-200 reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_body: Option<Value>,
    /// Error classification, see [`CallError::kind`](crate::error::CallError::kind).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Normalized headers of the final reply.
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    /// Context attributes merged with attempt metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Validated payment payload snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_payload: Option<Value>,
    /// Validated payment requirements snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_requirements: Option<Value>,
    /// Client IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
    /// Client user agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// When the client request started.
    pub request_created_at: UnixMillis,
    /// When the event was built.
    pub created_at: UnixMillis,
}

impl FacilitatorEvent {
    /// Builds an event from the request context and an attempt outcome.
    ///
    /// Outcome metadata wins over context attributes on key collisions.
    #[must_use]
    pub fn new(ctx: &RequestContext, event_type: EventType, outcome: AttemptOutcome) -> Self {
        let mut metadata = ctx.attributes().clone();
        metadata.extend(outcome.metadata);
        let validated = ctx.validated();
        Self {
            request_id: ctx.event_id(),
            event_type,
            facilitator_name: outcome.facilitator,
            method: outcome.method,
            status_code: outcome.status_code,
            duration_ms: u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
            error_body: outcome.error_body,
            error_type: outcome.error_type,
            response_headers: outcome.response_headers,
            metadata,
            payment_payload: validated.map(|v| v.payload.clone()),
            payment_requirements: validated.map(|v| v.requirements.clone()),
            client_ip: ctx.client_ip(),
            user_agent: ctx.user_agent().map(str::to_owned),
            request_created_at: ctx.created_at(),
            created_at: UnixMillis::now(),
        }
    }

    /// The sink's last-write-wins key.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        (
            self.request_id,
            self.event_type,
            self.facilitator_name.clone(),
            self.method,
        )
    }
}

/// Attempt-specific fields of an event.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    /// Facilitator id.
    pub facilitator: String,
    /// Method attempted.
    pub method: PaymentMethod,
    /// Final HTTP status, if any reply was received.
    pub status_code: Option<u16>,
    /// Attempt duration.
    pub duration: Duration,
    /// Final error body.
    pub error_body: Option<Value>,
    /// Error classification.
    pub error_type: Option<String>,
    /// Final reply headers.
    pub response_headers: BTreeMap<String, String>,
    /// Event-specific metadata.
    pub metadata: Map<String, Value>,
}

impl AttemptOutcome {
    /// An outcome with only the mandatory fields set.
    #[must_use]
    pub fn new(facilitator: impl Into<String>, method: PaymentMethod, duration: Duration) -> Self {
        Self {
            facilitator: facilitator.into(),
            method,
            status_code: None,
            duration,
            error_body: None,
            error_type: None,
            response_headers: BTreeMap::new(),
            metadata: Map::new(),
        }
    }

    /// Sets the HTTP status.
    #[must_use]
    pub const fn status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Sets the response headers.
    #[must_use]
    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.response_headers = headers;
        self
    }

    /// Sets the error classification and body.
    #[must_use]
    pub fn error(mut self, error_type: impl Into<String>, body: Option<Value>) -> Self {
        self.error_type = Some(error_type.into());
        self.error_body = body;
        self
    }

    /// Adds one metadata entry.
    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
