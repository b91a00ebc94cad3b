//! Per-request context shared by every attempt of one client request.

use std::net::IpAddr;
use std::sync::OnceLock;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ContextError;
use crate::timestamp::UnixMillis;

/// The payment payload and requirements a request was validated with.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPayment {
    /// The client's payment payload.
    pub payload: Value,
    /// The payment requirements.
    pub requirements: Value,
}

/// Immutable facts about one client request, used to enrich analytics events.
///
/// Created at request start. The validation step stores the validated
/// payment exactly once via [`RequestContext::set_validated`], before any
/// attempt is made.
#[derive(Debug)]
pub struct RequestContext {
    event_id: Uuid,
    client_ip: Option<IpAddr>,
    user_agent: Option<String>,
    created_at: UnixMillis,
    attributes: Map<String, Value>,
    validated: OnceLock<ValidatedPayment>,
}

impl RequestContext {
    /// Starts a new request context with a fresh event id.
    #[must_use]
    pub fn new(client_ip: Option<IpAddr>, user_agent: Option<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            client_ip,
            user_agent,
            created_at: UnixMillis::now(),
            attributes: Map::new(),
            validated: OnceLock::new(),
        }
    }

    /// Adds a caller attribute that is merged into every event's metadata.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Stores the validated payment snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::AlreadyValidated`] if a snapshot is already stored.
    pub fn set_validated(&self, payload: Value, requirements: Value) -> Result<(), ContextError> {
        self.validated
            .set(ValidatedPayment {
                payload,
                requirements,
            })
            .map_err(|_| ContextError::AlreadyValidated)
    }

    /// Unique id of this request; becomes `requestId` on every event.
    #[must_use]
    pub const fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Client IP address, if known.
    #[must_use]
    pub const fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    /// Client `User-Agent`, if sent.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// When the request started.
    #[must_use]
    pub const fn created_at(&self) -> UnixMillis {
        self.created_at
    }

    /// Caller attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// The validated payment snapshot, once set.
    #[must_use]
    pub fn validated(&self) -> Option<&ValidatedPayment> {
        self.validated.get()
    }
}
