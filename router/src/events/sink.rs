use std::fmt::Debug;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{DedupKey, FacilitatorEvent};
use crate::error::BoxError;

/// Failure to persist an event.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct SinkError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl SinkError {
    /// Creates a sink error with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a sink error wrapping an underlying cause.
    #[must_use]
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Destination of analytics events.
///
/// A sink treats a later event with the same [`FacilitatorEvent::dedup_key`]
/// as replacing the earlier one.
#[async_trait]
pub trait EventSink: Debug + Send + Sync {
    /// Persists one event.
    async fn insert(&self, event: &FacilitatorEvent) -> Result<(), SinkError>;
}

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn insert(&self, event: &FacilitatorEvent) -> Result<(), SinkError> {
        tracing::info!(
            target: "x402_router::events",
            request_id = %event.request_id,
            event_type = event.event_type.as_str(),
            facilitator = %event.facilitator_name,
            method = %event.method,
            status_code = event.status_code,
            duration_ms = event.duration_ms,
            error_type = event.error_type.as_deref(),
            "Facilitator event"
        );
        Ok(())
    }
}

/// Keeps events in memory, replacing earlier events with the same dedup key.
#[derive(Debug, Default)]
pub struct InMemorySink {
    events: Mutex<Vec<FacilitatorEvent>>,
}

impl InMemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored events in first-insert order.
    #[must_use]
    pub fn events(&self) -> Vec<FacilitatorEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The stored event for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &DedupKey) -> Option<FacilitatorEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| &e.dedup_key() == key)
            .cloned()
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no event is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSink for InMemorySink {
    async fn insert(&self, event: &FacilitatorEvent) -> Result<(), SinkError> {
        let key = event.dedup_key();
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        match events.iter_mut().find(|e| e.dedup_key() == key) {
            Some(existing) => *existing = event.clone(),
            None => events.push(event.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::events::{AttemptOutcome, EventType};
    use crate::proto::PaymentMethod;
    use std::time::Duration;

    #[tokio::test]
    async fn test_in_memory_sink_is_last_write_wins() {
        let sink = InMemorySink::new();
        let ctx = RequestContext::new(None, None);
        let first = FacilitatorEvent::new(
            &ctx,
            EventType::Failure,
            AttemptOutcome::new("a", PaymentMethod::Verify, Duration::from_millis(1)),
        );
        let second = FacilitatorEvent::new(
            &ctx,
            EventType::Failure,
            AttemptOutcome::new("a", PaymentMethod::Verify, Duration::from_millis(2)),
        );
        let other = FacilitatorEvent::new(
            &ctx,
            EventType::Failure,
            AttemptOutcome::new("a", PaymentMethod::Settle, Duration::from_millis(3)),
        );

        for event in [&first, &second, &other] {
            sink.insert(event).await.unwrap();
        }

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.get(&first.dedup_key()).unwrap().duration_ms, 2);
    }

    #[tokio::test]
    async fn test_log_sink_never_fails() {
        let ctx = RequestContext::new(None, None);
        let event = FacilitatorEvent::new(
            &ctx,
            EventType::Success,
            AttemptOutcome::new("a", PaymentMethod::Settle, Duration::ZERO).status(200),
        );
        assert!(LogSink.insert(&event).await.is_ok());
    }
}
