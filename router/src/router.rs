//! Entry point: route one verify or settle request across facilitators.
//!
//! Two modes:
//!
//! - **Explicit**: the caller names a facilitator. Exactly one attempt is made
//!   and the round-robin cursor is left alone.
//! - **Auto**: no id, or [`AUTO_FACILITATOR_ID`]. Facilitators are picked
//!   round-robin and tried until one succeeds, for at most
//!   [`RouterConfig::max_facilitator_attempts`] attempts. The same facilitator
//!   may be picked twice when there are fewer facilitators than attempts.

use std::sync::Arc;

use serde_json::Value;

use crate::context::RequestContext;
use crate::error::{AllFacilitatorsFailedError, FailedAttempt};
use crate::executor::AttemptExecutor;
use crate::proto::PaymentMethod;
use crate::registry::{AUTO_FACILITATOR_ID, FacilitatorRegistry};

/// Router settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Upper bound on attempts in auto mode.
    pub max_facilitator_attempts: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_facilitator_attempts: 3,
        }
    }
}

/// Routes payment requests to facilitators.
#[derive(Debug, Clone)]
pub struct FacilitatorRouter {
    registry: Arc<FacilitatorRegistry>,
    executor: AttemptExecutor,
    max_attempts: usize,
}

impl FacilitatorRouter {
    /// Creates a router. `max_facilitator_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(registry: Arc<FacilitatorRegistry>, executor: AttemptExecutor, config: RouterConfig) -> Self {
        Self {
            registry,
            executor,
            max_attempts: config.max_facilitator_attempts.max(1),
        }
    }

    /// The facilitators routed to.
    #[must_use]
    pub const fn registry(&self) -> &Arc<FacilitatorRegistry> {
        &self.registry
    }

    /// The attempt executor.
    #[must_use]
    pub const fn executor(&self) -> &AttemptExecutor {
        &self.executor
    }

    /// Routes one request and returns the first successful facilitator response.
    ///
    /// `facilitator_id` of `None`, `""` or `"auto"` selects auto mode.
    ///
    /// # Errors
    ///
    /// Returns [`AllFacilitatorsFailedError`] listing every attempt, in order,
    /// when none succeeded.
    pub async fn route_payment(
        &self,
        method: PaymentMethod,
        payload: &Value,
        requirements: &Value,
        ctx: &RequestContext,
        facilitator_id: Option<&str>,
    ) -> Result<Value, AllFacilitatorsFailedError> {
        match facilitator_id.filter(|id| !id.is_empty() && *id != AUTO_FACILITATOR_ID) {
            Some(id) => self.route_explicit(id, method, payload, requirements, ctx).await,
            None => self.route_auto(method, payload, requirements, ctx).await,
        }
    }

    async fn route_explicit(
        &self,
        id: &str,
        method: PaymentMethod,
        payload: &Value,
        requirements: &Value,
        ctx: &RequestContext,
    ) -> Result<Value, AllFacilitatorsFailedError> {
        let Ok(facilitator) = self.registry.lookup_by_id(id) else {
            tracing::warn!(facilitator = %id, method = %method, "Requested facilitator not found");
            return Err(AllFacilitatorsFailedError::single(
                method,
                FailedAttempt::new(id, "not found"),
            ));
        };
        self.executor
            .execute(&facilitator, method, payload, requirements, ctx)
            .await
            .map_err(|e| AllFacilitatorsFailedError::single(method, FailedAttempt::from(&e)))
    }

    async fn route_auto(
        &self,
        method: PaymentMethod,
        payload: &Value,
        requirements: &Value,
        ctx: &RequestContext,
    ) -> Result<Value, AllFacilitatorsFailedError> {
        let mut errors = Vec::new();
        for attempt in 1..=self.max_attempts {
            let facilitator = match self.registry.select_round_robin() {
                Ok(facilitator) => facilitator,
                Err(e) => {
                    errors.push(FailedAttempt::new(AUTO_FACILITATOR_ID, e.to_string()));
                    break;
                }
            };
            tracing::debug!(
                attempt,
                max_attempts = self.max_attempts,
                facilitator = %facilitator.id(),
                "Selected facilitator"
            );
            match self
                .executor
                .execute(&facilitator, method, payload, requirements, ctx)
                .await
            {
                Ok(body) => return Ok(body),
                Err(e) => errors.push(FailedAttempt::from(&e)),
            }
        }

        tracing::warn!(
            method = %method,
            request_id = %ctx.event_id(),
            attempts = errors.len(),
            "All facilitators failed"
        );
        Err(AllFacilitatorsFailedError { method, errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, FacilitatorSettings};
    use crate::events::{EventRecorder, EventSink, EventType, EventsConfig, FacilitatorEvent, InMemorySink, SinkError};
    use crate::registry::RegistryBuilder;
    use crate::registry::tests::registry_of;
    use crate::resilience::ResilienceConfig;
    use crate::transport::mock::{MockTransport, Scripted};
    use serde_json::json;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    const VERIFIED: &str = r#"{"isValid":true,"payer":"0xc"}"#;

    /// Keeps every event it receives and forwards it to an [`InMemorySink`].
    #[derive(Debug, Default)]
    struct TeeSink {
        received: Mutex<Vec<FacilitatorEvent>>,
        store: InMemorySink,
    }

    #[async_trait]
    impl EventSink for TeeSink {
        async fn insert(&self, event: &FacilitatorEvent) -> Result<(), SinkError> {
            self.received.lock().unwrap().push(event.clone());
            self.store.insert(event).await
        }
    }

    struct Harness {
        router: FacilitatorRouter,
        transport: Arc<MockTransport>,
        sink: Arc<TeeSink>,
    }

    impl Harness {
        fn new(registry: FacilitatorRegistry, transport: Arc<MockTransport>, max_attempts: usize) -> Self {
            let sink = Arc::new(TeeSink::default());
            let recorder = EventRecorder::new(sink.clone(), &EventsConfig::default());
            let router = FacilitatorRouter::new(
                Arc::new(registry),
                AttemptExecutor::new(recorder),
                RouterConfig {
                    max_facilitator_attempts: max_attempts,
                },
            );
            Self { router, transport, sink }
        }

        fn with(ids: &[&str], transport: MockTransport, max_attempts: usize) -> Self {
            let transport = Arc::new(transport);
            Self::new(registry_of(ids, transport.clone()), transport, max_attempts)
        }

        async fn route(&self, id: Option<&str>) -> Result<Value, AllFacilitatorsFailedError> {
            let ctx = RequestContext::new(None, None);
            self.router
                .route_payment(PaymentMethod::Verify, &json!({}), &json!({}), &ctx, id)
                .await
        }

        /// Rows left in the store after dedup.
        async fn events(&self) -> Vec<(String, EventType)> {
            self.router.executor().recorder().shutdown().await;
            self.sink
                .store
                .events()
                .into_iter()
                .map(|e| (e.facilitator_name, e.event_type))
                .collect()
        }

        /// Every event handed to the sink, in order.
        async fn emitted(&self) -> Vec<(String, EventType)> {
            self.router.executor().recorder().shutdown().await;
            self.sink
                .received
                .lock()
                .unwrap()
                .iter()
                .map(|e| (e.facilitator_name.clone(), e.event_type))
                .collect()
        }

        fn cursor(&self) -> usize {
            self.router.registry().cursor()
        }
    }

    fn failing(hosts: &[&str]) -> MockTransport {
        hosts.iter().fold(MockTransport::default(), |t, host| {
            t.with(host, vec![Scripted::Reply(500, r#"{"error":"boom"}"#)])
        })
    }

    #[tokio::test]
    async fn test_fails_over_until_a_facilitator_succeeds() {
        let transport = failing(&["a.example", "b.example"])
            .with("c.example", vec![Scripted::Reply(200, VERIFIED)]);
        let h = Harness::with(&["a", "b", "c"], transport, 3);
        let start = h.cursor();

        let body = h.route(None).await.unwrap();

        assert_eq!(body, json!({"isValid": true, "payer": "0xc"}));
        assert_eq!(h.transport.calls(), ["a.example", "b.example", "c.example"]);
        assert_eq!(h.cursor(), (start + 3) % 3);
        assert_eq!(
            h.events().await,
            [
                ("a".to_owned(), EventType::Failure),
                ("b".to_owned(), EventType::Failure),
                ("c".to_owned(), EventType::Success),
            ]
        );
    }

    #[tokio::test]
    async fn test_auto_mode_is_bounded_and_ordered() {
        let h = Harness::with(
            &["a", "b", "c", "d"],
            failing(&["a.example", "b.example", "c.example", "d.example"]),
            3,
        );

        let err = h.route(Some("auto")).await.unwrap_err();

        let tried: Vec<_> = err.errors.iter().map(|e| e.facilitator.as_str()).collect();
        assert_eq!(tried, ["a", "b", "c"]);
        assert_eq!(h.transport.calls().len(), 3);
        assert_eq!(h.cursor(), 3);
        assert_eq!(err.method, PaymentMethod::Verify);
        assert!(err.errors[0].error.contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_short_list_reselects_the_same_facilitator() {
        let h = Harness::with(&["a", "b"], failing(&["a.example", "b.example"]), 3);

        let err = h.route(None).await.unwrap_err();

        let tried: Vec<_> = err.errors.iter().map(|e| e.facilitator.as_str()).collect();
        assert_eq!(tried, ["a", "b", "a"]);
        assert_eq!(h.transport.calls(), ["a.example", "b.example", "a.example"]);
        assert_eq!(
            h.emitted().await,
            [
                ("a".to_owned(), EventType::Failure),
                ("b".to_owned(), EventType::Failure),
                ("a".to_owned(), EventType::Failure),
            ]
        );
        // both failures at `a` share one (request, type, facilitator, method) key
        assert_eq!(
            h.events().await,
            [
                ("a".to_owned(), EventType::Failure),
                ("b".to_owned(), EventType::Failure),
            ]
        );
    }

    #[tokio::test]
    async fn test_explicit_failure_is_a_single_entry_and_keeps_the_cursor() {
        let transport = Arc::new(failing(&["a.example", "b.example", "c.example"]));
        let registry = RegistryBuilder::new(transport.clone())
            .catalog(["a", "b", "c"].map(|id| {
                CatalogEntry::fixed(id, FacilitatorSettings::with_url(format!("https://{id}.example")))
            }))
            .resilience(ResilienceConfig {
                max_attempts: 2,
                backoff: Duration::ZERO,
                ..ResilienceConfig::default()
            })
            .build(&HashMap::<String, String>::new());
        let h = Harness::new(registry, transport, 3);
        let start = h.cursor();

        let err = h.route(Some("b")).await.unwrap_err();

        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].facilitator, "b");
        // both tries hit b, no other facilitator was touched
        assert_eq!(h.transport.calls(), ["b.example", "b.example"]);
        assert_eq!(h.cursor(), start);
        assert_eq!(h.events().await, [("b".to_owned(), EventType::Failure)]);
    }

    #[tokio::test]
    async fn test_explicit_unknown_id_makes_no_attempt() {
        let h = Harness::with(&["a"], failing(&["a.example"]), 3);

        let err = h.route(Some("nope")).await.unwrap_err();

        assert_eq!(err.errors, [FailedAttempt::new("nope", "not found")]);
        assert!(h.transport.calls().is_empty());
        assert!(h.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_success_returns_the_body() {
        let transport = MockTransport::default().with("b.example", vec![Scripted::Reply(200, VERIFIED)]);
        let h = Harness::with(&["a", "b"], transport, 3);

        assert!(h.route(Some("b")).await.is_ok());
        assert_eq!(h.cursor(), 0);
    }

    #[tokio::test]
    async fn test_empty_registry_reports_no_facilitators() {
        let h = Harness::with(&[], MockTransport::default(), 3);

        let err = h.route(None).await.unwrap_err();

        assert_eq!(
            err.errors,
            [FailedAttempt::new("auto", "no facilitators configured")]
        );
    }
}
