//! [`EventSink`] that posts events to an HTTP collector.

use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use reqwest::Client;
use url::Url;
use x402_router::events::{EventSink, FacilitatorEvent, SinkError};

/// Posts each event as JSON to a collector endpoint.
///
/// The collector is expected to upsert on the event's dedup key
/// (`requestId`, `eventType`, `facilitatorName`, `method`).
#[derive(Debug, Clone)]
pub struct HttpEventSink {
    client: Client,
    url: Url,
    headers: HeaderMap,
}

impl HttpEventSink {
    /// Creates a sink posting to `url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, url))
    }

    /// Creates a sink around a pre-configured client.
    #[must_use]
    pub fn with_client(client: Client, url: Url) -> Self {
        Self {
            client,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Extra headers sent with every insert, e.g. collector credentials.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// The collector endpoint.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn insert(&self, event: &FacilitatorEvent) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .json(event)
            .send()
            .await
            .map_err(|e| SinkError::with_source(format!("POST {} failed", self.url), e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::new(format!("collector responded with HTTP {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use x402_router::context::RequestContext;
    use x402_router::events::{AttemptOutcome, EventType};
    use x402_router::proto::PaymentMethod;

    fn event() -> FacilitatorEvent {
        let ctx = RequestContext::new(None, Some("test-agent".into()));
        FacilitatorEvent::new(
            &ctx,
            EventType::Success,
            AttemptOutcome::new("payai", PaymentMethod::Settle, Duration::from_millis(12)).status(200),
        )
    }

    #[tokio::test]
    async fn test_posts_event_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .and(body_partial_json(json!({
                "eventType": "success",
                "facilitatorName": "payai",
                "method": "settle",
                "statusCode": 200,
                "userAgent": "test-agent"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/events", server.uri()).parse().unwrap();
        let sink = HttpEventSink::new(url, Duration::from_secs(5)).unwrap();

        sink.insert(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_collector_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = HttpEventSink::new(server.uri().parse().unwrap(), Duration::from_secs(5)).unwrap();
        let err = sink.insert(&event()).await.unwrap_err();

        assert_eq!(err.to_string(), "collector responded with HTTP 500 Internal Server Error");
    }
}
