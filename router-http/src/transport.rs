//! [`FacilitatorTransport`] over `reqwest`.
//!
//! Sends `POST {base_url}/verify` and `POST {base_url}/settle` with a JSON
//! body and hands back the raw status, headers and body. Status handling is
//! left to the router so every transport behaves the same.
//!
//! No client-level timeout is configured: the router's timeout layer drops
//! the request future, which aborts the request and frees the connection.

use async_trait::async_trait;
use http::header::{CONTENT_TYPE, HeaderValue};
use reqwest::Client;
use url::Url;
use x402_router::error::TransportError;
use x402_router::transport::{FacilitatorTransport, UpstreamReply, UpstreamRequest, endpoint_url};

/// Facilitator transport backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default client.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    /// Creates a transport around a pre-configured client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FacilitatorTransport for ReqwestTransport {
    async fn send(
        &self,
        base_url: &Url,
        request: &UpstreamRequest,
    ) -> Result<UpstreamReply, TransportError> {
        let url = endpoint_url(base_url, request.method).map_err(|e| {
            TransportError::with_source(format!("invalid facilitator url {base_url}"), e)
        })?;

        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .headers(request.headers.clone())
            .json(&request.body)
            .send()
            .await
            .map_err(|e| TransportError::with_source(format!("POST {url} failed"), e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::with_source(format!("failed to read response from {url}"), e))?;

        tracing::trace!(%url, status = status.as_u16(), bytes = body.len(), "Facilitator replied");
        Ok(UpstreamReply {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, StatusCode};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use x402_router::proto::{FacilitatorRequest, PaymentMethod};

    fn verify_request(headers: HeaderMap) -> UpstreamRequest {
        UpstreamRequest {
            method: PaymentMethod::Verify,
            body: FacilitatorRequest::new(
                json!({"x402Version": 1, "scheme": "exact", "network": "base"}),
                json!({"scheme": "exact", "payTo": "0xabc"}),
            ),
            headers,
        }
    }

    #[tokio::test]
    async fn test_sends_x402_body_and_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/facilitator/verify"))
            .and(header("content-type", "application/json"))
            .and(header("authorization", "Bearer token"))
            .and(body_json(json!({
                "x402Version": 1,
                "paymentPayload": {"x402Version": 1, "scheme": "exact", "network": "base"},
                "paymentRequirements": {"scheme": "exact", "payTo": "0xabc"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"isValid": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer token"));
        let base: Url = format!("{}/facilitator/", server.uri()).parse().unwrap();

        let reply = ReqwestTransport::new()
            .unwrap()
            .send(&base, &verify_request(headers))
            .await
            .unwrap();

        assert_eq!(reply.status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body, json!({"isValid": true}));
    }

    #[tokio::test]
    async fn test_non_200_is_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(
                ResponseTemplate::new(503)
                    .insert_header("retry-after", "5")
                    .set_body_string("maintenance"),
            )
            .mount(&server)
            .await;

        let base: Url = server.uri().parse().unwrap();
        let reply = ReqwestTransport::new()
            .unwrap()
            .send(&base, &verify_request(HeaderMap::new()))
            .await
            .unwrap();

        assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(reply.headers["retry-after"], "5");
        assert_eq!(reply.body, b"maintenance");
    }

    #[tokio::test]
    async fn test_connection_failure_is_a_transport_error() {
        // nothing listens on the discard port
        let base: Url = "http://127.0.0.1:9".parse().unwrap();
        let err = ReqwestTransport::new()
            .unwrap()
            .send(&base, &verify_request(HeaderMap::new()))
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("POST http://127.0.0.1:9/verify failed"));
    }
}
