//! The seam between the routing engine and the network.
//!
//! The engine only needs "send this request to that base URL and give me the
//! raw reply". Interpreting the reply (status check, error body extraction,
//! response shape) happens in [`crate::executor`], so every transport gets
//! identical semantics. `x402-router-http` provides the reqwest implementation.

use std::fmt::Debug;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use url::Url;

use crate::error::TransportError;
use crate::proto::{FacilitatorRequest, PaymentMethod};

/// A request about to be sent to a facilitator.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// Which endpoint to call.
    pub method: PaymentMethod,
    /// JSON body.
    pub body: FacilitatorRequest,
    /// Extra headers, typically authentication.
    pub headers: HeaderMap,
}

/// The raw reply of a facilitator.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body bytes.
    pub body: Vec<u8>,
}

/// Sends facilitator requests over some network stack.
///
/// Implementations must be cancel-safe: dropping the returned future aborts
/// the request.
#[async_trait]
pub trait FacilitatorTransport: Debug + Send + Sync {
    /// Sends `request` to `{base_url}/{request.method.path()}`.
    ///
    /// Any HTTP status is a successful send; only failures to exchange bytes
    /// are errors.
    async fn send(
        &self,
        base_url: &Url,
        request: &UpstreamRequest,
    ) -> Result<UpstreamReply, TransportError>;
}

/// Joins a facilitator base URL and a method path, tolerating trailing slashes.
///
/// # Errors
///
/// Returns the parse error if the joined URL is invalid.
pub fn endpoint_url(base_url: &Url, method: PaymentMethod) -> Result<Url, url::ParseError> {
    let base = base_url.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/{}", method.path()))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_handles_trailing_slash() {
        let with = Url::parse("https://facilitator.example/x402/").unwrap();
        let without = Url::parse("https://facilitator.example/x402").unwrap();
        assert_eq!(
            endpoint_url(&with, PaymentMethod::Verify).unwrap().as_str(),
            "https://facilitator.example/x402/verify"
        );
        assert_eq!(
            endpoint_url(&without, PaymentMethod::Settle).unwrap().as_str(),
            "https://facilitator.example/x402/settle"
        );
    }
}
