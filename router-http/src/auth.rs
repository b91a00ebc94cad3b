//! Authentication header providers beyond a static bearer token.
//!
//! [`x402_router::catalog::StaticAuthHeaders`] covers the common case of one
//! API key for every call. These providers cover facilitators that want
//! different credentials per endpoint, or freshly minted ones per call.

use std::fmt;

use http::HeaderMap;
use x402_router::catalog::AuthHeaderFactory;
use x402_router::proto::PaymentMethod;

/// Fixed headers per endpoint.
#[derive(Debug, Clone, Default)]
pub struct AuthHeaders {
    /// Headers for `/verify` calls.
    pub verify: HeaderMap,
    /// Headers for `/settle` calls.
    pub settle: HeaderMap,
}

impl AuthHeaderFactory for AuthHeaders {
    fn headers(&self, method: PaymentMethod) -> HeaderMap {
        match method {
            PaymentMethod::Verify => self.verify.clone(),
            PaymentMethod::Settle => self.settle.clone(),
        }
    }
}

/// Headers produced by a callback on every call, e.g. a signed JWT per request.
pub struct CallbackAuthHeaders<F> {
    create_headers: F,
}

impl<F> fmt::Debug for CallbackAuthHeaders<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackAuthHeaders").finish_non_exhaustive()
    }
}

impl<F> CallbackAuthHeaders<F>
where
    F: Fn(PaymentMethod) -> HeaderMap + Send + Sync,
{
    /// Wraps a header callback.
    pub const fn new(create_headers: F) -> Self {
        Self { create_headers }
    }
}

impl<F> AuthHeaderFactory for CallbackAuthHeaders<F>
where
    F: Fn(PaymentMethod) -> HeaderMap + Send + Sync,
{
    fn headers(&self, method: PaymentMethod) -> HeaderMap {
        (self.create_headers)(method)
    }
}
