#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP plumbing for [`x402_router`].
//!
//! - [`transport`] - [`ReqwestTransport`], the production facilitator transport
//! - [`auth`] - per-endpoint and per-call authentication headers
//! - [`sink`] - [`HttpEventSink`], posting analytics events to a collector

pub mod auth;
pub mod sink;
pub mod transport;

pub use auth::{AuthHeaders, CallbackAuthHeaders};
pub use sink::HttpEventSink;
pub use transport::ReqwestTransport;
