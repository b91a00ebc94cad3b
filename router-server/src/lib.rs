#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! x402 facilitator router server.
//!
//! Exposes the standard facilitator `/verify` and `/settle` endpoints and
//! forwards each request to one of several upstream facilitators, failing
//! over between them.
//!
//! # Modules
//!
//! - [`handlers`] - Axum route handlers and router builder
//! - [`error`] - API error responses
//! - [`config`] - Server configuration with environment variable expansion

pub mod config;
pub mod error;
pub mod handlers;

pub use handlers::{RouterState, router_app};
