#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Routing and resilience engine for x402 payment facilitators.
//!
//! A client submits a verify or settle request once; this crate picks one or
//! more upstream facilitators, wraps every call in a per-facilitator
//! resilience policy, fails over on error and records one analytics event
//! per attempt without making the client wait for it.
//!
//! # Components
//!
//! - [`registry`]: the whitelisted facilitators, lookup by id and round-robin selection.
//! - [`resilience`]: retry ⊃ timeout ⊃ circuit breaker ⊃ call.
//! - [`executor`]: one attempt against one facilitator, one event.
//! - [`router`]: explicit-id routing and round-robin failover.
//! - [`events`]: fire-and-forget event recording through a bounded queue.
//!
//! The network is behind [`transport::FacilitatorTransport`]; the
//! `x402-router-http` crate provides the reqwest implementation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use x402_router::catalog::{known_facilitators, ProcessEnv};
//! use x402_router::context::RequestContext;
//! use x402_router::events::{EventRecorder, EventsConfig, LogSink};
//! use x402_router::executor::AttemptExecutor;
//! use x402_router::proto::PaymentMethod;
//! use x402_router::registry::RegistryBuilder;
//! use x402_router::router::{FacilitatorRouter, RouterConfig};
//! # use x402_router::transport::FacilitatorTransport;
//! # async fn run(transport: Arc<dyn FacilitatorTransport>) {
//! let registry = RegistryBuilder::new(transport)
//!     .catalog(known_facilitators())
//!     .build(&ProcessEnv);
//! let recorder = EventRecorder::new(Arc::new(LogSink), &EventsConfig::default());
//! let router = FacilitatorRouter::new(
//!     Arc::new(registry),
//!     AttemptExecutor::new(recorder),
//!     RouterConfig::default(),
//! );
//!
//! let ctx = RequestContext::new(None, None);
//! let result = router
//!     .route_payment(PaymentMethod::Verify, &json!({}), &json!({}), &ctx, None)
//!     .await;
//! # }
//! ```

pub mod catalog;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod proto;
pub mod registry;
pub mod resilience;
pub mod router;
pub mod timestamp;
pub mod transport;
