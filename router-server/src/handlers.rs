//! Axum route handlers for the router service.
//!
//! `/verify` and `/settle` accept the standard facilitator request body and
//! forward it to one or more upstream facilitators. The upstream's JSON
//! response is returned unchanged.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, FromRequest, Request, State};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use x402_router::context::RequestContext;
use x402_router::proto::PaymentMethod;
use x402_router::resilience::CircuitState;
use x402_router::router::FacilitatorRouter;

use crate::error::ApiError;

/// Shared application state for the router service.
pub type RouterState = Arc<FacilitatorRouter>;

/// Header selecting a facilitator explicitly; overrides the body field.
pub const FACILITATOR_ID_HEADER: &str = "x-facilitator-id";

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Body of `POST /verify` and `POST /settle`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequest {
    /// Protocol version; copied into the payload if the payload lacks one.
    #[serde(default)]
    pub x402_version: Option<u64>,
    /// The signed payment payload.
    pub payment_payload: Value,
    /// The requirements to check the payload against.
    pub payment_requirements: Value,
    /// Facilitator to use; absent, empty or `"auto"` means round-robin failover.
    #[serde(default)]
    pub facilitator_id: Option<String>,
}

/// One row of `GET /facilitators`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorStatus {
    /// Facilitator id.
    pub id: String,
    /// Base URL.
    pub url: String,
    /// Breaker status, or `None` when the facilitator runs without one.
    pub circuit: Option<CircuitStatus>,
}

/// Circuit breaker snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStatus {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures counted so far.
    pub consecutive_failures: u32,
}

/// `POST /verify`: verifies a payment through the selected facilitator(s).
///
/// # Errors
///
/// Returns 400 on a malformed body, 413 on an oversized one, or 503 if every
/// facilitator tried failed.
pub async fn post_verify(
    State(router): State<RouterState>,
    request: Request,
) -> Result<Json<Value>, ApiError> {
    route(&router, PaymentMethod::Verify, request).await
}

/// `POST /settle`: settles a payment through the selected facilitator(s).
///
/// # Errors
///
/// Returns 400 on a malformed body, 413 on an oversized one, or 503 if every
/// facilitator tried failed.
pub async fn post_settle(
    State(router): State<RouterState>,
    request: Request,
) -> Result<Json<Value>, ApiError> {
    route(&router, PaymentMethod::Settle, request).await
}

async fn route(
    router: &FacilitatorRouter,
    method: PaymentMethod,
    request: Request,
) -> Result<Json<Value>, ApiError> {
    let headers = request.headers().clone();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ctx = RequestContext::new(
        client_ip(&headers, peer),
        header_str(&headers, "user-agent").map(str::to_owned),
    );

    let bytes = Bytes::from_request(request, &()).await?;
    let RouteRequest {
        x402_version,
        mut payment_payload,
        payment_requirements,
        facilitator_id,
    } = serde_json::from_slice(&bytes)?;

    let Some(payload) = payment_payload.as_object_mut() else {
        return Err(ApiError::InvalidRequest("paymentPayload must be an object".into()));
    };
    if let Some(version) = x402_version {
        payload.entry("x402Version").or_insert(version.into());
    }
    if !payment_requirements.is_object() {
        return Err(ApiError::InvalidRequest(
            "paymentRequirements must be an object".into(),
        ));
    }

    let facilitator_id = header_str(&headers, FACILITATOR_ID_HEADER)
        .map(str::to_owned)
        .or(facilitator_id);

    ctx.set_validated(payment_payload.clone(), payment_requirements.clone())?;
    let response = router
        .route_payment(
            method,
            &payment_payload,
            &payment_requirements,
            &ctx,
            facilitator_id.as_deref(),
        )
        .await?;
    Ok(Json(response))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// First `X-Forwarded-For` hop, falling back to the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .and_then(|hop| hop.trim().parse().ok())
        .or(peer)
}

/// `GET /facilitators`: lists the facilitators traffic can be routed to.
pub async fn get_facilitators(State(router): State<RouterState>) -> Json<Vec<FacilitatorStatus>> {
    let rows = router
        .registry()
        .iter()
        .map(|f| FacilitatorStatus {
            id: f.id().to_owned(),
            url: f.base_url().to_string(),
            circuit: f.circuit_breaker().map(|cb| CircuitStatus {
                state: cb.state(),
                consecutive_failures: cb.consecutive_failures(),
            }),
        })
        .collect();
    Json(rows)
}

/// `GET /health`: liveness check.
pub async fn health(State(router): State<RouterState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "facilitators": router.registry().len(),
    }))
}

/// Creates an Axum [`axum::Router`] with all router endpoints.
///
/// Request bodies are capped at 1 MiB.
///
/// Endpoints:
/// - `POST /verify`
/// - `POST /settle`
/// - `GET /facilitators`
/// - `GET /health`
pub fn router_app(state: RouterState) -> axum::Router {
    axum::Router::new()
        .route("/verify", axum::routing::post(post_verify))
        .route("/settle", axum::routing::post(post_settle))
        .route("/facilitators", axum::routing::get(get_facilitators))
        .route("/health", axum::routing::get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
