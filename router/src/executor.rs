//! A single attempt against a single facilitator.
//!
//! One call to [`AttemptExecutor::execute`] records exactly one event, no
//! matter how many tries the facilitator's resilience policy makes.

use std::collections::BTreeMap;

use http::StatusCode;
use serde_json::Value;
use tokio::time::Instant;
use tracing::Instrument;

use crate::context::RequestContext;
use crate::error::{CallError, FacilitatorError, FacilitatorFailedError, normalize_headers};
use crate::events::{AttemptOutcome, EventRecorder, EventType};
use crate::proto::{FacilitatorRequest, PaymentMethod, check_response_shape};
use crate::registry::Facilitator;
use crate::transport::{UpstreamReply, UpstreamRequest};

/// Runs attempts and records their outcomes.
#[derive(Debug, Clone)]
pub struct AttemptExecutor {
    recorder: EventRecorder,
}

struct Accepted {
    body: Value,
    headers: BTreeMap<String, String>,
}

impl AttemptExecutor {
    /// Creates an executor recording into `recorder`.
    #[must_use]
    pub const fn new(recorder: EventRecorder) -> Self {
        Self { recorder }
    }

    /// The recorder events go to.
    #[must_use]
    pub const fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    /// Calls `method` on `facilitator` under its resilience policy.
    ///
    /// Returns the facilitator's response body untouched.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorFailedError`] carrying the policy's terminal error.
    pub async fn execute(
        &self,
        facilitator: &Facilitator,
        method: PaymentMethod,
        payload: &Value,
        requirements: &Value,
        ctx: &RequestContext,
    ) -> Result<Value, FacilitatorFailedError> {
        let started = Instant::now();
        let body = FacilitatorRequest::new(payload.clone(), requirements.clone());
        let span = tracing::info_span!(
            "facilitator_attempt",
            facilitator = %facilitator.id(),
            method = %method,
            request_id = %ctx.event_id(),
        );

        let result = facilitator
            .policy()
            .execute(|| call(facilitator, method, &body))
            .instrument(span)
            .await;
        let duration = started.elapsed();
        let outcome = AttemptOutcome::new(facilitator.id(), method, duration);

        match result {
            Ok(accepted) => {
                tracing::debug!(
                    facilitator = %facilitator.id(),
                    method = %method,
                    duration_ms = duration.as_millis(),
                    "Facilitator call succeeded"
                );
                self.recorder.record_outcome(
                    ctx,
                    EventType::Success,
                    outcome.status(StatusCode::OK.as_u16()).headers(accepted.headers),
                );
                Ok(accepted.body)
            }
            Err(source) => {
                tracing::warn!(
                    facilitator = %facilitator.id(),
                    method = %method,
                    request_id = %ctx.event_id(),
                    duration_ms = duration.as_millis(),
                    error = %source,
                    "Facilitator attempt failed"
                );
                let outcome = match source.as_upstream() {
                    Some(upstream) => outcome
                        .status(upstream.status.as_u16())
                        .headers(upstream.headers.clone())
                        .error(source.kind(), Some(upstream.body.clone())),
                    None => outcome.error(source.kind(), None),
                };
                self.recorder.record_outcome(
                    ctx,
                    EventType::Failure,
                    outcome.meta("error", source.to_string()),
                );
                Err(FacilitatorFailedError {
                    facilitator: facilitator.id().to_owned(),
                    method,
                    source,
                })
            }
        }
    }
}

async fn call(
    facilitator: &Facilitator,
    method: PaymentMethod,
    body: &FacilitatorRequest,
) -> Result<Accepted, CallError> {
    let request = UpstreamRequest {
        method,
        body: body.clone(),
        headers: facilitator.auth_headers(method),
    };
    let reply = facilitator
        .transport()
        .send(facilitator.base_url(), &request)
        .await?;
    accept(facilitator.id(), method, reply)
}

fn accept(facilitator: &str, method: PaymentMethod, reply: UpstreamReply) -> Result<Accepted, CallError> {
    if reply.status != StatusCode::OK {
        return Err(FacilitatorError::from_reply(facilitator, reply.status, &reply.headers, &reply.body).into());
    }
    let invalid = |e: serde_json::Error| CallError::InvalidResponse {
        method,
        message: e.to_string(),
    };
    let body: Value = serde_json::from_slice(&reply.body).map_err(invalid)?;
    check_response_shape(method, &body).map_err(invalid)?;
    Ok(Accepted {
        body,
        headers: normalize_headers(&reply.headers),
    })
}
