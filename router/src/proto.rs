//! Wire types exchanged with upstream x402 facilitators.
//!
//! The router forwards payment payloads and requirements as opaque JSON.
//! The typed [`VerifyResponse`] and [`SettleResponse`] are only used to check
//! that a `200 OK` body has the expected shape; the body handed back to the
//! caller is the facilitator's JSON, untouched.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version assumed when a payload does not carry `x402Version`.
pub const DEFAULT_X402_VERSION: u64 = 1;

/// The two operations a facilitator exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// `POST /verify`: check a payment authorization without executing it.
    Verify,
    /// `POST /settle`: execute a verified payment on-chain.
    Settle,
}

impl PaymentMethod {
    /// Returns the lowercase method name (`"verify"` or `"settle"`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::Settle => "settle",
        }
    }

    /// Returns the endpoint path relative to a facilitator base URL.
    #[must_use]
    pub const fn path(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`PaymentMethod`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown payment method: {0}")]
pub struct UnknownMethodError(String);

impl FromStr for PaymentMethod {
    type Err = UnknownMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verify" => Ok(Self::Verify),
            "settle" => Ok(Self::Settle),
            other => Err(UnknownMethodError(other.to_owned())),
        }
    }
}

/// Body of `POST /verify` and `POST /settle` requests sent to a facilitator.
///
/// ```json
/// {
///   "x402Version": 1,
///   "paymentPayload": { "scheme": "exact", "network": "base", ... },
///   "paymentRequirements": { "scheme": "exact", "payTo": "0x...", ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorRequest {
    /// Protocol version, copied from the payment payload.
    pub x402_version: u64,
    /// The signed payment payload.
    pub payment_payload: Value,
    /// The requirements the payload is checked against.
    pub payment_requirements: Value,
}

impl FacilitatorRequest {
    /// Builds a request body, taking the protocol version from the payload's
    /// `x402Version` field (default [`DEFAULT_X402_VERSION`]).
    #[must_use]
    pub fn new(payment_payload: Value, payment_requirements: Value) -> Self {
        let x402_version = payment_payload
            .get("x402Version")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_X402_VERSION);
        Self {
            x402_version,
            payment_payload,
            payment_requirements,
        }
    }
}

/// Shape of a facilitator's `/verify` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// Whether the payload satisfied the requirements.
    pub is_valid: bool,
    /// Machine-readable reason when `is_valid` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    /// Payer address, if the facilitator identified it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// Shape of a facilitator's `/settle` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    /// Whether settlement succeeded.
    pub success: bool,
    /// Machine-readable reason when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// Payer address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    /// Transaction hash or signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    /// Network the payment settled on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

/// Checks that `body` matches the response shape expected for `method`.
///
/// # Errors
///
/// Returns the deserialization error if the body does not match.
pub fn check_response_shape(method: PaymentMethod, body: &Value) -> Result<(), serde_json::Error> {
    match method {
        PaymentMethod::Verify => VerifyResponse::deserialize(body).map(drop),
        PaymentMethod::Settle => SettleResponse::deserialize(body).map(drop),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_takes_version_from_payload() {
        let req = FacilitatorRequest::new(json!({"x402Version": 2, "scheme": "exact"}), json!({}));
        assert_eq!(req.x402_version, 2);

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["x402Version"], 2);
        assert_eq!(value["paymentPayload"]["scheme"], "exact");
        assert!(value.get("paymentRequirements").is_some());
    }

    #[test]
    fn test_request_defaults_version() {
        let req = FacilitatorRequest::new(json!({"scheme": "exact"}), json!({}));
        assert_eq!(req.x402_version, DEFAULT_X402_VERSION);
    }

    #[test]
    fn test_response_shape_is_checked_per_method() {
        let verify = json!({"isValid": true, "payer": "0xabc"});
        let settle = json!({"success": true, "transaction": "0x01", "network": "base"});

        assert!(check_response_shape(PaymentMethod::Verify, &verify).is_ok());
        assert!(check_response_shape(PaymentMethod::Settle, &settle).is_ok());
        assert!(check_response_shape(PaymentMethod::Verify, &settle).is_err());
        assert!(check_response_shape(PaymentMethod::Settle, &json!("ok")).is_err());
    }

    #[test]
    fn test_method_round_trips_through_str() {
        assert_eq!("settle".parse::<PaymentMethod>().unwrap(), PaymentMethod::Settle);
        assert!("refund".parse::<PaymentMethod>().is_err());
        assert_eq!(PaymentMethod::Verify.to_string(), "verify");
    }
}
