//! HTTP rendering of gate decisions and the headers every gate response carries.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::header::{CACHE_CONTROL, VARY};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::json;
use stackgate::proto::PaymentRequired;

use super::gate::{AccessDecision, ReleasedContent};
use crate::constants::{
    BUYER_WALLET_HEADER, PAYMENT_REQUIRED_HEADER, PAYMENT_RESPONSE_HEADER, PAYMENT_SIGNATURE_HEADER,
};
use crate::headers::{encode_challenge, encode_payment_response};

/// Renders `response` and attaches the encoded challenge as `payment-required`.
pub fn with_challenge_header(response: impl IntoResponse, challenge: &PaymentRequired) -> Response {
    let mut response = response.into_response();
    match encode_challenge(challenge)
        .ok()
        .and_then(|encoded| HeaderValue::from_str(&encoded).ok())
    {
        Some(value) => {
            response.headers_mut().insert(PAYMENT_REQUIRED_HEADER, value);
        }
        None => {
            #[cfg(feature = "telemetry")]
            tracing::error!("Failed to encode payment-required header");
        }
    }
    response
}

/// Marks a gate response as caller-specific.
///
/// Sets `Cache-Control: no-store` and a `Vary` covering the payment and
/// buyer headers, plus the opt-in bypass header when one is configured.
pub fn apply_gate_headers(headers: &mut HeaderMap, opt_in_header: Option<&str>) {
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    let mut vary = format!("{PAYMENT_SIGNATURE_HEADER}, {BUYER_WALLET_HEADER}");
    if let Some(header) = opt_in_header {
        vary.push_str(", ");
        vary.push_str(header);
    }
    if let Ok(value) = HeaderValue::from_str(&vary) {
        headers.insert(VARY, value);
    }
}

impl IntoResponse for ReleasedContent {
    fn into_response(self) -> Response {
        let header = if self.payment.is_bypass() {
            None
        } else {
            encode_payment_response(&self.payment)
                .ok()
                .and_then(|encoded| HeaderValue::from_str(&encoded).ok())
        };
        let mut response = (
            StatusCode::OK,
            Json(json!({ "content": self.content, "payment": self.payment })),
        )
            .into_response();
        if let Some(value) = header {
            response.headers_mut().insert(PAYMENT_RESPONSE_HEADER, value);
        }
        response
    }
}

impl IntoResponse for AccessDecision {
    fn into_response(self) -> Response {
        match self {
            Self::Released(released) => released.into_response(),
            Self::PaymentRequired(challenge) => {
                with_challenge_header((StatusCode::PAYMENT_REQUIRED, Json(&challenge)), &challenge)
            }
        }
    }
}
