//! HTTP header encoding and decoding for x402 protocol messages.
//!
//! Handles Base64-encoded JSON payloads in the `payment-signature`,
//! `payment-required` and `payment-response` headers.

use stackgate::proto::{Base64Bytes, PaymentPayload, PaymentRequired, PaymentResponse};

use crate::error::HttpError;

/// Encodes a [`PaymentRequired`] challenge as a Base64 string for the
/// `payment-required` header.
///
/// The output is deterministic for a given challenge.
///
/// # Errors
///
/// Returns [`HttpError::Serialize`] if JSON serialization fails.
pub fn encode_challenge(required: &PaymentRequired) -> Result<String, HttpError> {
    Ok(Base64Bytes::encode_json(required)?.to_string())
}

/// Decodes a challenge from a `payment-required` header value.
///
/// Some servers only surface the challenge in the response body, so a value
/// that is not Base64 JSON is parsed again as raw JSON before giving up.
///
/// # Errors
///
/// Returns the header decoding error if neither form parses.
pub fn decode_challenge(value: &str) -> Result<PaymentRequired, HttpError> {
    let from_header = Base64Bytes::from(value)
        .decode()
        .map_err(HttpError::from)
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(HttpError::from));
    match from_header {
        Ok(required) => Ok(required),
        Err(header_err) => serde_json::from_str(value.trim()).map_err(|_| header_err),
    }
}

/// Decodes and validates a `payment-signature` header value.
///
/// # Errors
///
/// Returns [`HttpError`] on Base64, JSON or payload shape failure.
pub fn try_decode_payment_payload(value: &str) -> Result<PaymentPayload, HttpError> {
    let bytes = Base64Bytes::from(value).decode()?;
    Ok(PaymentPayload::from_json(&bytes)?)
}

/// Decodes an optional `payment-signature` header.
///
/// Returns `None` both for a missing header and for one that does not decode;
/// callers that need to tell the two apart check for the header first.
#[must_use]
pub fn decode_payment_payload(value: Option<&str>) -> Option<PaymentPayload> {
    try_decode_payment_payload(value?).ok()
}

/// Encodes a [`PaymentResponse`] as a Base64 string for the
/// `payment-response` header.
///
/// # Errors
///
/// Returns [`HttpError::Serialize`] if JSON serialization fails.
pub fn encode_payment_response(response: &PaymentResponse) -> Result<String, HttpError> {
    Ok(Base64Bytes::encode_json(response)?.to_string())
}

/// Decodes a `payment-response` header value into a [`PaymentResponse`].
///
/// # Errors
///
/// Returns [`HttpError`] on Base64 or JSON decode failure.
pub fn decode_payment_response(value: &str) -> Result<PaymentResponse, HttpError> {
    let bytes = Base64Bytes::from(value).decode()?;
    Ok(serde_json::from_slice(&bytes)?)
}
