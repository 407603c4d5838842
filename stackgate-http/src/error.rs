//! Error types for the HTTP transport layer.

use stackgate::proto::InvalidPayload;

/// Errors that can occur during HTTP header encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Base64 decoding failed.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded payment payload is structurally unusable.
    #[error("Invalid payment payload: {0}")]
    Payload(#[from] InvalidPayload),
}
