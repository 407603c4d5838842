//! Terminal error states of the access gate and their HTTP rendering.
//!
//! Every variant renders as a structured JSON body with a machine-readable
//! `reason`. Internal details (storage errors, bad listing data) are logged,
//! never sent to the caller.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::header::RETRY_AFTER;
use http::{HeaderValue, StatusCode};
use serde_json::json;
use stackgate::facilitator::FacilitatorUnavailable;
use stackgate::proto::PaymentRequired;
use stackgate::requirements::RequirementError;
use stackgate::store::StorageError;

use super::response::with_challenge_header;
use crate::constants::FACILITATOR_RETRY_AFTER_SECS;
use crate::error::HttpError;

/// Default message when the facilitator declines without a reason.
pub const DEFAULT_SETTLEMENT_FAILURE: &str = "Payment settlement failed";

/// Ways a content request can end without releasing content.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// No listing has the requested id.
    #[error("Listing not found")]
    NotFound,
    /// The listing exists but is not for sale.
    #[error("Listing is not listed for sale")]
    NotListed,
    /// The `payment-signature` header could not be decoded.
    #[error("Invalid payment-signature header: {0}")]
    EnvelopeDecodeFailed(#[source] HttpError),
    /// The facilitator could not be reached; the buyer may retry the same payment.
    #[error("{source}")]
    FacilitatorUnavailable {
        /// Challenge re-issued with the response.
        challenge: Box<PaymentRequired>,
        /// What went wrong talking to the facilitator.
        #[source]
        source: FacilitatorUnavailable,
    },
    /// The facilitator declined the payment.
    #[error("Settlement rejected: {reason}")]
    SettlementRejected {
        /// Challenge re-issued with the response.
        challenge: Box<PaymentRequired>,
        /// The facilitator's reason.
        reason: String,
        /// Transaction the facilitator reported, if any.
        transaction: Option<String>,
        /// Payer the facilitator reported, if any.
        payer: Option<String>,
    },
    /// Payment requirements could not be built from the listing.
    #[error("Invalid payment requirements: {0}")]
    Requirements(#[from] RequirementError),
    /// The listing store failed.
    #[error("Storage unavailable: {0}")]
    Storage(#[from] StorageError),
}

impl GateError {
    /// Machine-readable reason sent in the response body.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::NotListed => "not_listed",
            Self::EnvelopeDecodeFailed(_) => "invalid_payment_envelope",
            Self::FacilitatorUnavailable { .. } => "facilitator_unavailable",
            Self::SettlementRejected { .. } => "settlement_rejected",
            Self::Requirements(_) => "invalid_payment_requirements",
            Self::Storage(_) => "storage_unavailable",
        }
    }

    /// HTTP status the error renders with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound | Self::NotListed => StatusCode::NOT_FOUND,
            Self::EnvelopeDecodeFailed(_) => StatusCode::BAD_REQUEST,
            Self::FacilitatorUnavailable { .. } | Self::SettlementRejected { .. } => {
                StatusCode::PAYMENT_REQUIRED
            }
            Self::Requirements(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status();
        let reason = self.reason();
        #[cfg(feature = "telemetry")]
        if status.is_server_error() {
            tracing::error!(error = %self, reason, "Content request failed");
        }
        match self {
            Self::NotFound | Self::NotListed => {
                (status, Json(json!({ "error": self.to_string(), "reason": reason })))
                    .into_response()
            }
            Self::EnvelopeDecodeFailed(_) => (
                status,
                Json(json!({ "error": "Invalid payment-signature header", "reason": reason })),
            )
                .into_response(),
            Self::FacilitatorUnavailable { challenge, .. } => {
                let body = json!({
                    "error": "Payment facilitator is unavailable, retry later",
                    "reason": reason,
                    "retryable": true,
                });
                let mut response = with_challenge_header((status, Json(body)), &challenge);
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(FACILITATOR_RETRY_AFTER_SECS));
                response
            }
            Self::SettlementRejected {
                challenge,
                reason: message,
                transaction,
                payer,
            } => {
                let mut body = json!({ "error": message, "reason": reason });
                if let Some(transaction) = transaction {
                    body["transaction"] = transaction.into();
                }
                if let Some(payer) = payer {
                    body["payer"] = payer.into();
                }
                with_challenge_header((status, Json(body)), &challenge)
            }
            Self::Requirements(_) => (
                status,
                Json(json!({ "error": "Invalid payment requirements", "reason": reason })),
            )
                .into_response(),
            Self::Storage(_) => (
                status,
                Json(json!({ "error": "Storage unavailable", "reason": reason })),
            )
                .into_response(),
        }
    }
}
