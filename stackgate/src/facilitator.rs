//! Settlement facilitator seam.
//!
//! The content server never verifies signatures or broadcasts transactions
//! itself. It hands the buyer's payload and the expected requirements to a
//! [`Facilitator`] and acts on the [`SettlementOutcome`] it reports.
//!
//! Two failure modes are kept apart: a facilitator that answered and declined
//! the payment produces an outcome with `success == false`, while one that
//! could not be reached or answered gibberish produces
//! [`FacilitatorUnavailable`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::extract;
use crate::proto::{PaymentPayload, PaymentRequirements, PaymentResponse};

/// A boxed, `Send` future borrowed for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The facilitator's verdict on one settlement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementOutcome {
    /// Whether the payment settled.
    pub success: bool,
    /// Address that paid, if reported.
    pub payer: Option<String>,
    /// Transaction reference, if reported.
    pub transaction: Option<String>,
    /// CAIP-2 network of the settlement.
    pub network: String,
    /// Human-readable reason for a failed settlement.
    pub error_reason: Option<String>,
}

impl SettlementOutcome {
    /// Reads an outcome from a facilitator response body.
    ///
    /// `success` must be the JSON boolean `true` for the outcome to succeed.
    /// Missing network information falls back to `fallback_network`.
    #[must_use]
    pub fn from_response(body: &Value, fallback_network: &str) -> Self {
        let success = body.get("success").and_then(Value::as_bool) == Some(true);
        Self {
            success,
            payer: extract::payer(body),
            transaction: extract::transaction(body),
            network: extract::network(body).unwrap_or_else(|| fallback_network.to_owned()),
            error_reason: if success { None } else { extract::reason(body) },
        }
    }

    /// A declined settlement with only a reason attached.
    #[must_use]
    pub fn rejected(reason: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            success: false,
            payer: None,
            transaction: None,
            network: network.into(),
            error_reason: Some(reason.into()),
        }
    }

    /// The confirmation shown to the buyer for this settlement.
    #[must_use]
    pub fn payment_response(&self) -> PaymentResponse {
        PaymentResponse {
            success: Some(self.success),
            payer: self.payer.clone(),
            transaction: self.transaction.clone(),
            network: Some(self.network.clone()),
            bypass: None,
        }
    }
}

/// The facilitator could not be reached or did not produce a usable answer.
///
/// Distinct from a declined payment: the buyer may retry the same payload
/// later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Settlement facilitator unavailable: {0}")]
pub struct FacilitatorUnavailable(pub String);

/// Settles buyer payloads against the server's requirements.
///
/// Implementations make exactly one settlement attempt per call and never
/// retry on their own.
pub trait Facilitator: Send + Sync {
    /// Settles `payload` against `requirements`.
    fn settle<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<SettlementOutcome, FacilitatorUnavailable>>;
}

impl<T: Facilitator + ?Sized> Facilitator for Arc<T> {
    fn settle<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<SettlementOutcome, FacilitatorUnavailable>> {
        (**self).settle(payload, requirements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_from_successful_body() {
        let body = json!({
            "success": true,
            "payer": "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7",
            "transaction": "0xabc",
            "network": "stacks:1"
        });
        let outcome = SettlementOutcome::from_response(&body, "stacks:2147483648");
        assert!(outcome.success);
        assert_eq!(outcome.payer.as_deref(), Some("SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7"));
        assert_eq!(outcome.transaction.as_deref(), Some("0xabc"));
        assert_eq!(outcome.network, "stacks:1");
        assert_eq!(outcome.error_reason, None);
    }

    #[test]
    fn test_outcome_from_rejection_body() {
        let body = json!({ "success": false, "errorReason": "insufficient funds" });
        let outcome = SettlementOutcome::from_response(&body, "stacks:2147483648");
        assert!(!outcome.success);
        assert_eq!(outcome.error_reason.as_deref(), Some("insufficient funds"));
        assert_eq!(outcome.network, "stacks:2147483648");
    }

    #[test]
    fn test_success_must_be_boolean_true() {
        for body in [json!({}), json!({ "success": "true" }), json!({ "success": 1 })] {
            assert!(!SettlementOutcome::from_response(&body, "stacks:1").success, "{body}");
        }
    }

    #[test]
    fn test_outcome_reads_nested_result() {
        let body = json!({ "success": true, "result": { "txId": "0x1", "sender": "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM" } });
        let outcome = SettlementOutcome::from_response(&body, "stacks:2147483648");
        assert_eq!(outcome.transaction.as_deref(), Some("0x1"));
        assert_eq!(outcome.payer.as_deref(), Some("ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM"));
    }

    #[test]
    fn test_payment_response_mirrors_outcome() {
        let outcome = SettlementOutcome {
            success: true,
            payer: Some("ST1".into()),
            transaction: None,
            network: "stacks:2147483648".into(),
            error_reason: None,
        };
        let response = outcome.payment_response();
        assert_eq!(response.success, Some(true));
        assert_eq!(response.payer.as_deref(), Some("ST1"));
        assert_eq!(response.transaction, None);
        assert_eq!(response.network.as_deref(), Some("stacks:2147483648"));
        assert!(!response.is_bypass());
    }
}
