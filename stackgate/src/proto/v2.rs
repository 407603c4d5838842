//! V2 payment types for the x402 protocol.
//!
//! These types correspond to the current (V2) protocol version using CAIP-2
//! network identifiers and structured payment requirements.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::X402_VERSION;

/// Describes the resource being accessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// The URL of the resource.
    pub url: String,

    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Optional MIME type of the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// V2 payment requirements structure.
///
/// One accepted way to pay for a single access attempt.
///
/// # JSON Format
///
/// ```json
/// {
///   "scheme": "exact",
///   "network": "stacks:2147483648",
///   "amount": "500000",
///   "asset": "STX",
///   "payTo": "ST16K4ZYM14WPG9GZQ5BPXNQAEVTJPRMA4VWJCXYY",
///   "maxTimeoutSeconds": 300
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme identifier, always `"exact"` when built by this crate.
    pub scheme: String,

    /// CAIP-2 network identifier (e.g., "stacks:1").
    pub network: String,

    /// Amount in base units as an integer string.
    pub amount: String,

    /// `"STX"` or an sBTC token contract principal.
    pub asset: String,

    /// Recipient address.
    pub pay_to: String,

    /// Maximum time in seconds for payment validity.
    pub max_timeout_seconds: u64,

    /// Additional scheme-specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl PaymentRequirements {
    /// Compares the terms that decide what gets paid to whom, ignoring `extra`.
    #[must_use]
    pub fn same_terms(&self, other: &Self) -> bool {
        self.scheme == other.scheme
            && self.network == other.network
            && self.amount == other.amount
            && self.asset == other.asset
            && self.pay_to == other.pay_to
    }
}

/// V2 402 response structure.
///
/// Sent by the content server when payment is required.
///
/// # JSON Format
///
/// ```json
/// {
///   "x402Version": 2,
///   "error": "Payment required",
///   "resource": { "url": "https://example.com/api/content/1", "mimeType": "application/json" },
///   "accepts": [{ "scheme": "exact", "network": "stacks:1", ... }]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version (always 2 for V2).
    #[serde(default = "default_v2")]
    pub x402_version: u32,

    /// Optional error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Resource being paid for.
    pub resource: ResourceInfo,

    /// List of accepted payment requirements.
    pub accepts: Vec<PaymentRequirements>,
}

/// V2 payment payload structure.
///
/// Sent by the buyer in the `payment-signature` header. The inner `payload`
/// is opaque to the content server apart from the signed transaction string
/// it must carry.
///
/// # JSON Format
///
/// ```json
/// {
///   "x402Version": 2,
///   "accepted": { "scheme": "exact", "network": "stacks:1", ... },
///   "payload": { "transaction": "0x8080..." }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Protocol version (always 2 for V2).
    #[serde(default = "default_v2")]
    pub x402_version: u32,

    /// The payment requirements the buyer claims to fulfil.
    pub accepted: PaymentRequirements,

    /// Scheme-specific payload data.
    pub payload: Value,

    /// Optional resource information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,
}

/// Reasons a payment payload is structurally unusable.
#[derive(Debug, thiserror::Error)]
pub enum InvalidPayload {
    /// The bytes are not a JSON payment payload.
    #[error("Payment payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The inner `payload` field is not a JSON object.
    #[error("Payment payload must be a JSON object")]
    NotAnObject,
    /// No non-empty `payload.transaction` string was found.
    #[error("Payment payload carries no signed transaction")]
    MissingTransaction,
}

impl PaymentPayload {
    /// Parses and validates a JSON payment payload.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPayload`] if the JSON does not match the V2 shape or
    /// carries no signed transaction.
    pub fn from_json(bytes: &[u8]) -> Result<Self, InvalidPayload> {
        let payload: Self = serde_json::from_slice(bytes)?;
        payload.validate()?;
        Ok(payload)
    }

    /// Checks that the inner payload is an object with a signed transaction.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPayload::NotAnObject`] or [`InvalidPayload::MissingTransaction`].
    pub fn validate(&self) -> Result<(), InvalidPayload> {
        if !self.payload.is_object() {
            return Err(InvalidPayload::NotAnObject);
        }
        if self.transaction().is_none() {
            return Err(InvalidPayload::MissingTransaction);
        }
        Ok(())
    }

    /// Returns the signed transaction carried by the payload, if any.
    #[must_use]
    pub fn transaction(&self) -> Option<&str> {
        self.payload
            .get("transaction")
            .and_then(Value::as_str)
            .filter(|tx| !tx.is_empty())
    }

    /// Returns the network from accepted requirements.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.accepted.network
    }
}

/// Request to settle a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    /// Protocol version (always 2 for V2).
    pub x402_version: u32,

    /// The payment payload to settle.
    pub payment_payload: PaymentPayload,

    /// The requirements for settlement.
    pub payment_requirements: PaymentRequirements,
}

impl SettleRequest {
    /// Pairs a buyer's payload with the requirements the server expects.
    #[must_use]
    pub fn new(payment_payload: PaymentPayload, payment_requirements: PaymentRequirements) -> Self {
        Self {
            x402_version: X402_VERSION,
            payment_payload,
            payment_requirements,
        }
    }
}

/// Why content was released without a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bypass {
    /// The caller is the listing's seller.
    Seller,
    /// The caller already has a recorded purchase of the listing.
    ExistingPurchase,
}

/// Payment confirmation attached to released content.
///
/// Carried in the response body under `payment` and, for settled payments,
/// in the `payment-response` header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    /// Whether the payment settled. Absent for bypass releases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    /// Address that paid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,

    /// On-chain transaction reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,

    /// CAIP-2 network the payment settled on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Set when content was released without a payment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass: Option<Bypass>,
}

impl PaymentResponse {
    /// Confirmation for a release that skipped payment.
    #[must_use]
    pub fn bypassed(bypass: Bypass) -> Self {
        Self {
            bypass: Some(bypass),
            ..Self::default()
        }
    }

    /// Returns `true` if this confirmation describes a bypass release.
    #[must_use]
    pub const fn is_bypass(&self) -> bool {
        self.bypass.is_some()
    }
}

const fn default_v2() -> u32 {
    X402_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".into(),
            network: "stacks:2147483648".into(),
            amount: "500000".into(),
            asset: "STX".into(),
            pay_to: "ST16K4ZYM14WPG9GZQ5BPXNQAEVTJPRMA4VWJCXYY".into(),
            max_timeout_seconds: 300,
            extra: None,
        }
    }

    #[test]
    fn test_requirements_serialize_camel_case() {
        let value = serde_json::to_value(requirements()).unwrap();
        assert_eq!(
            value,
            json!({
                "scheme": "exact",
                "network": "stacks:2147483648",
                "amount": "500000",
                "asset": "STX",
                "payTo": "ST16K4ZYM14WPG9GZQ5BPXNQAEVTJPRMA4VWJCXYY",
                "maxTimeoutSeconds": 300
            })
        );
    }

    #[test]
    fn test_payment_required_defaults_version() {
        let challenge: PaymentRequired = serde_json::from_value(json!({
            "resource": { "url": "http://localhost/api/content/1" },
            "accepts": [serde_json::to_value(requirements()).unwrap()]
        }))
        .unwrap();
        assert_eq!(challenge.x402_version, 2);
        assert_eq!(challenge.accepts.len(), 1);
        assert!(challenge.error.is_none());
    }

    #[test]
    fn test_payload_from_json_accepts_signed_transaction() {
        let raw = json!({
            "x402Version": 2,
            "accepted": serde_json::to_value(requirements()).unwrap(),
            "payload": { "transaction": "0x808000", "broadcastOnSettle": true }
        });
        let payload = PaymentPayload::from_json(raw.to_string().as_bytes()).unwrap();
        assert_eq!(payload.transaction(), Some("0x808000"));
        assert_eq!(payload.network(), "stacks:2147483648");
    }

    #[test]
    fn test_payload_from_json_rejects_bad_shapes() {
        let accepted = serde_json::to_value(requirements()).unwrap();
        let cases = [
            json!({ "accepted": accepted, "payload": "0x8080" }),
            json!({ "accepted": accepted, "payload": {} }),
            json!({ "accepted": accepted, "payload": { "transaction": "" } }),
            json!({ "accepted": accepted, "payload": { "transaction": 42 } }),
            json!({ "payload": { "transaction": "0x8080" } }),
        ];
        for case in cases {
            assert!(
                PaymentPayload::from_json(case.to_string().as_bytes()).is_err(),
                "{case} should be rejected"
            );
        }
        assert!(matches!(
            PaymentPayload::from_json(b"{not json"),
            Err(InvalidPayload::Json(_))
        ));
    }

    #[test]
    fn test_settle_request_shape() {
        let payload = PaymentPayload {
            x402_version: 2,
            accepted: requirements(),
            payload: json!({ "transaction": "0x01" }),
            resource: None,
        };
        let value = serde_json::to_value(SettleRequest::new(payload, requirements())).unwrap();
        assert_eq!(value["x402Version"], 2);
        assert_eq!(value["paymentPayload"]["payload"]["transaction"], "0x01");
        assert_eq!(value["paymentRequirements"]["amount"], "500000");
    }

    #[test]
    fn test_payment_response_omits_absent_fields() {
        let bypass = serde_json::to_value(PaymentResponse::bypassed(Bypass::ExistingPurchase)).unwrap();
        assert_eq!(bypass, json!({ "bypass": "existing_purchase" }));

        let settled = PaymentResponse {
            success: Some(true),
            payer: Some("SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7".into()),
            transaction: Some("0xabc".into()),
            network: Some("stacks:1".into()),
            bypass: None,
        };
        let value = serde_json::to_value(&settled).unwrap();
        assert_eq!(value["success"], true);
        assert!(value.get("bypass").is_none());
    }

    #[test]
    fn test_same_terms_ignores_extra() {
        let mut other = requirements();
        other.extra = Some(json!({ "memo": "x" }));
        assert!(requirements().same_terms(&other));
        other.amount = "1".into();
        assert!(!requirements().same_terms(&other));
    }
}
