//! The access gate: the per-request protocol state machine.
//!
//! One [`AccessGate`] is built at startup and shared by every request. Each
//! call to [`AccessGate::handle`] walks a single request through
//!
//! ```text
//! lookup -> seller bypass -> listing check -> prior-purchase bypass
//!        -> challenge | decode envelope -> settle -> record -> release
//! ```
//!
//! and ends in exactly one terminal state: content released, a 402
//! challenge, or a [`GateError`].
//!
//! The gate holds no per-request state. Whether a buyer has paid lives in the
//! [`PurchaseLedger`]; the listing price lives in the [`ListingStore`].

use std::fmt;
use std::sync::Arc;

use stackgate::facilitator::Facilitator;
use stackgate::proto::{
    Bypass, PaymentPayload, PaymentRequired, PaymentRequirements, PaymentResponse, ResourceInfo,
};
use stackgate::requirements::RequirementBuilder;
use stackgate::store::{Listing, ListingStore, NewPurchase, PurchaseLedger};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::error::{DEFAULT_SETTLEMENT_FAILURE, GateError};
use crate::constants::BYPASS_ALLOW_VALUE;
use crate::headers::try_decode_payment_payload;

/// Buyer recorded when neither the facilitator nor the caller names one.
pub const UNKNOWN_BUYER: &str = "unknown";

/// MIME type advertised for gated content.
pub const CONTENT_MIME_TYPE: &str = "application/json";

/// When the seller and prior-purchase bypasses apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BypassPolicy {
    /// Bypasses apply to every request.
    #[default]
    Always,
    /// Bypasses apply only when the request carries `header: allow`.
    ///
    /// Lets a first-party front end skip payment for sellers and returning
    /// buyers while third-party x402 clients always see strict 402 behaviour.
    OptIn {
        /// Name of the opt-in request header.
        header: String,
    },
}

impl BypassPolicy {
    /// The opt-in header name, if the policy uses one.
    #[must_use]
    pub fn header(&self) -> Option<&str> {
        match self {
            Self::Always => None,
            Self::OptIn { header } => Some(header),
        }
    }

    /// Whether bypasses apply given the opt-in header value sent, if any.
    #[must_use]
    pub fn permits(&self, opt_in_value: Option<&str>) -> bool {
        match self {
            Self::Always => true,
            Self::OptIn { .. } => {
                opt_in_value.is_some_and(|value| value.trim().eq_ignore_ascii_case(BYPASS_ALLOW_VALUE))
            }
        }
    }
}

/// One inbound content request, stripped of its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    /// Requested listing.
    pub listing_id: String,
    /// Absolute URL of the requested resource, used in challenges.
    pub resource_url: String,
    /// Caller-declared buyer address (`x-buyer-wallet`).
    pub buyer_wallet: Option<String>,
    /// Raw `payment-signature` header value.
    pub payment_signature: Option<String>,
    /// Value of the opt-in bypass header, if the policy names one.
    pub bypass_opt_in: Option<String>,
}

impl AccessRequest {
    /// A request with no buyer, payment or opt-in headers.
    pub fn new(listing_id: impl Into<String>, resource_url: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            resource_url: resource_url.into(),
            buyer_wallet: None,
            payment_signature: None,
            bypass_opt_in: None,
        }
    }

    /// Sets the caller-declared buyer address.
    #[must_use]
    pub fn with_buyer_wallet(mut self, wallet: impl Into<String>) -> Self {
        self.buyer_wallet = Some(wallet.into());
        self
    }

    /// Sets the `payment-signature` header value.
    #[must_use]
    pub fn with_payment_signature(mut self, signature: impl Into<String>) -> Self {
        self.payment_signature = Some(signature.into());
        self
    }

    /// Sets the opt-in bypass header value.
    #[must_use]
    pub fn with_bypass_opt_in(mut self, value: impl Into<String>) -> Self {
        self.bypass_opt_in = Some(value.into());
        self
    }

    fn buyer(&self) -> Option<&str> {
        self.buyer_wallet
            .as_deref()
            .map(str::trim)
            .filter(|wallet| !wallet.is_empty())
    }
}

/// Content released to the caller, with the confirmation to show them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedContent {
    /// The listing's private content.
    pub content: String,
    /// Settlement details, or the bypass that applied.
    pub payment: PaymentResponse,
}

/// Successful outcomes of [`AccessGate::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Content is released.
    Released(ReleasedContent),
    /// The caller must pay first.
    PaymentRequired(PaymentRequired),
}

/// The protocol state machine guarding listing content.
pub struct AccessGate {
    listings: Arc<dyn ListingStore>,
    ledger: Arc<dyn PurchaseLedger>,
    facilitator: Arc<dyn Facilitator>,
    requirements: RequirementBuilder,
    bypass: BypassPolicy,
}

impl fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGate")
            .field("requirements", &self.requirements)
            .field("bypass", &self.bypass)
            .finish_non_exhaustive()
    }
}

impl AccessGate {
    /// Creates a gate with the [`BypassPolicy::Always`] policy.
    pub fn new(
        listings: Arc<dyn ListingStore>,
        ledger: Arc<dyn PurchaseLedger>,
        facilitator: Arc<dyn Facilitator>,
        requirements: RequirementBuilder,
    ) -> Self {
        Self {
            listings,
            ledger,
            facilitator,
            requirements,
            bypass: BypassPolicy::default(),
        }
    }

    /// Replaces the bypass policy.
    #[must_use]
    pub fn with_bypass_policy(mut self, bypass: BypassPolicy) -> Self {
        self.bypass = bypass;
        self
    }

    /// The active bypass policy.
    #[must_use]
    pub const fn bypass_policy(&self) -> &BypassPolicy {
        &self.bypass
    }

    /// The requirement builder challenges are made with.
    #[must_use]
    pub const fn requirements(&self) -> &RequirementBuilder {
        &self.requirements
    }

    /// Runs one request through the gate.
    ///
    /// # Errors
    ///
    /// Returns a [`GateError`] for every terminal state other than released
    /// content or a fresh challenge.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "stackgate.gate.handle", skip_all, fields(listing_id = %request.listing_id))
    )]
    pub async fn handle(&self, request: AccessRequest) -> Result<AccessDecision, GateError> {
        let listing = self
            .listings
            .listing(&request.listing_id)
            .await?
            .ok_or(GateError::NotFound)?;

        let buyer = request.buyer();
        let bypass_permitted = self.bypass.permits(request.bypass_opt_in.as_deref());

        if bypass_permitted
            && buyer.is_some_and(|buyer| buyer.eq_ignore_ascii_case(listing.seller_wallet.trim()))
        {
            #[cfg(feature = "telemetry")]
            tracing::debug!("Seller bypass");
            return Ok(released(listing.content, PaymentResponse::bypassed(Bypass::Seller)));
        }

        if !listing.is_listed {
            return Err(GateError::NotListed);
        }

        if bypass_permitted {
            if let Some(buyer) = buyer {
                if self.has_purchased(&listing, buyer).await {
                    #[cfg(feature = "telemetry")]
                    tracing::debug!("Existing purchase bypass");
                    return Ok(released(
                        listing.content,
                        PaymentResponse::bypassed(Bypass::ExistingPurchase),
                    ));
                }
            }
        }

        let requirements = self.requirements.build(
            &listing.amount_base_units,
            listing.currency,
            &listing.seller_wallet,
        )?;
        let challenge = self
            .requirements
            .challenge(resource_info(&request, &listing), requirements.clone());

        let Some(signature) = request.payment_signature.as_deref() else {
            #[cfg(feature = "telemetry")]
            tracing::info!(
                network = %requirements.network,
                asset = %requirements.asset,
                amount = %requirements.amount,
                pay_to = %requirements.pay_to,
                buyer_wallet = buyer,
                "Payment challenge issued"
            );
            return Ok(AccessDecision::PaymentRequired(challenge));
        };

        let payload = try_decode_payment_payload(signature).map_err(|err| {
            #[cfg(feature = "telemetry")]
            tracing::warn!(error = %err, buyer_wallet = buyer, "Invalid payment-signature header");
            GateError::EnvelopeDecodeFailed(err)
        })?;
        warn_on_drift(&payload, &requirements);

        let outcome = match self.facilitator.settle(&payload, &requirements).await {
            Ok(outcome) => outcome,
            Err(source) => {
                #[cfg(feature = "telemetry")]
                tracing::error!(error = %source, "Settlement facilitator unavailable");
                return Err(GateError::FacilitatorUnavailable {
                    challenge: Box::new(challenge),
                    source,
                });
            }
        };

        if !outcome.success {
            let reason = outcome
                .error_reason
                .clone()
                .unwrap_or_else(|| DEFAULT_SETTLEMENT_FAILURE.to_owned());
            #[cfg(feature = "telemetry")]
            tracing::warn!(
                payer = outcome.payer.as_deref(),
                transaction = outcome.transaction.as_deref(),
                reason = %reason,
                "Payment settlement failed"
            );
            return Err(GateError::SettlementRejected {
                challenge: Box::new(challenge),
                reason,
                transaction: outcome.transaction,
                payer: outcome.payer,
            });
        }

        let purchase = NewPurchase {
            listing_id: listing.id.clone(),
            buyer_wallet: outcome
                .payer
                .as_deref()
                .or(buyer)
                .unwrap_or(UNKNOWN_BUYER)
                .to_owned(),
            currency: listing.currency,
            amount_base_units: requirements.amount.clone(),
            payment_tx: outcome.transaction.clone(),
        };
        match self.ledger.record(purchase).await {
            Ok(_record_id) => {
                #[cfg(feature = "telemetry")]
                tracing::info!(
                    record_id = %_record_id,
                    payer = outcome.payer.as_deref(),
                    transaction = outcome.transaction.as_deref(),
                    "Purchase recorded"
                );
            }
            Err(_err) => {
                #[cfg(feature = "telemetry")]
                tracing::error!(
                    error = %_err,
                    payer = outcome.payer.as_deref(),
                    transaction = outcome.transaction.as_deref(),
                    "Purchase record insert failed"
                );
            }
        }

        Ok(released(listing.content, outcome.payment_response()))
    }

    /// Prior-purchase lookup. A failing ledger reads as "no purchase" so the
    /// caller is challenged rather than served for free.
    async fn has_purchased(&self, listing: &Listing, buyer: &str) -> bool {
        match self.ledger.exists(&listing.id, buyer).await {
            Ok(found) => found,
            Err(_err) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(error = %_err, "Prior-purchase lookup failed");
                false
            }
        }
    }
}

fn released(content: String, payment: PaymentResponse) -> AccessDecision {
    AccessDecision::Released(ReleasedContent { content, payment })
}

fn resource_info(request: &AccessRequest, listing: &Listing) -> ResourceInfo {
    ResourceInfo {
        url: request.resource_url.clone(),
        description: Some(format!("Unlock premium content for \"{}\"", listing.title)),
        mime_type: Some(CONTENT_MIME_TYPE.to_owned()),
    }
}

/// Settlement always uses the listing's current terms. A payload that
/// accepted different terms (the price changed after the challenge) is only
/// logged; the facilitator decides whether the signed transaction still pays
/// enough.
fn warn_on_drift(payload: &PaymentPayload, expected: &PaymentRequirements) {
    let accepted = &payload.accepted;
    if accepted.same_terms(expected) {
        return;
    }
    #[cfg(feature = "telemetry")]
    tracing::warn!(
        accepted_amount = %accepted.amount,
        expected_amount = %expected.amount,
        accepted_pay_to = %accepted.pay_to,
        expected_pay_to = %expected.pay_to,
        "Payment payload accepted different terms than the current listing"
    );
}
