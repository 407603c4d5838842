//! Construction of the canonical terms of payment for a listing.
//!
//! A [`RequirementBuilder`] is configured once with the active network and
//! payment policy, then turns a listing's price, currency and seller into
//! [`PaymentRequirements`] for every request. Construction is pure: the same
//! listing always yields the same requirements.
//!
//! ```rust
//! use stackgate::{Currency, RequirementBuilder, StacksNetwork};
//!
//! let builder = RequirementBuilder::for_network(StacksNetwork::Testnet);
//! let requirements = builder
//!     .build("0.5", Currency::Stx, "ST16K4ZYM14WPG9GZQ5BPXNQAEVTJPRMA4VWJCXYY")
//!     .unwrap();
//! assert_eq!(requirements.amount, "500000");
//! assert_eq!(requirements.network, "stacks:2147483648");
//! ```

use crate::amount::{AmountError, AtomicAmount, Currency, to_atomic};
use crate::networks::{StacksNetwork, is_valid_network_id};
use crate::proto::{EXACT_SCHEME, PaymentRequired, PaymentRequirements, ResourceInfo, X402_VERSION};

/// Default validity window offered to buyers, in seconds.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 300;

/// Error message carried by freshly issued challenges.
pub const PAYMENT_REQUIRED_MESSAGE: &str = "Payment required";

/// Errors raised while building payment requirements.
///
/// These indicate bad listing data or configuration rather than anything the
/// buyer did.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequirementError {
    /// The price is zero, negative, or not a number.
    #[error("Invalid amount {amount:?}: {reason}")]
    InvalidAmount {
        /// The rejected amount as given.
        amount: String,
        /// What was wrong with it.
        reason: String,
    },
    /// The network is not a `stacks:<chain-id>` identifier.
    #[error("Invalid Stacks network {0:?}")]
    InvalidNetwork(String),
    /// The payee is not an address on the configured network.
    #[error("Invalid payTo address {0:?} for the configured network")]
    InvalidPayee(String),
}

impl RequirementError {
    fn invalid_amount(amount: &str, reason: impl ToString) -> Self {
        Self::InvalidAmount {
            amount: amount.to_owned(),
            reason: reason.to_string(),
        }
    }
}

impl From<AmountError> for RequirementError {
    fn from(err: AmountError) -> Self {
        let amount = match &err {
            AmountError::InvalidAmountFormat(value) | AmountError::NotAnInteger(value) => {
                value.clone()
            }
        };
        Self::invalid_amount(&amount, err)
    }
}

/// Builds [`PaymentRequirements`] and challenges for one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementBuilder {
    network: String,
    kind: StacksNetwork,
    max_timeout_seconds: u64,
    sbtc_asset: Option<String>,
}

impl RequirementBuilder {
    /// Creates a builder for a CAIP-2 network identifier such as `stacks:1`.
    ///
    /// # Errors
    ///
    /// Returns [`RequirementError::InvalidNetwork`] if `network` does not match
    /// `stacks:<numeric chain id>`.
    pub fn new(network: &str) -> Result<Self, RequirementError> {
        let network = network.trim();
        if !is_valid_network_id(network) {
            return Err(RequirementError::InvalidNetwork(network.to_owned()));
        }
        let kind = network
            .parse::<StacksNetwork>()
            .map_err(|_| RequirementError::InvalidNetwork(network.to_owned()))?;
        Ok(Self {
            network: network.to_owned(),
            kind,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
            sbtc_asset: None,
        })
    }

    /// Creates a builder for one of the well-known Stacks networks.
    #[must_use]
    pub fn for_network(network: StacksNetwork) -> Self {
        Self {
            network: network.chain_id().to_string(),
            kind: network,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
            sbtc_asset: None,
        }
    }

    /// Sets the validity window offered to buyers.
    #[must_use]
    pub const fn with_max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    /// Replaces the built-in sBTC token contract.
    #[must_use]
    pub fn with_sbtc_asset(mut self, asset: impl Into<String>) -> Self {
        self.sbtc_asset = Some(asset.into());
        self
    }

    /// The CAIP-2 network identifier requirements are built for.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// The address family of the configured network.
    #[must_use]
    pub const fn stacks_network(&self) -> StacksNetwork {
        self.kind
    }

    /// The validity window offered to buyers.
    #[must_use]
    pub const fn max_timeout_seconds(&self) -> u64 {
        self.max_timeout_seconds
    }

    /// The asset identifier a price in `currency` settles in.
    #[must_use]
    pub fn asset(&self, currency: Currency) -> String {
        self.kind.asset_for(currency, self.sbtc_asset.as_deref())
    }

    /// Builds the terms of payment for a price.
    ///
    /// `amount` is normally an atomic integer string. A value containing a
    /// decimal point is treated as a display amount and converted first.
    ///
    /// # Errors
    ///
    /// Returns [`RequirementError::InvalidAmount`] for a zero or malformed
    /// amount and [`RequirementError::InvalidPayee`] if `pay_to` is not an
    /// address on the configured network.
    pub fn build(
        &self,
        amount: &str,
        currency: Currency,
        pay_to: &str,
    ) -> Result<PaymentRequirements, RequirementError> {
        let amount = normalize_amount(amount, currency)?;

        let pay_to = pay_to.trim();
        if !self.kind.is_valid_address(pay_to) {
            return Err(RequirementError::InvalidPayee(pay_to.to_owned()));
        }

        Ok(PaymentRequirements {
            scheme: EXACT_SCHEME.to_owned(),
            network: self.network.clone(),
            amount: amount.into_string(),
            asset: self.asset(currency),
            pay_to: pay_to.to_owned(),
            max_timeout_seconds: self.max_timeout_seconds,
            extra: None,
        })
    }

    /// Wraps requirements in a fresh challenge for `resource`.
    #[must_use]
    pub fn challenge(
        &self,
        resource: ResourceInfo,
        requirements: PaymentRequirements,
    ) -> PaymentRequired {
        PaymentRequired {
            x402_version: X402_VERSION,
            error: Some(PAYMENT_REQUIRED_MESSAGE.to_owned()),
            resource,
            accepts: vec![requirements],
        }
    }
}

fn normalize_amount(amount: &str, currency: Currency) -> Result<AtomicAmount, RequirementError> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err(RequirementError::invalid_amount(amount, "amount is required"));
    }
    let atomic = if trimmed.contains('.') {
        to_atomic(trimmed, currency)?
    } else {
        AtomicAmount::parse(trimmed)?
    };
    if atomic.is_zero() {
        return Err(RequirementError::invalid_amount(
            amount,
            "amount must be a positive integer in base units",
        ));
    }
    Ok(atomic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::SBTC_CONTRACT_TESTNET;

    const PAYEE: &str = "ST16K4ZYM14WPG9GZQ5BPXNQAEVTJPRMA4VWJCXYY";

    fn testnet() -> RequirementBuilder {
        RequirementBuilder::for_network(StacksNetwork::Testnet)
    }

    #[test]
    fn test_build_from_atomic_amount() {
        let req = testnet().build("500000", Currency::Stx, PAYEE).unwrap();
        assert_eq!(req.scheme, "exact");
        assert_eq!(req.network, "stacks:2147483648");
        assert_eq!(req.amount, "500000");
        assert_eq!(req.asset, "STX");
        assert_eq!(req.pay_to, PAYEE);
        assert_eq!(req.max_timeout_seconds, 300);
    }

    #[test]
    fn test_build_normalizes_display_and_padded_amounts() {
        let builder = testnet();
        assert_eq!(builder.build("0.5", Currency::Stx, PAYEE).unwrap().amount, "500000");
        assert_eq!(builder.build("0.001", Currency::Sbtc, PAYEE).unwrap().amount, "100000");
        assert_eq!(builder.build("000250", Currency::Stx, PAYEE).unwrap().amount, "250");
    }

    #[test]
    fn test_build_rejects_bad_amounts() {
        let builder = testnet();
        for bad in ["", "0", "000", "0.0", "-5", "abc", "1.", "0.0000001"] {
            let err = builder.build(bad, Currency::Stx, PAYEE).unwrap_err();
            assert!(
                matches!(err, RequirementError::InvalidAmount { .. }),
                "{bad:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_build_rejects_payee_from_other_network() {
        let err = testnet()
            .build("1", Currency::Stx, "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7")
            .unwrap_err();
        assert!(matches!(err, RequirementError::InvalidPayee(_)));

        let err = testnet().build("1", Currency::Stx, "not-an-address").unwrap_err();
        assert!(matches!(err, RequirementError::InvalidPayee(_)));
    }

    #[test]
    fn test_build_trims_payee() {
        let req = testnet().build("1", Currency::Stx, &format!("  {PAYEE} ")).unwrap();
        assert_eq!(req.pay_to, PAYEE);
    }

    #[test]
    fn test_new_validates_network() {
        assert!(RequirementBuilder::new("stacks:1").is_ok());
        for bad in ["", "stacks", "stacks:abc", "eip155:8453", "mainnet"] {
            assert_eq!(
                RequirementBuilder::new(bad),
                Err(RequirementError::InvalidNetwork(bad.to_owned()))
            );
        }
    }

    #[test]
    fn test_sbtc_asset_resolution_and_override() {
        let req = testnet().build("100", Currency::Sbtc, PAYEE).unwrap();
        assert_eq!(req.asset, SBTC_CONTRACT_TESTNET);

        let custom = "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM.my-sbtc";
        let req = testnet()
            .with_sbtc_asset(custom)
            .build("100", Currency::Sbtc, PAYEE)
            .unwrap();
        assert_eq!(req.asset, custom);
    }

    #[test]
    fn test_custom_timeout() {
        let req = testnet()
            .with_max_timeout_seconds(60)
            .build("1", Currency::Stx, PAYEE)
            .unwrap();
        assert_eq!(req.max_timeout_seconds, 60);
    }

    #[test]
    fn test_challenge_wraps_single_requirement() {
        let builder = testnet();
        let req = builder.build("500000", Currency::Stx, PAYEE).unwrap();
        let resource = ResourceInfo {
            url: "https://example.com/api/content/1".into(),
            description: Some("Unlock".into()),
            mime_type: Some("application/json".into()),
        };
        let challenge = builder.challenge(resource, req.clone());
        assert_eq!(challenge.x402_version, 2);
        assert_eq!(challenge.error.as_deref(), Some("Payment required"));
        assert_eq!(challenge.accepts, vec![req]);
    }
}
