//! Conversion between human-readable display amounts and atomic base units.
//!
//! Prices are stored and settled as integer base units encoded as decimal
//! strings, so arbitrarily large amounts never pass through a float. The
//! currency only decides the fixed-point scale used when a price is shown to
//! a person or typed in by one.
//!
//! ```rust
//! use stackgate::amount::{Currency, to_atomic, to_display};
//!
//! let atomic = to_atomic("0.5", Currency::Stx).unwrap();
//! assert_eq!(atomic.as_str(), "500000");
//! assert_eq!(to_display(&atomic, Currency::Stx), "0.5");
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

static DISPLAY_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("valid display amount pattern"));

/// Errors produced by the amount codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    /// The display string is not a plain non-negative decimal.
    #[error("Invalid amount format: {0:?}")]
    InvalidAmountFormat(String),
    /// The value is not a non-negative integer string.
    #[error("Amount must be an integer string in base units: {0:?}")]
    NotAnInteger(String),
}

/// Currencies a listing can be priced in.
///
/// The set is closed. Each currency fixes the number of decimal places used
/// for display conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// Native Stacks token, 6 decimals (micro-STX).
    #[serde(rename = "STX")]
    Stx,
    /// Bitcoin-backed sBTC token, 8 decimals (satoshis).
    #[serde(rename = "SBTC")]
    Sbtc,
}

impl Currency {
    /// Number of decimal places between the display unit and the base unit.
    #[must_use]
    pub const fn decimals(self) -> usize {
        match self {
            Self::Stx => 6,
            Self::Sbtc => 8,
        }
    }

    /// Currency code as stored and sent on the wire.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Stx => "STX",
            Self::Sbtc => "SBTC",
        }
    }

    /// Normalises a stored currency column.
    ///
    /// Matching is case-insensitive and anything that is not sBTC is treated
    /// as STX, which is how rows written by older tooling are interpreted.
    #[must_use]
    pub fn from_stored(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("SBTC") {
            Self::Sbtc
        } else {
            Self::Stx
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned when a currency code is not recognised.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown currency {0:?}")]
pub struct UnknownCurrency(String);

impl FromStr for Currency {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STX" => Ok(Self::Stx),
            "SBTC" => Ok(Self::Sbtc),
            _ => Err(UnknownCurrency(s.to_owned())),
        }
    }
}

/// A non-negative integer amount in a currency's base units.
///
/// Always held in canonical form: ASCII digits without leading zeros, and
/// `"0"` for zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtomicAmount(String);

impl AtomicAmount {
    /// Parses an integer string, stripping surrounding whitespace and leading zeros.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::NotAnInteger`] if the value is empty or contains
    /// anything other than ASCII digits (signs and decimal points included).
    pub fn parse(value: &str) -> Result<Self, AmountError> {
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::NotAnInteger(value.to_owned()));
        }
        Ok(Self::from_digits(trimmed))
    }

    fn from_digits(digits: &str) -> Self {
        let stripped = digits.trim_start_matches('0');
        if stripped.is_empty() {
            Self("0".to_owned())
        } else {
            Self(stripped.to_owned())
        }
    }

    /// Returns the canonical decimal string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the zero amount.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == "0"
    }

    /// Consumes the amount and returns the canonical string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AtomicAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AtomicAmount {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for AtomicAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for AtomicAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AtomicAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Converts a display amount such as `"1.25"` into atomic base units.
///
/// Fractional digits beyond the currency's precision are truncated rather
/// than rounded, so the buyer is never charged more than the displayed price.
///
/// # Errors
///
/// Returns [`AmountError::InvalidAmountFormat`] if the trimmed input does not
/// match `^\d+(\.\d+)?$`.
pub fn to_atomic(display: &str, currency: Currency) -> Result<AtomicAmount, AmountError> {
    let normalized = display.trim();
    if !DISPLAY_AMOUNT.is_match(normalized) {
        return Err(AmountError::InvalidAmountFormat(display.to_owned()));
    }

    let decimals = currency.decimals();
    let (whole, fraction) = normalized.split_once('.').unwrap_or((normalized, ""));
    let mut digits = String::with_capacity(whole.len() + decimals);
    digits.push_str(whole);
    let kept = &fraction[..fraction.len().min(decimals)];
    digits.push_str(kept);
    digits.extend(std::iter::repeat_n('0', decimals - kept.len()));

    Ok(AtomicAmount::from_digits(&digits))
}

/// Formats atomic base units as a display amount.
///
/// Trailing fractional zeros are dropped, and the decimal point is omitted
/// when nothing remains after it.
#[must_use]
pub fn to_display(atomic: &AtomicAmount, currency: Currency) -> String {
    let decimals = currency.decimals();
    let raw = atomic.as_str();
    let width = decimals + 1;
    let padded = if raw.len() < width {
        format!("{raw:0>width$}")
    } else {
        raw.to_owned()
    };

    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_owned()
    } else {
        format!("{whole}.{fraction}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atomic(s: &str) -> AtomicAmount {
        AtomicAmount::parse(s).unwrap()
    }

    #[test]
    fn test_half_stx_round_trip() {
        assert_eq!(to_display(&atomic("500000"), Currency::Stx), "0.5");
        assert_eq!(to_atomic("0.5", Currency::Stx).unwrap().as_str(), "500000");
    }

    #[test]
    fn test_to_atomic_scales_by_currency() {
        assert_eq!(to_atomic("1", Currency::Stx).unwrap().as_str(), "1000000");
        assert_eq!(to_atomic("1", Currency::Sbtc).unwrap().as_str(), "100000000");
        assert_eq!(to_atomic("0.1", Currency::Stx).unwrap().as_str(), "100000");
        assert_eq!(to_atomic("0.00000001", Currency::Sbtc).unwrap().as_str(), "1");
    }

    #[test]
    fn test_to_atomic_truncates_excess_precision() {
        assert_eq!(to_atomic("0.1234567", Currency::Stx).unwrap().as_str(), "123456");
        assert_eq!(to_atomic("0.0000009", Currency::Stx).unwrap().as_str(), "0");
    }

    #[test]
    fn test_to_atomic_strips_leading_zeros_and_trims() {
        assert_eq!(to_atomic(" 007.5 ", Currency::Stx).unwrap().as_str(), "7500000");
        assert_eq!(to_atomic("0", Currency::Stx).unwrap().as_str(), "0");
        assert_eq!(to_atomic("0.000", Currency::Sbtc).unwrap().as_str(), "0");
    }

    #[test]
    fn test_to_atomic_rejects_malformed_input() {
        for bad in ["", "-1", "1.", ".5", "1,5", "abc", "1e6", "+2", "1.2.3"] {
            assert_eq!(
                to_atomic(bad, Currency::Stx),
                Err(AmountError::InvalidAmountFormat(bad.to_owned())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_to_display_pads_and_trims() {
        assert_eq!(to_display(&atomic("1"), Currency::Stx), "0.000001");
        assert_eq!(to_display(&atomic("0"), Currency::Stx), "0");
        assert_eq!(to_display(&atomic("1000000"), Currency::Stx), "1");
        assert_eq!(to_display(&atomic("123450000"), Currency::Sbtc), "1.2345");
        assert_eq!(
            to_display(&atomic("340282366920938463463374607431768211456"), Currency::Stx),
            "340282366920938463463374607431768.211456"
        );
    }

    #[test]
    fn test_display_round_trip_is_lossless_for_atomic_values() {
        for raw in ["1", "10", "999999", "1000001", "500000", "98765432123456789"] {
            for currency in [Currency::Stx, Currency::Sbtc] {
                let value = atomic(raw);
                let shown = to_display(&value, currency);
                assert_eq!(to_atomic(&shown, currency).unwrap(), value, "{raw} {currency}");
            }
        }
    }

    #[test]
    fn test_atomic_round_trip_drops_trailing_fraction_zeros() {
        let value = to_atomic("2.500", Currency::Sbtc).unwrap();
        assert_eq!(to_display(&value, Currency::Sbtc), "2.5");
        let value = to_atomic("3.000000", Currency::Stx).unwrap();
        assert_eq!(to_display(&value, Currency::Stx), "3");
    }

    #[test]
    fn test_atomic_amount_parse() {
        assert_eq!(atomic("000120").as_str(), "120");
        assert!(atomic("0000").is_zero());
        assert!(AtomicAmount::parse("-5").is_err());
        assert!(AtomicAmount::parse("1.5").is_err());
        assert!(AtomicAmount::parse("").is_err());
    }

    #[test]
    fn test_atomic_amount_serde_as_string() {
        let value: AtomicAmount = serde_json::from_str("\"0042\"").unwrap();
        assert_eq!(serde_json::to_string(&value).unwrap(), "\"42\"");
        assert!(serde_json::from_str::<AtomicAmount>("\"4.2\"").is_err());
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!("sbtc".parse::<Currency>().unwrap(), Currency::Sbtc);
        assert_eq!("STX".parse::<Currency>().unwrap(), Currency::Stx);
        assert!("BTC".parse::<Currency>().is_err());
        assert_eq!(Currency::from_stored("sBTC"), Currency::Sbtc);
        assert_eq!(Currency::from_stored("whatever"), Currency::Stx);
        assert_eq!(serde_json::to_string(&Currency::Sbtc).unwrap(), "\"SBTC\"");
    }
}
