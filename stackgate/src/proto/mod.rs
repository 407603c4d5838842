//! Protocol types for x402 payment messages.
//!
//! This module defines the wire format exchanged between the buyer, the
//! content server and the settlement facilitator. Only protocol version 2 is
//! spoken: networks are CAIP-2 chain ids and requirements are structured.
//!
//! # Key Types
//!
//! - [`PaymentRequired`] - The 402 challenge sent to the buyer
//! - [`PaymentRequirements`] - One accepted way to pay
//! - [`PaymentPayload`] - The buyer's signed payment envelope
//! - [`SettleRequest`] - Body posted to the facilitator's `/settle` endpoint
//! - [`PaymentResponse`] - Confirmation attached to released content
//!
//! # Wire Format
//!
//! All types serialize to JSON using camelCase field names. The protocol version
//! is indicated by the `x402Version` field.

mod encoding;
pub mod v2;

pub use encoding::Base64Bytes;
pub use v2::{
    Bypass, InvalidPayload, PaymentPayload, PaymentRequired, PaymentRequirements,
    PaymentResponse, ResourceInfo, SettleRequest,
};

/// The protocol version this crate speaks.
pub const X402_VERSION: u32 = 2;

/// The only payment scheme offered: pay exactly the listed amount.
pub const EXACT_SCHEME: &str = "exact";
