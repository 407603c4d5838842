#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for gating content behind x402 payments on Stacks.
//!
//! A seller lists an item priced in a Stacks-native currency. A buyer has to
//! present a settled payment before the item's private content is released.
//! This crate holds everything about that flow that does not depend on a
//! transport: amounts, networks, wire types, payment requirements, and the
//! seams for the settlement facilitator and the persistent stores.
//!
//! # Modules
//!
//! - [`amount`] - Conversion between display decimals and atomic base units
//! - [`chain`] - CAIP-2 chain identifiers
//! - [`networks`] - Stacks networks, address rules and asset identifiers
//! - [`proto`] - x402 v2 wire format types and base64 helpers
//! - [`requirements`] - Builder for the canonical terms of payment
//! - [`extract`] - Ordered extraction strategies over facilitator responses
//! - [`facilitator`] - Settlement facilitator seam and outcome type
//! - [`store`] - Listing store and purchase ledger seams, plus an in-memory store
//! - [`timestamp`] - Unix timestamps for purchase records
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation

pub mod amount;
pub mod chain;
pub mod extract;
pub mod facilitator;
pub mod networks;
pub mod proto;
pub mod requirements;
pub mod store;
pub mod timestamp;

pub use amount::{AmountError, AtomicAmount, Currency};
pub use chain::ChainId;
pub use facilitator::{BoxFuture, Facilitator, FacilitatorUnavailable, SettlementOutcome};
pub use networks::StacksNetwork;
pub use requirements::{RequirementBuilder, RequirementError};
pub use store::{
    Listing, ListingStore, MemoryStore, NewPurchase, PurchaseLedger, PurchaseRecord, RecordId,
    StorageError,
};
