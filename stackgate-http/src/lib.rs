#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport for the stackgate x402 content gate.
//!
//! Provides header encoding/decoding, constants, and (feature-gated) the
//! axum access gate that guards listing content behind Stacks payments.
//!
//! # Modules
//!
//! - [`constants`]: HTTP header names, status codes, default URLs
//! - [`headers`]: Base64 encoding/decoding for x402 HTTP headers
//! - [`error`]: HTTP transport error types
//! - [`server`]: access gate, facilitator client and routes (feature: `server`)

pub mod constants;
pub mod error;
pub mod headers;

#[cfg(feature = "server")]
pub mod server;
