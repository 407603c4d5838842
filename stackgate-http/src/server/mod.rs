//! Axum access gate for listing content paid in STX or sBTC.
//!
//! A request for `/api/content/{id}` is walked through [`AccessGate::handle`]:
//! the seller and returning buyers get the content straight away, everyone
//! else gets a `402 Payment Required` challenge until they retry with a
//! `payment-signature` header that the facilitator settles.
//!
//! Settlement always happens **before** content is released, and the price
//! is always taken from the listing store, never from the client.
//!
//! For low-level interaction with the facilitator, see
//! [`facilitator_client::FacilitatorClient`].

pub mod error;
pub mod facilitator_client;
pub mod gate;
pub mod response;
pub mod routes;

pub use error::GateError;
pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
pub use gate::{AccessDecision, AccessGate, AccessRequest, BypassPolicy, ReleasedContent};
pub use routes::{AppState, router};
