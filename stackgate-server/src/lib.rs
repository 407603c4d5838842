//! Stackgate content server.
//!
//! Serves listing content behind the x402 access gate, settling payments
//! through a remote Stacks facilitator and recording purchases in SQLite.
//!
//! # Modules
//!
//! - [`config`]: server configuration with environment variable expansion
//! - [`store`]: SQLite listing store and purchase ledger

pub mod config;
pub mod store;

pub use config::{ConfigError, ServerConfig, StorageBackend};
pub use store::SqliteStore;
