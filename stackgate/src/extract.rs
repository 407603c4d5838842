//! Ordered extraction strategies over loosely-shaped JSON responses.
//!
//! Facilitators and wallets do not agree on where they put the transaction
//! reference, the payer or a failure reason. Each field is read through a
//! fixed list of [`Strategy`] functions, tried in order; the first one that
//! yields a non-empty string wins.
//!
//! ```rust
//! use serde_json::json;
//! use stackgate::extract;
//!
//! let body = json!({ "result": { "txid": "0xabc" }, "sender": "SP..." });
//! assert_eq!(extract::transaction(&body).as_deref(), Some("0xabc"));
//! assert_eq!(extract::payer(&body).as_deref(), Some("SP..."));
//! ```

use serde_json::Value;

/// A pure function reading one candidate location of a response.
pub type Strategy = fn(&Value) -> Option<&str>;

/// Where a transaction reference may be found, in priority order.
pub const TRANSACTION_STRATEGIES: &[Strategy] = &[
    top_transaction,
    top_tx_id,
    top_txid,
    result_transaction,
    result_tx_id,
    result_txid,
];

/// Where the paying address may be found, in priority order.
pub const PAYER_STRATEGIES: &[Strategy] =
    &[top_payer, top_payer_address, top_sender, result_payer, result_sender];

/// Where a human-readable failure reason may be found, in priority order.
pub const REASON_STRATEGIES: &[Strategy] = &[
    top_error_reason,
    top_error_reason_snake,
    top_error,
    top_error_message,
    top_message,
];

/// Where the settled network may be found, in priority order.
pub const NETWORK_STRATEGIES: &[Strategy] = &[top_network, result_network];

macro_rules! top_level {
    ($($name:ident => $key:literal),+ $(,)?) => {
        $(
            fn $name(value: &Value) -> Option<&str> {
                field(value, $key)
            }
        )+
    };
}

macro_rules! under_result {
    ($($name:ident => $key:literal),+ $(,)?) => {
        $(
            fn $name(value: &Value) -> Option<&str> {
                field(value.get("result")?, $key)
            }
        )+
    };
}

top_level! {
    top_transaction => "transaction",
    top_tx_id => "txId",
    top_txid => "txid",
    top_payer => "payer",
    top_payer_address => "payerAddress",
    top_sender => "sender",
    top_error_reason => "errorReason",
    top_error_reason_snake => "error_reason",
    top_error => "error",
    top_error_message => "errorMessage",
    top_message => "message",
    top_network => "network",
}

under_result! {
    result_transaction => "transaction",
    result_tx_id => "txId",
    result_txid => "txid",
    result_payer => "payer",
    result_sender => "sender",
    result_network => "network",
}

/// Runs `strategies` in order and returns the first match.
#[must_use]
pub fn first_match(value: &Value, strategies: &[Strategy]) -> Option<String> {
    strategies
        .iter()
        .find_map(|strategy| strategy(value))
        .map(str::to_owned)
}

/// Extracts the transaction reference.
#[must_use]
pub fn transaction(value: &Value) -> Option<String> {
    first_match(value, TRANSACTION_STRATEGIES)
}

/// Extracts the paying address.
#[must_use]
pub fn payer(value: &Value) -> Option<String> {
    first_match(value, PAYER_STRATEGIES)
}

/// Extracts a failure reason.
#[must_use]
pub fn reason(value: &Value) -> Option<String> {
    first_match(value, REASON_STRATEGIES)
}

/// Extracts the settled network.
#[must_use]
pub fn network(value: &Value) -> Option<String> {
    first_match(value, NETWORK_STRATEGIES)
}

fn field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key)?.as_str().filter(|s| !s.is_empty())
}
