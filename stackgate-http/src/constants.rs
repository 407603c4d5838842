//! HTTP-specific constants for the x402 content gate.

/// HTTP header carrying the buyer's payment envelope (client → server).
pub const PAYMENT_SIGNATURE_HEADER: &str = "payment-signature";

/// HTTP header carrying the 402 challenge (server → client).
pub const PAYMENT_REQUIRED_HEADER: &str = "payment-required";

/// HTTP header carrying the settlement confirmation (server → client).
pub const PAYMENT_RESPONSE_HEADER: &str = "payment-response";

/// HTTP header carrying the caller-declared buyer address.
pub const BUYER_WALLET_HEADER: &str = "x-buyer-wallet";

/// Value the opt-in bypass header must carry, compared case-insensitively.
pub const BYPASS_ALLOW_VALUE: &str = "allow";

/// Seconds a client should wait before retrying when the facilitator is down.
pub const FACILITATOR_RETRY_AFTER_SECS: u64 = 5;

/// Default Stacks x402 facilitator service URL.
pub const DEFAULT_FACILITATOR_URL: &str = "https://facilitator.stacksx402.com";
