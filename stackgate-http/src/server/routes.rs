//! Axum routes for the gated content endpoint and the x402 discovery document.
//!
//! - `GET /api/content/{id}`: the [`AccessGate`] for one listing
//! - `GET /api/x402/schema`: machine-readable description of the paid
//!   endpoint for x402 indexers

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use http::header::{CACHE_CONTROL, HOST};
use http::{HeaderMap, HeaderValue, Uri};
use serde_json::{Value, json};
use stackgate::amount::Currency;
use stackgate::proto::{EXACT_SCHEME, X402_VERSION};
use url::Url;

use super::gate::{AccessGate, AccessRequest, CONTENT_MIME_TYPE};
use super::response::apply_gate_headers;
use crate::constants::{BUYER_WALLET_HEADER, PAYMENT_SIGNATURE_HEADER};

/// Route of the gated content endpoint.
pub const CONTENT_ROUTE: &str = "/api/content/{id}";

/// Route of the discovery document.
pub const SCHEMA_ROUTE: &str = "/api/x402/schema";

/// `Cache-Control` of the discovery document.
pub const SCHEMA_CACHE_CONTROL: &str = "public, max-age=3600";

const DEFAULT_SERVICE_NAME: &str = "stackgate";
const DEFAULT_SERVICE_DESCRIPTION: &str =
    "Pay-per-item content priced in STX or sBTC, unlocked through the x402 payment protocol.";

/// Shared state of the router.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The gate every content request goes through.
    pub gate: Arc<AccessGate>,
    /// Public origin used to build resource URLs, e.g. `https://shop.example`.
    pub public_base_url: Option<Url>,
    /// Service name advertised in the discovery document.
    pub service_name: String,
    /// Service description advertised in the discovery document.
    pub service_description: String,
}

impl AppState {
    /// State with no public base URL and the default service description.
    pub fn new(gate: Arc<AccessGate>) -> Self {
        Self {
            gate,
            public_base_url: None,
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            service_description: DEFAULT_SERVICE_DESCRIPTION.to_owned(),
        }
    }

    /// Sets the public origin resource URLs are built from.
    #[must_use]
    pub fn with_public_base_url(mut self, url: Url) -> Self {
        self.public_base_url = Some(url);
        self
    }

    /// Sets the name and description advertised for discovery.
    #[must_use]
    pub fn with_service_info(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.service_name = name.into();
        self.service_description = description.into();
        self
    }

    /// Public origin without a trailing slash, falling back to the `Host`
    /// header of the request.
    fn origin(&self, headers: &HeaderMap) -> String {
        if let Some(base) = &self.public_base_url {
            return base.as_str().trim_end_matches('/').to_owned();
        }
        let host = header(headers, HOST.as_str()).unwrap_or_else(|| "localhost".to_owned());
        #[cfg(feature = "telemetry")]
        tracing::warn!(
            host = %host,
            "public_base_url is not configured; using the Host header as origin for resource URLs"
        );
        format!("http://{host}")
    }
}

/// Builds the router serving the content gate and the discovery document.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(CONTENT_ROUTE, get(get_content))
        .route(SCHEMA_ROUTE, get(get_schema))
        .with_state(state)
}

/// `GET /api/content/{id}`: runs the request through the gate.
pub async fn get_content(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path_and_query = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_owned(), ToString::to_string);
    let resource_url = format!("{}{path_and_query}", state.origin(&headers));

    let opt_in_header = state.gate.bypass_policy().header();
    let request = AccessRequest {
        listing_id,
        resource_url,
        buyer_wallet: header(&headers, BUYER_WALLET_HEADER),
        payment_signature: raw_header(&headers, PAYMENT_SIGNATURE_HEADER),
        bypass_opt_in: opt_in_header.and_then(|name| header(&headers, name)),
    };

    let mut response = match state.gate.handle(request).await {
        Ok(decision) => decision.into_response(),
        Err(err) => err.into_response(),
    };
    apply_gate_headers(response.headers_mut(), opt_in_header);
    response
}

/// `GET /api/x402/schema`: the discovery document.
pub async fn get_schema(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let document = discovery_document(&state, &state.origin(&headers));
    (
        [(CACHE_CONTROL, HeaderValue::from_static(SCHEMA_CACHE_CONTROL))],
        Json(document),
    )
        .into_response()
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

/// Reads a header whatever bytes it carries, so a present but non-ASCII
/// value still reaches envelope validation.
fn raw_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}

fn discovery_document(state: &AppState, origin: &str) -> Value {
    let requirements = state.gate.requirements();
    let network = requirements.network();
    let accepts = json!({
        "scheme": EXACT_SCHEME,
        "network": network,
        "resource": format!("{origin}{CONTENT_ROUTE}"),
        "description": "Purchase and access listing content. Price varies per listing. \
            First-time purchase required; subsequent access is free for buyers and sellers.",
        "mimeType": CONTENT_MIME_TYPE,
        "asset": requirements.asset(Currency::Stx),
        "maxTimeoutSeconds": requirements.max_timeout_seconds(),
        "outputSchema": {
            "input": input_schema(),
            "output": output_schema(network),
        }
    });
    json!({
        "x402Version": X402_VERSION,
        "name": state.service_name,
        "description": state.service_description,
        "accepts": [accepts],
    })
}

fn input_schema() -> Value {
    let path_params = json!({
        "id": {
            "type": "string",
            "description": "Listing identifier",
            "required": true,
        }
    });
    let headers = json!({
        BUYER_WALLET_HEADER: {
            "type": "string",
            "description": "Buyer's Stacks address (optional, enables free access for prior purchases)",
            "required": false,
        },
        PAYMENT_SIGNATURE_HEADER: {
            "type": "string",
            "format": "base64",
            "description": "Base64-encoded signed x402 payment payload. Absent on the first \
                request; sent on the paid retry after a 402 challenge",
            "required": false,
        }
    });
    json!({
        "type": "request",
        "method": "GET",
        "pathParams": path_params,
        "headers": headers,
    })
}

fn output_schema(network: &str) -> Value {
    let payment = json!({
        "success": { "type": "boolean" },
        "transaction": {
            "type": "string",
            "description": "Stacks transaction id (0x-prefixed)",
        },
        "payer": {
            "type": "string",
            "description": "Buyer's Stacks address",
        },
        "network": {
            "type": "string",
            "description": "CAIP-2 network identifier",
            "example": network,
        },
        "bypass": {
            "type": "string",
            "description": "Reason payment was skipped, if it was",
            "enum": ["seller", "existing_purchase"],
        }
    });
    json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "string",
                "description": "The listing content unlocked after payment",
            },
            "payment": {
                "type": "object",
                "description": "Payment confirmation details",
                "properties": payment,
            }
        },
        "required": ["content", "payment"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use base64::prelude::*;
    use http::header::{RETRY_AFTER, VARY};
    use http::{Request, StatusCode};
    use stackgate::facilitator::{
        BoxFuture, Facilitator, FacilitatorUnavailable, SettlementOutcome,
    };
    use stackgate::networks::StacksNetwork;
    use stackgate::proto::{PaymentPayload, PaymentRequirements};
    use stackgate::requirements::RequirementBuilder;
    use stackgate::store::{Listing, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    use crate::constants::{PAYMENT_REQUIRED_HEADER, PAYMENT_RESPONSE_HEADER};
    use crate::headers::{decode_challenge, decode_payment_response};
    use crate::server::gate::BypassPolicy;

    const SELLER: &str = "ST16K4ZYM14WPG9GZQ5BPXNQAEVTJPRMA4VWJCXYY";
    const BUYER: &str = "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM";
    const BASE: &str = "https://shop.example";

    struct StubFacilitator {
        answer: Result<SettlementOutcome, FacilitatorUnavailable>,
        calls: AtomicUsize,
    }

    impl StubFacilitator {
        fn new(answer: Result<SettlementOutcome, FacilitatorUnavailable>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: AtomicUsize::new(0),
            })
        }

        fn settling() -> Arc<Self> {
            Self::new(Ok(SettlementOutcome::from_response(
                &json!({ "success": true, "payer": BUYER, "transaction": "0xfeed" }),
                "stacks:2147483648",
            )))
        }
    }

    impl Facilitator for StubFacilitator {
        fn settle<'a>(
            &'a self,
            _payload: &'a PaymentPayload,
            _requirements: &'a PaymentRequirements,
        ) -> BoxFuture<'a, Result<SettlementOutcome, FacilitatorUnavailable>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = self.answer.clone();
            Box::pin(async move { answer })
        }
    }

    fn listing(is_listed: bool) -> Listing {
        Listing {
            id: "listing-1".into(),
            title: "Haiku generator".into(),
            content: "Write a haiku about {topic}".into(),
            amount_base_units: "500000".into(),
            currency: Currency::Stx,
            seller_wallet: SELLER.into(),
            is_listed,
        }
    }

    fn setup(
        listing: Listing,
        facilitator: Arc<StubFacilitator>,
        policy: BypassPolicy,
    ) -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.upsert_listing(listing);
        let gate = AccessGate::new(
            store.clone(),
            store.clone(),
            facilitator,
            RequirementBuilder::for_network(StacksNetwork::Testnet),
        )
        .with_bypass_policy(policy);
        let state = AppState::new(Arc::new(gate)).with_public_base_url(Url::parse(BASE).unwrap());
        (router(state), store)
    }

    fn default_app() -> (Router, Arc<MemoryStore>) {
        setup(listing(true), StubFacilitator::settling(), BypassPolicy::Always)
    }

    fn get(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn signature() -> String {
        let payload = json!({
            "x402Version": 2,
            "accepted": {
                "scheme": "exact",
                "network": "stacks:2147483648",
                "amount": "500000",
                "asset": "STX",
                "payTo": SELLER,
                "maxTimeoutSeconds": 300
            },
            "payload": { "transaction": "0x808000000004" }
        });
        BASE64_STANDARD.encode(payload.to_string())
    }

    #[tokio::test]
    async fn test_unpaid_request_gets_challenge() {
        let (app, store) = default_app();
        let response = app
            .oneshot(get("/api/content/listing-1?ref=home", &[]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(response.headers()[CACHE_CONTROL], "no-store");
        assert_eq!(response.headers()[VARY], "payment-signature, x-buyer-wallet");
        let header = response.headers()[PAYMENT_REQUIRED_HEADER]
            .to_str()
            .unwrap()
            .to_owned();
        let from_header = decode_challenge(&header).unwrap();

        let body = json_body(response).await;
        assert_eq!(body["x402Version"], 2);
        assert_eq!(body["error"], "Payment required");
        assert_eq!(
            body["resource"]["url"],
            "https://shop.example/api/content/listing-1?ref=home"
        );
        let accepts = body["accepts"].as_array().unwrap();
        assert_eq!(accepts.len(), 1);
        assert_eq!(accepts[0]["amount"], "500000");
        assert_eq!(accepts[0]["asset"], "STX");
        assert_eq!(accepts[0]["payTo"], SELLER);
        assert_eq!(accepts[0]["network"], "stacks:2147483648");
        assert_eq!(serde_json::to_value(&from_header).unwrap(), body);
        assert_eq!(store.purchase_count(), 0);
    }

    #[tokio::test]
    async fn test_host_header_fallback_for_resource_url() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_listing(listing(true));
        let gate = AccessGate::new(
            store.clone(),
            store,
            StubFacilitator::settling(),
            RequirementBuilder::for_network(StacksNetwork::Testnet),
        );
        let app = router(AppState::new(Arc::new(gate)));
        let response = app
            .oneshot(get("/api/content/listing-1", &[("host", "gate.local:8080")]))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(
            body["resource"]["url"],
            "http://gate.local:8080/api/content/listing-1"
        );
    }

    #[tokio::test]
    async fn test_unknown_listing_is_404() {
        let (app, _) = default_app();
        let response = app.oneshot(get("/api/content/nope", &[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CACHE_CONTROL], "no-store");
        assert_eq!(json_body(response).await["reason"], "not_found");
    }

    #[tokio::test]
    async fn test_seller_reads_unlisted_listing() {
        let (app, _) = setup(listing(false), StubFacilitator::settling(), BypassPolicy::Always);
        let response = app
            .clone()
            .oneshot(get("/api/content/listing-1", &[("x-buyer-wallet", SELLER)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(PAYMENT_RESPONSE_HEADER).is_none());
        let body = json_body(response).await;
        assert_eq!(body["content"], "Write a haiku about {topic}");
        assert_eq!(body["payment"], json!({ "bypass": "seller" }));

        let response = app
            .oneshot(get("/api/content/listing-1", &[("x-buyer-wallet", BUYER)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["reason"], "not_listed");
    }

    #[tokio::test]
    async fn test_malformed_signature_is_400() {
        let facilitator = StubFacilitator::settling();
        let (app, _) = setup(listing(true), facilitator.clone(), BypassPolicy::Always);
        let response = app
            .oneshot(get(
                "/api/content/listing-1",
                &[("payment-signature", "not-base64!")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Invalid payment-signature header");
        assert_eq!(body["reason"], "invalid_payment_envelope");
        assert_eq!(facilitator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_ascii_signature_is_400_not_a_challenge() {
        let facilitator = StubFacilitator::settling();
        let (app, _) = setup(listing(true), facilitator.clone(), BypassPolicy::Always);
        let mut request = get("/api/content/listing-1", &[]);
        request.headers_mut().insert(
            PAYMENT_SIGNATURE_HEADER,
            HeaderValue::from_bytes(b"eyJ\xe9garbage").unwrap(),
        );
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(PAYMENT_REQUIRED_HEADER).is_none());
        assert_eq!(json_body(response).await["reason"], "invalid_payment_envelope");
        assert_eq!(facilitator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_paid_request_releases_and_records() {
        let (app, store) = default_app();
        let response = app
            .clone()
            .oneshot(get(
                "/api/content/listing-1",
                &[("payment-signature", signature().as_str())],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_CONTROL], "no-store");
        let header = response.headers()[PAYMENT_RESPONSE_HEADER]
            .to_str()
            .unwrap()
            .to_owned();
        let confirmation = decode_payment_response(&header).unwrap();
        let body = json_body(response).await;
        assert_eq!(body["content"], "Write a haiku about {topic}");
        assert_eq!(body["payment"]["success"], true);
        assert_eq!(body["payment"]["transaction"], "0xfeed");
        assert_eq!(serde_json::to_value(&confirmation).unwrap(), body["payment"]);

        let records = store.purchases_for("listing-1");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].buyer_wallet, BUYER);

        // The payer now reads the content without paying again.
        let response = app
            .oneshot(get("/api/content/listing-1", &[("x-buyer-wallet", BUYER)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await["payment"],
            json!({ "bypass": "existing_purchase" })
        );
    }

    #[tokio::test]
    async fn test_rejected_payment_reissues_challenge() {
        let facilitator = StubFacilitator::new(Ok(SettlementOutcome::from_response(
            &json!({ "success": false, "errorReason": "insufficient funds" }),
            "stacks:2147483648",
        )));
        let (app, store) = setup(listing(true), facilitator, BypassPolicy::Always);
        let response = app
            .oneshot(get(
                "/api/content/listing-1",
                &[("payment-signature", signature().as_str())],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let header = response.headers()[PAYMENT_REQUIRED_HEADER]
            .to_str()
            .unwrap()
            .to_owned();
        assert_eq!(decode_challenge(&header).unwrap().accepts[0].amount, "500000");
        let body = json_body(response).await;
        assert_eq!(body["error"], "insufficient funds");
        assert_eq!(body["reason"], "settlement_rejected");
        assert_eq!(store.purchase_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_facilitator_is_retryable() {
        let facilitator =
            StubFacilitator::new(Err(FacilitatorUnavailable("connection refused".into())));
        let (app, _) = setup(listing(true), facilitator, BypassPolicy::Always);
        let response = app
            .oneshot(get(
                "/api/content/listing-1",
                &[("payment-signature", signature().as_str())],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(response.headers()[RETRY_AFTER], "5");
        assert!(response.headers().get(PAYMENT_REQUIRED_HEADER).is_some());
        let body = json_body(response).await;
        assert_eq!(body["reason"], "facilitator_unavailable");
        assert_eq!(body["retryable"], true);
    }

    #[tokio::test]
    async fn test_opt_in_bypass_header() {
        let policy = BypassPolicy::OptIn {
            header: "x-marketplace-bypass".into(),
        };
        let (app, _) = setup(listing(true), StubFacilitator::settling(), policy);

        let response = app
            .clone()
            .oneshot(get("/api/content/listing-1", &[("x-buyer-wallet", SELLER)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            response.headers()[VARY],
            "payment-signature, x-buyer-wallet, x-marketplace-bypass"
        );

        let response = app
            .oneshot(get(
                "/api/content/listing-1",
                &[("x-buyer-wallet", SELLER), ("x-marketplace-bypass", "allow")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bad_listing_data_hides_details() {
        let broken = Listing {
            amount_base_units: "12abc".into(),
            ..listing(true)
        };
        let (app, _) = setup(broken, StubFacilitator::settling(), BypassPolicy::Always);
        let response = app
            .oneshot(get("/api/content/listing-1", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            json!({
                "error": "Invalid payment requirements",
                "reason": "invalid_payment_requirements"
            })
        );
    }

    #[tokio::test]
    async fn test_schema_document() {
        let (app, _) = default_app();
        let response = app.oneshot(get("/api/x402/schema", &[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_CONTROL], "public, max-age=3600");

        let body = json_body(response).await;
        assert_eq!(body["x402Version"], 2);
        assert_eq!(body["name"], "stackgate");
        let accepts = &body["accepts"][0];
        assert_eq!(accepts["scheme"], "exact");
        assert_eq!(accepts["network"], "stacks:2147483648");
        assert_eq!(accepts["asset"], "STX");
        assert_eq!(accepts["maxTimeoutSeconds"], 300);
        assert_eq!(
            accepts["resource"],
            "https://shop.example/api/content/{id}"
        );
        let signature = &accepts["outputSchema"]["input"]["headers"]["payment-signature"];
        assert_eq!(signature["format"], "base64");
        assert_eq!(signature["required"], false);
    }
}
