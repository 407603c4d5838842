//! A [`Facilitator`] implementation that settles payments with a _remote_ x402 facilitator over HTTP.
//!
//! [`FacilitatorClient`] posts [`SettleRequest`]s to the facilitator's
//! `/settle` endpoint, exactly once per call. It never retries.
//!
//! ## Outcome Mapping
//!
//! - A 2xx response with a JSON body becomes a [`SettlementOutcome`] read from
//!   that body (`success` flag plus the extraction strategies in
//!   [`stackgate::extract`]).
//! - A non-2xx response is a *reported* failure: the reason comes from the JSON
//!   body when there is one, else `facilitator responded with HTTP <status>`.
//! - Connection failures, timeouts, unreadable bodies and non-JSON 2xx bodies
//!   are [`FacilitatorClientError`]s, surfaced to the gate as
//!   [`FacilitatorUnavailable`].

use http::{HeaderMap, StatusCode};
use reqwest::Client;
use stackgate::facilitator::{BoxFuture, Facilitator, FacilitatorUnavailable, SettlementOutcome};
use stackgate::proto::{PaymentPayload, PaymentRequirements, SettleRequest};
use std::fmt::Display;
use std::time::Duration;
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::{Instrument, Span};

use crate::constants::DEFAULT_FACILITATOR_URL;

/// A client for communicating with a remote x402 facilitator.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    /// Base URL of the facilitator (e.g. `https://facilitator.example/`)
    base_url: Url,
    /// Full URL to `POST /settle` requests
    settle_url: Url,
    /// Shared Reqwest HTTP client
    client: Client,
    /// Optional custom headers sent with each request
    headers: HeaderMap,
    /// Optional request timeout
    timeout: Option<Duration>,
}

/// Errors that can occur while interacting with a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error, including timeouts.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// A successful response whose body is not JSON.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// Failed to read response body.
    #[error("Failed to read response body: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

impl FacilitatorClient {
    /// Returns the base URL used by this client.
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the computed `./settle` URL relative to [`FacilitatorClient::base_url`].
    pub const fn settle_url(&self) -> &Url {
        &self.settle_url
    }

    /// Returns any custom headers configured on the client.
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the configured timeout, if any.
    pub const fn timeout(&self) -> &Option<Duration> {
        &self.timeout
    }

    /// Constructs a new [`FacilitatorClient`] from a base URL.
    ///
    /// This sets up the `./settle` endpoint URL relative to the base.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if URL construction fails.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorClientError> {
        let client = Client::new();
        let settle_url =
            base_url
                .join("./settle")
                .map_err(|e| FacilitatorClientError::UrlParse {
                    context: "Failed to construct ./settle URL",
                    source: e,
                })?;
        Ok(Self {
            client,
            base_url,
            settle_url,
            headers: HeaderMap::new(),
            timeout: None,
        })
    }

    /// Constructs a client for the public Stacks facilitator.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if URL construction fails.
    pub fn try_default() -> Result<Self, FacilitatorClientError> {
        Self::try_from(DEFAULT_FACILITATOR_URL)
    }

    /// Attaches custom headers to all future requests.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sends a `POST /settle` request to the facilitator.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if the facilitator cannot be reached
    /// or its answer cannot be read.
    pub async fn post_settle(
        &self,
        request: &SettleRequest,
    ) -> Result<SettlementOutcome, FacilitatorClientError> {
        let context = "POST /settle";
        let mut req = self.client.post(self.settle_url.clone()).json(request);
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| FacilitatorClientError::Http { context, source: e })?;

        let status = http_response.status();
        let body = http_response
            .bytes()
            .await
            .map_err(|e| FacilitatorClientError::ResponseBodyRead { context, source: e });
        let network = &request.payment_requirements.network;

        let result = body.and_then(|body| {
            if status.is_success() {
                serde_json::from_slice::<serde_json::Value>(&body)
                    .map(|json| SettlementOutcome::from_response(&json, network))
                    .map_err(|e| FacilitatorClientError::JsonDeserialization { context, source: e })
            } else {
                Ok(reported_failure(status, &body, network))
            }
        });

        record_result_on_span(&result);

        result
    }
}

/// Reads a non-2xx answer as a declined settlement.
fn reported_failure(status: StatusCode, body: &[u8], network: &str) -> SettlementOutcome {
    let fallback = || format!("facilitator responded with HTTP {}", status.as_u16());
    let mut outcome = match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(json) => SettlementOutcome::from_response(&json, network),
        Err(_) => SettlementOutcome::rejected(fallback(), network),
    };
    outcome.success = false;
    if outcome.error_reason.is_none() {
        outcome.error_reason = Some(fallback());
    }

    #[cfg(feature = "telemetry")]
    tracing::warn!(
        status = status.as_u16(),
        reason = outcome.error_reason.as_deref(),
        "Facilitator declined settlement with non-success status"
    );

    outcome
}

impl Facilitator for FacilitatorClient {
    fn settle<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<SettlementOutcome, FacilitatorUnavailable>> {
        let request = SettleRequest::new(payload.clone(), requirements.clone());
        let fut = async move {
            self.post_settle(&request)
                .await
                .map_err(|err| FacilitatorUnavailable(err.to_string()))
        };

        #[cfg(feature = "telemetry")]
        let fut = with_span(
            fut,
            tracing::info_span!(
                "stackgate.facilitator_client.settle",
                timeout = ?self.timeout,
                otel.status_code = tracing::field::Empty,
                error.message = tracing::field::Empty,
            ),
        );

        Box::pin(fut)
    }
}

/// Converts a string URL into a `FacilitatorClient`, parsing the URL and calling `try_new`.
impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Normalize: strip trailing slashes and add a single trailing slash
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| FacilitatorClientError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        Self::try_new(url)
    }
}

/// Converts a String URL into a `FacilitatorClient`.
impl TryFrom<String> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

/// Records the outcome of a request on a tracing span, including status and errors.
#[cfg(feature = "telemetry")]
fn record_result_on_span<R, E: Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
            tracing::event!(tracing::Level::ERROR, error = %err, "Request to facilitator failed");
        }
    }
}

/// Records the outcome of a request on a tracing span, including status and errors.
/// Noop if telemetry feature is off.
#[cfg(not(feature = "telemetry"))]
fn record_result_on_span<R, E: Display>(_result: &Result<R, E>) {}

/// Instruments a future with a given tracing span.
#[cfg(feature = "telemetry")]
fn with_span<F: Future>(fut: F, span: Span) -> impl Future<Output = F::Output> {
    fut.instrument(span)
}
