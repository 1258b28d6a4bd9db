//! A [`Facilitator`] that talks to a _remote_ x402 facilitator over HTTP.
//!
//! [`FacilitatorClient`] handles the `/verify`, `/settle`, and `/supported`
//! endpoints. Every `verify` and `settle` call runs under a hard deadline
//! (`tokio::time::timeout`), on top of the optional per-request `reqwest`
//! timeout, so a stalled facilitator never holds a caller past the deadline.
//!
//! ## Example
//!
//! ```rust
//! use x402_client::facilitator_client::FacilitatorClient;
//!
//! let facilitator = FacilitatorClient::try_from("https://facilitator.x402.rs").unwrap();
//! ```
//!
//! ## Error Handling
//!
//! [`FacilitatorClientError`] captures URL construction, transport, JSON
//! decoding, unexpected status and deadline failures.
//! [`FacilitatorClientError::is_transport`] tells a failure of the exchange
//! itself apart from a facilitator that answered and said no.

use http::{HeaderMap, StatusCode};
use reqwest::Client;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

use crate::facilitator::Facilitator;
use crate::proto::{SettleRequest, SettleResponse, SupportedResponse, VerifyRequest, VerifyResponse};

#[cfg(feature = "telemetry")]
use tracing::{Instrument, Span, instrument};

/// TTL cache for [`SupportedResponse`].
#[derive(Clone, Debug)]
struct SupportedCacheState {
    response: SupportedResponse,
    expires_at: std::time::Instant,
}

/// An encapsulated TTL cache for the `/supported` endpoint response.
///
/// Each clone has an independent cache state.
#[derive(Debug)]
pub struct SupportedCache {
    ttl: Duration,
    state: RwLock<Option<SupportedCacheState>>,
}

impl SupportedCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(None),
        }
    }

    /// Returns the cached response if valid, None otherwise.
    pub async fn get(&self) -> Option<SupportedResponse> {
        let guard = self.state.read().await;
        let cache = guard.as_ref()?;
        if std::time::Instant::now() < cache.expires_at {
            Some(cache.response.clone())
        } else {
            None
        }
    }

    pub async fn set(&self, response: SupportedResponse) {
        let mut guard = self.state.write().await;
        *guard = Some(SupportedCacheState {
            response,
            expires_at: std::time::Instant::now() + self.ttl,
        });
    }

    pub async fn clear(&self) {
        let mut guard = self.state.write().await;
        *guard = None;
    }
}

impl Clone for SupportedCache {
    fn clone(&self) -> Self {
        Self::new(self.ttl)
    }
}

/// A client for communicating with a remote x402 facilitator.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    /// Base URL of the facilitator (e.g. `https://facilitator.example/`)
    base_url: Url,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    client: Client,
    /// Custom headers sent with each request
    headers: HeaderMap,
    /// Per-request `reqwest` timeout
    timeout: Option<Duration>,
    /// Hard deadline for `POST /verify`
    verify_timeout: Duration,
    /// Hard deadline for `POST /settle`
    settle_timeout: Duration,
    supported_cache: SupportedCache,
}

/// Errors that can occur while interacting with a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Deadline of {after:?} exceeded: {context}")]
    Timeout {
        context: &'static str,
        after: Duration,
    },
}

impl FacilitatorClientError {
    pub fn is_timeout(&self) -> bool {
        match self {
            FacilitatorClientError::Timeout { .. } => true,
            FacilitatorClientError::Http { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Whether the exchange itself failed: no answer, a 5xx, or an answer
    /// that could not be read. A 4xx is the facilitator's decision.
    pub fn is_transport(&self) -> bool {
        match self {
            FacilitatorClientError::UrlParse { .. } => false,
            FacilitatorClientError::HttpStatus { status, .. } => status.is_server_error(),
            FacilitatorClientError::Http { .. }
            | FacilitatorClientError::JsonDeserialization { .. }
            | FacilitatorClientError::ResponseBodyRead { .. }
            | FacilitatorClientError::Timeout { .. } => true,
        }
    }
}

impl Facilitator for FacilitatorClient {
    type Error = FacilitatorClientError;

    #[cfg(feature = "telemetry")]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        with_span(
            FacilitatorClient::verify(self, request),
            tracing::info_span!(
                "x402.facilitator_client.verify",
                url = %self.verify_url,
                timeout = ?self.verify_timeout
            ),
        )
        .await
    }

    #[cfg(not(feature = "telemetry"))]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        FacilitatorClient::verify(self, request).await
    }

    #[cfg(feature = "telemetry")]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        with_span(
            FacilitatorClient::settle(self, request),
            tracing::info_span!(
                "x402.facilitator_client.settle",
                url = %self.settle_url,
                timeout = ?self.settle_timeout
            ),
        )
        .await
    }

    #[cfg(not(feature = "telemetry"))]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        FacilitatorClient::settle(self, request).await
    }

    async fn supported(&self) -> Result<SupportedResponse, Self::Error> {
        FacilitatorClient::supported(self).await
    }
}

impl FacilitatorClient {
    /// Default TTL for caching the supported endpoint response (10 minutes).
    pub const DEFAULT_SUPPORTED_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
    pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    pub fn settle_url(&self) -> &Url {
        &self.settle_url
    }

    pub fn supported_url(&self) -> &Url {
        &self.supported_url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn timeout(&self) -> &Option<Duration> {
        &self.timeout
    }

    pub fn verify_timeout(&self) -> Duration {
        self.verify_timeout
    }

    pub fn settle_timeout(&self) -> Duration {
        self.settle_timeout
    }

    pub fn supported_cache(&self) -> &SupportedCache {
        &self.supported_cache
    }

    /// Constructs a new [`FacilitatorClient`] from a base URL.
    ///
    /// This sets up `./verify`, `./settle`, and `./supported` endpoint URLs relative to the base.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorClientError> {
        let client = Client::new();
        let verify_url =
            base_url
                .join("./verify")
                .map_err(|e| FacilitatorClientError::UrlParse {
                    context: "Failed to construct ./verify URL",
                    source: e,
                })?;
        let settle_url =
            base_url
                .join("./settle")
                .map_err(|e| FacilitatorClientError::UrlParse {
                    context: "Failed to construct ./settle URL",
                    source: e,
                })?;
        let supported_url =
            base_url
                .join("./supported")
                .map_err(|e| FacilitatorClientError::UrlParse {
                    context: "Failed to construct ./supported URL",
                    source: e,
                })?;
        Ok(Self {
            client,
            base_url,
            verify_url,
            settle_url,
            supported_url,
            headers: HeaderMap::new(),
            timeout: None,
            verify_timeout: Self::DEFAULT_VERIFY_TIMEOUT,
            settle_timeout: Self::DEFAULT_SETTLE_TIMEOUT,
            supported_cache: SupportedCache::new(Self::DEFAULT_SUPPORTED_CACHE_TTL),
        })
    }

    /// Attaches custom headers to all future requests.
    pub fn with_headers(&self, headers: HeaderMap) -> Self {
        let mut this = self.clone();
        this.headers = headers;
        this
    }

    /// Sets a per-request `reqwest` timeout for all future requests.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = Some(timeout);
        this
    }

    pub fn with_verify_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.verify_timeout = timeout;
        this
    }

    pub fn with_settle_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.settle_timeout = timeout;
        this
    }

    /// Sets the TTL for caching the supported endpoint response.
    ///
    /// Default is 10 minutes. Use [`Self::without_supported_cache()`] to disable caching.
    pub fn with_supported_cache_ttl(&self, ttl: Duration) -> Self {
        let mut this = self.clone();
        this.supported_cache = SupportedCache::new(ttl);
        this
    }

    pub fn without_supported_cache(&self) -> Self {
        self.with_supported_cache_ttl(Duration::ZERO)
    }

    /// Deadline that bounded a failed call, for error reporting.
    pub fn effective_timeout(&self, hard: Duration) -> Duration {
        self.timeout.map_or(hard, |timeout| timeout.min(hard))
    }

    /// Sends a `POST /verify` request to the facilitator.
    pub async fn verify(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifyResponse, FacilitatorClientError> {
        self.post_json(&self.verify_url, "POST /verify", request, self.verify_timeout)
            .await
    }

    /// Sends a `POST /settle` request to the facilitator.
    pub async fn settle(
        &self,
        request: &SettleRequest,
    ) -> Result<SettleResponse, FacilitatorClientError> {
        self.post_json(&self.settle_url, "POST /settle", request, self.settle_timeout)
            .await
    }

    /// Sends a `GET /supported` request to the facilitator, bypassing the cache.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "x402.facilitator_client.supported", skip_all, err)
    )]
    async fn supported_inner(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        self.get_json(&self.supported_url, "GET /supported").await
    }

    /// Sends a `GET /supported` request to the facilitator.
    /// Results are cached with a configurable TTL (default: 10 minutes).
    pub async fn supported(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        if let Some(response) = self.supported_cache.get().await {
            return Ok(response);
        }

        #[cfg(feature = "telemetry")]
        tracing::info!("x402.facilitator_client.supported_cache_miss");

        let response = self.supported_inner().await?;
        self.supported_cache.set(response.clone()).await;

        Ok(response)
    }

    /// POST helper: JSON body, custom headers, per-request timeout, and a hard
    /// `deadline` over the whole exchange including the response body.
    ///
    /// `context` is a human-readable identifier used in tracing and error messages
    /// (e.g. `"POST /verify"`).
    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
        deadline: Duration,
    ) -> Result<R, FacilitatorClientError>
    where
        T: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let mut req = self.client.post(url.clone()).json(payload);
        for (key, value) in self.headers.iter() {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let exchange = async {
            let http_response = req
                .send()
                .await
                .map_err(|e| FacilitatorClientError::Http { context, source: e })?;
            read_json(http_response, context).await
        };
        let result = match tokio::time::timeout(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => Err(FacilitatorClientError::Timeout {
                context,
                after: deadline,
            }),
        };

        record_result_on_span(&result);

        result
    }

    /// GET helper with the same error mapping as [`Self::post_json`], bounded
    /// only by the per-request timeout.
    async fn get_json<R>(
        &self,
        url: &Url,
        context: &'static str,
    ) -> Result<R, FacilitatorClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        let mut req = self.client.get(url.clone());
        for (key, value) in self.headers.iter() {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| FacilitatorClientError::Http { context, source: e })?;

        let result = read_json(http_response, context).await;

        record_result_on_span(&result);

        result
    }
}

async fn read_json<R>(
    http_response: reqwest::Response,
    context: &'static str,
) -> Result<R, FacilitatorClientError>
where
    R: serde::de::DeserializeOwned,
{
    if http_response.status() == StatusCode::OK {
        http_response
            .json::<R>()
            .await
            .map_err(|e| FacilitatorClientError::JsonDeserialization { context, source: e })
    } else {
        let status = http_response.status();
        let body = http_response
            .text()
            .await
            .map_err(|e| FacilitatorClientError::ResponseBodyRead { context, source: e })?;
        Err(FacilitatorClientError::HttpStatus {
            context,
            status,
            body,
        })
    }
}

/// Parses a base URL, normalizing it to end in exactly one `/`.
impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| FacilitatorClientError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        FacilitatorClient::try_new(url)
    }
}

impl TryFrom<String> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FacilitatorClient::try_from(value.as_str())
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

/// Noop if telemetry feature is off.
#[cfg(not(feature = "telemetry"))]
fn record_result_on_span<R, E: Display>(_result: &Result<R, E>) {}

#[cfg(feature = "telemetry")]
fn with_span<F: Future>(fut: F, span: Span) -> impl Future<Output = F::Output> {
    fut.instrument(span)
}
