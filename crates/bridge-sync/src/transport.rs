//! # API Transport
//!
//! Rate-limited, retrying HTTP calls against the remote commerce API.
//!
//! ## Retry Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  attempt ──► rate limiter ──► HttpExecutor                              │
//! │                                   │                                     │
//! │      2xx / other 4xx ─────────────┼──► return response                  │
//! │      401 (first time) ────────────┼──► force_renew, retry at once       │
//! │      401 (after renewal) ─────────┼──► AuthFailed                       │
//! │      429 / 5xx / network ─────────┴──► sleep backoff, double, retry     │
//! │                                                                         │
//! │  at most max_retries additional attempts; then the last 429/5xx         │
//! │  response (or the last network error) is handed back                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The HTTP layer sits behind [`HttpExecutor`] so the retry loop can be
//! driven by a scripted executor and a manual clock in tests.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bridge_core::validation::truncate_chars;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::auth::{CredentialProvider, MAX_ERROR_BODY_CHARS};
use crate::clock::Clock;
use crate::config::{ApiSettings, ConfigSource};
use crate::error::{SyncError, SyncResult};
use crate::rate_limit::RateLimiter;

/// Subscription key header expected by the API gateway.
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Upper bound for a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

// =============================================================================
// Requests and Responses
// =============================================================================

/// One of the remote API's logical surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiSurface {
    /// Order management (distribution key).
    Orders,
    /// Stock management (consumption key).
    Stock,
    /// Price management (consumption key).
    Price,
}

impl ApiSurface {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ApiSurface::Orders => "orders",
            ApiSurface::Stock => "stock",
            ApiSurface::Price => "price",
        }
    }

    /// Base URL for this surface.
    pub fn base_url<'a>(&self, api: &'a ApiSettings) -> &'a str {
        match self {
            ApiSurface::Orders => &api.orders_base_url,
            ApiSurface::Stock => &api.stock_base_url,
            ApiSurface::Price => &api.price_base_url,
        }
    }

    /// Subscription key sent to this surface.
    pub fn subscription_key<'a>(&self, api: &'a ApiSettings) -> &'a str {
        match self {
            ApiSurface::Orders => api.distribution_key(),
            ApiSurface::Stock | ApiSurface::Price => api.consumption_key(),
        }
    }
}

impl fmt::Display for ApiSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call against one surface, independent of credentials and retries.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub surface: ApiSurface,
    /// Path relative to the surface base URL, e.g. `/stock/ABC123`.
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(surface: ApiSurface, path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            surface,
            path: path.into(),
            body: None,
        }
    }

    pub fn put<T: Serialize>(surface: ApiSurface, path: impl Into<String>, body: &T) -> SyncResult<Self> {
        Ok(Self {
            method: Method::PUT,
            surface,
            path: path.into(),
            body: Some(serde_json::to_value(body)?),
        })
    }

    pub fn post<T: Serialize>(surface: ApiSurface, path: impl Into<String>, body: &T) -> SyncResult<Self> {
        Ok(Self {
            method: Method::POST,
            surface,
            path: path.into(),
            body: Some(serde_json::to_value(body)?),
        })
    }
}

/// Status code and raw body of a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Parses the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> SyncResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Returns the response for 2xx, otherwise the matching error.
    pub fn error_for_status(self) -> SyncResult<Self> {
        if self.is_success() {
            return Ok(self);
        }

        let body = truncate_chars(&self.body, MAX_ERROR_BODY_CHARS);
        Err(match self.status {
            401 => SyncError::AuthFailed(format!("HTTP 401: {}", body)),
            429 => SyncError::RateLimited { body },
            500..=599 => SyncError::ServerError {
                status: self.status,
                body,
            },
            status => SyncError::RemoteRejected { status, body },
        })
    }
}

/// Fully resolved request handed to an [`HttpExecutor`].
#[derive(Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(&'static str, String)>,
    /// UTF-8 JSON body.
    pub body: Option<String>,
}

impl PreparedRequest {
    /// Value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for PreparedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Performs one HTTP exchange with no retries.
#[async_trait]
pub trait HttpExecutor: Send + Sync + fmt::Debug {
    async fn execute(&self, request: PreparedRequest) -> SyncResult<ApiResponse>;
}

/// [`HttpExecutor`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: PreparedRequest) -> SyncResult<ApiResponse> {
        let mut builder = self.client.request(request.method, request.url);
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(ApiResponse { status, body })
    }
}

// =============================================================================
// Client
// =============================================================================

/// Retrying API client shared by every handler.
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: Arc<dyn ConfigSource>,
    credentials: Arc<dyn CredentialProvider>,
    limiter: Arc<RateLimiter>,
    executor: Arc<dyn HttpExecutor>,
    clock: Arc<dyn Clock>,
}

impl ApiClient {
    pub fn new(
        config: Arc<dyn ConfigSource>,
        credentials: Arc<dyn CredentialProvider>,
        limiter: Arc<RateLimiter>,
        executor: Arc<dyn HttpExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            credentials,
            limiter,
            executor,
            clock,
        }
    }

    /// Builds a client with a `reqwest` executor and its own rate limiter.
    pub fn from_config(
        config: Arc<dyn ConfigSource>,
        credentials: Arc<dyn CredentialProvider>,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        let executor = ReqwestExecutor::new(config.current().api.timeout())?;
        let limiter = RateLimiter::new(config.clone(), clock.clone());
        Ok(Self::new(
            config,
            credentials,
            Arc::new(limiter),
            Arc::new(executor),
            clock,
        ))
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Sends a request, retrying per the module-level policy.
    pub async fn send(&self, request: &ApiRequest) -> SyncResult<ApiResponse> {
        self.send_inner(request, None).await
    }

    /// Like [`send`](Self::send), but gives up with
    /// [`SyncError::DeadlineExceeded`] rather than waiting past `deadline`.
    pub async fn send_with_deadline(
        &self,
        request: &ApiRequest,
        deadline: Instant,
    ) -> SyncResult<ApiResponse> {
        self.send_inner(request, Some(deadline)).await
    }

    async fn send_inner(
        &self,
        request: &ApiRequest,
        deadline: Option<Instant>,
    ) -> SyncResult<ApiResponse> {
        let config = self.config.current();
        let api = &config.api;
        let max_retries = api.max_retries;

        let url = endpoint_url(request.surface.base_url(api), &request.path)?;
        let subscription_key = request.surface.subscription_key(api).to_string();
        let body = request.body.as_ref().map(serde_json::to_string).transpose()?;

        let mut backoff = backoff_schedule(api.initial_backoff());
        let mut token = self.credentials.access_token().await?;
        let mut renewed = false;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            self.limiter
                .acquire_before(deadline)
                .await
                .map_err(|err| match err {
                    SyncError::DeadlineExceeded { .. } => SyncError::DeadlineExceeded {
                        attempts: attempt - 1,
                    },
                    other => other,
                })?;

            let mut headers = vec![
                ("Authorization", format!("Bearer {}", token)),
                (SUBSCRIPTION_KEY_HEADER, subscription_key.clone()),
                ("Accept", "application/json".to_string()),
            ];
            if body.is_some() {
                headers.push(("Content-Type", "application/json".to_string()));
            }

            let prepared = PreparedRequest {
                method: request.method.clone(),
                url: url.clone(),
                headers,
                body: body.clone(),
            };

            debug!(
                surface = %request.surface,
                method = %request.method,
                path = %request.path,
                attempt,
                "Sending API request"
            );

            let retries_left = attempt <= max_retries;

            match self.executor.execute(prepared).await {
                Ok(response) if response.status == 401 => {
                    if renewed || !retries_left {
                        warn!(surface = %request.surface, attempt, "Still unauthorized after renewal");
                        return Err(SyncError::AuthFailed(format!(
                            "HTTP 401 after credential renewal: {}",
                            truncate_chars(&response.body, MAX_ERROR_BODY_CHARS)
                        )));
                    }
                    warn!(surface = %request.surface, attempt, "Unauthorized, renewing credentials");
                    token = self.credentials.renew_access_token().await?;
                    renewed = true;
                }
                Ok(response) if is_retryable_status(response.status) => {
                    if !retries_left {
                        warn!(
                            surface = %request.surface,
                            status = response.status,
                            attempts = attempt,
                            "Retries exhausted"
                        );
                        return Ok(response);
                    }
                    let wait = next_delay(&mut backoff, api);
                    warn!(
                        surface = %request.surface,
                        status = response.status,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "Transient error, retrying with backoff"
                    );
                    self.pause(wait, deadline, attempt).await?;
                }
                Ok(response) => {
                    debug!(surface = %request.surface, status = response.status, attempt, "Received API response");
                    return Ok(response);
                }
                Err(err) if err.is_retryable() => {
                    if !retries_left {
                        warn!(surface = %request.surface, attempts = attempt, error = %err, "Retries exhausted");
                        return Err(err);
                    }
                    let wait = next_delay(&mut backoff, api);
                    warn!(
                        surface = %request.surface,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Network error, retrying with backoff"
                    );
                    self.pause(wait, deadline, attempt).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn pause(&self, wait: Duration, deadline: Option<Instant>, attempts: u32) -> SyncResult<()> {
        if deadline.is_some_and(|d| self.clock.now() + wait > d) {
            return Err(SyncError::DeadlineExceeded { attempts });
        }
        self.clock.sleep(wait).await;
        Ok(())
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Doubling schedule with no jitter and no elapsed-time cap.
fn backoff_schedule(initial: Duration) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(initial)
        .with_multiplier(2.0)
        .with_randomization_factor(0.0)
        .with_max_interval(MAX_BACKOFF)
        .with_max_elapsed_time(None)
        .build()
}

fn next_delay(backoff: &mut ExponentialBackoff, api: &ApiSettings) -> Duration {
    backoff.next_backoff().unwrap_or_else(|| api.initial_backoff())
}

/// Joins a surface base URL and a relative path.
pub fn endpoint_url(base: &str, path: &str) -> SyncResult<Url> {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Ok(Url::parse(&joined)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{BridgeConfig, StaticConfig};
    use crate::testing::{ScriptedExecutor, StubCredentials};
    use std::sync::atomic::Ordering;

    struct Harness {
        client: ApiClient,
        executor: Arc<ScriptedExecutor>,
        credentials: Arc<StubCredentials>,
        clock: ManualClock,
    }

    fn harness(config: BridgeConfig, executor: ScriptedExecutor) -> Harness {
        let config: Arc<dyn ConfigSource> = Arc::new(StaticConfig::new(config));
        let clock = ManualClock::new();
        let executor = Arc::new(executor);
        let credentials = Arc::new(StubCredentials::default());
        let limiter = Arc::new(RateLimiter::new(config.clone(), Arc::new(clock.clone())));
        let client = ApiClient::new(
            config,
            credentials.clone(),
            limiter,
            executor.clone(),
            Arc::new(clock.clone()),
        );
        Harness {
            client,
            executor,
            credentials,
            clock,
        }
    }

    fn test_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.api.stock_base_url = "https://api.test/stock-management/v1".into();
        config.api.max_requests_per_minute = 100;
        config
    }

    fn sleeps_ms(clock: &ManualClock) -> Vec<u128> {
        clock.sleeps().iter().map(|d| d.as_millis()).collect()
    }

    fn stock_get() -> ApiRequest {
        ApiRequest::get(ApiSurface::Stock, "/stock/ABC123")
    }

    #[tokio::test]
    async fn test_backoff_doubles_on_server_errors() {
        let h = harness(test_config(), ScriptedExecutor::statuses(&[500, 503, 429, 200]));

        let response = h.client.send(&stock_get()).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(h.executor.calls(), 4);
        assert_eq!(sleeps_ms(&h.clock), vec![1000, 2000, 4000]);
    }

    #[tokio::test]
    async fn test_stops_after_max_retries() {
        let h = harness(test_config(), ScriptedExecutor::statuses(&[503, 503, 503, 503, 200]));

        let response = h.client.send(&stock_get()).await.unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(h.executor.calls(), 4);
        assert_eq!(sleeps_ms(&h.clock), vec![1000, 2000, 4000]);
        assert!(response.error_for_status().unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_unauthorized_renews_once_without_backoff() {
        let h = harness(test_config(), ScriptedExecutor::statuses(&[401, 200]));

        let response = h.client.send(&stock_get()).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(h.credentials.renewals.load(Ordering::SeqCst), 1);
        assert_eq!(h.executor.request(0).header("authorization"), Some("Bearer token-0"));
        assert_eq!(h.executor.request(1).header("authorization"), Some("Bearer token-1"));
        assert!(h.clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_second_unauthorized_fails() {
        let h = harness(test_config(), ScriptedExecutor::statuses(&[401, 401, 200]));

        let err = h.client.send(&stock_get()).await.unwrap_err();

        assert!(matches!(err, SyncError::AuthFailed(_)));
        assert_eq!(h.executor.calls(), 2);
        assert_eq!(h.credentials.renewals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_error_returned_immediately() {
        let h = harness(test_config(), ScriptedExecutor::statuses(&[400, 200]));

        let response = h.client.send(&stock_get()).await.unwrap();

        assert_eq!(response.status, 400);
        assert_eq!(h.executor.calls(), 1);
        assert!(matches!(
            response.error_for_status(),
            Err(SyncError::RemoteRejected { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_network_errors_retried_then_surfaced() {
        let script = (0..5)
            .map(|_| Err(SyncError::Network("connection reset".into())))
            .collect();
        let h = harness(test_config(), ScriptedExecutor::new(script));

        let err = h.client.send(&stock_get()).await.unwrap_err();

        assert!(matches!(err, SyncError::Network(_)));
        assert_eq!(h.executor.calls(), 4);
        assert_eq!(sleeps_ms(&h.clock), vec![1000, 2000, 4000]);
    }

    #[tokio::test]
    async fn test_non_retryable_executor_error_not_retried() {
        let script = vec![Err(SyncError::InvalidConfig("bad header".into()))];
        let h = harness(test_config(), ScriptedExecutor::new(script));

        assert!(h.client.send(&stock_get()).await.is_err());
        assert_eq!(h.executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_deadline_stops_retry_loop() {
        let h = harness(test_config(), ScriptedExecutor::statuses(&[500, 500, 200]));
        let deadline = h.clock.now() + Duration::from_millis(1500);

        let err = h
            .client
            .send_with_deadline(&stock_get(), deadline)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::DeadlineExceeded { attempts: 2 }));
        assert_eq!(sleeps_ms(&h.clock), vec![1000]);
        assert_eq!(h.executor.calls(), 2);
    }

    #[tokio::test]
    async fn test_every_attempt_is_rate_limited() {
        let mut config = test_config();
        config.api.max_requests_per_minute = 2;
        let h = harness(config, ScriptedExecutor::statuses(&[500, 500, 200]));

        let response = h.client.send(&stock_get()).await.unwrap();

        assert_eq!(response.status, 200);
        // Backoffs of 1s and 2s, then the third attempt waits for the first
        // dispatch to leave the 60s window.
        assert_eq!(sleeps_ms(&h.clock), vec![1000, 2000, 57000]);
        assert_eq!(h.clock.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_headers_and_body() {
        let mut config = test_config();
        config.api.subscription_key = "shared".into();
        config.api.consumption_subscription_key = "consumption".into();
        let h = harness(config, ScriptedExecutor::statuses(&[200]));

        let body = serde_json::json!({ "sku": "ABC123", "quantity": 7 });
        let request = ApiRequest::put(ApiSurface::Stock, "/stock/ABC123", &body).unwrap();
        h.client.send(&request).await.unwrap();

        let sent = h.executor.request(0);
        assert_eq!(sent.method, Method::PUT);
        assert_eq!(
            sent.url.as_str(),
            "https://api.test/stock-management/v1/stock/ABC123"
        );
        assert_eq!(sent.header(SUBSCRIPTION_KEY_HEADER), Some("consumption"));
        assert_eq!(sent.header("accept"), Some("application/json"));
        assert_eq!(sent.header("content-type"), Some("application/json"));
        assert!(sent.body.unwrap().contains("\"sku\":\"ABC123\""));
    }

    #[tokio::test]
    async fn test_get_has_no_content_type() {
        let h = harness(test_config(), ScriptedExecutor::statuses(&[404]));

        let response = h.client.send(&stock_get()).await.unwrap();

        assert!(response.is_not_found());
        assert_eq!(h.executor.request(0).header("content-type"), None);
        assert_eq!(h.executor.request(0).body, None);
    }

    #[test]
    fn test_error_for_status_mapping() {
        assert!(ApiResponse::new(204, "").error_for_status().is_ok());
        assert!(matches!(
            ApiResponse::new(429, "slow down").error_for_status(),
            Err(SyncError::RateLimited { .. })
        ));
        assert!(matches!(
            ApiResponse::new(502, "").error_for_status(),
            Err(SyncError::ServerError { status: 502, .. })
        ));

        let long = ApiResponse::new(422, "e".repeat(2000));
        match long.error_for_status() {
            Err(SyncError::RemoteRejected { status, body }) => {
                assert_eq!(status, 422);
                assert_eq!(body.chars().count(), MAX_ERROR_BODY_CHARS);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_endpoint_url_joins_slashes() {
        let url = endpoint_url("https://api.test/v1/", "/prices/X").unwrap();
        assert_eq!(url.as_str(), "https://api.test/v1/prices/X");

        assert!(matches!(
            endpoint_url("not a url", "/x"),
            Err(SyncError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_surface_keys_fall_back() {
        let mut api = BridgeConfig::default().api;
        api.subscription_key = "shared".into();
        api.distribution_subscription_key = "dist".into();

        assert_eq!(ApiSurface::Orders.subscription_key(&api), "dist");
        assert_eq!(ApiSurface::Price.subscription_key(&api), "shared");
    }

    mod http {
        use super::*;
        use wiremock::matchers::{body_json, header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test]
        async fn test_reqwest_executor_sends_surface_headers() {
            let server = MockServer::start().await;
            Mock::given(method("PUT"))
                .and(path("/order-management/v1/orders/991/status"))
                .and(header("authorization", "Bearer token-0"))
                .and(header("ocp-apim-subscription-key", "dist-key"))
                .and(header("accept", "application/json"))
                .and(header("content-type", "application/json"))
                .and(body_json(serde_json::json!({ "status": 3 })))
                .respond_with(ResponseTemplate::new(204))
                .expect(1)
                .mount(&server)
                .await;

            let mut config = BridgeConfig::default();
            config.api.orders_base_url = format!("{}/order-management/v1", server.uri());
            config.api.distribution_subscription_key = "dist-key".into();
            let config: Arc<dyn ConfigSource> = Arc::new(StaticConfig::new(config));
            let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());

            let client = ApiClient::from_config(
                config,
                Arc::new(StubCredentials::default()),
                clock,
            )
            .unwrap();

            let request = ApiRequest::put(
                ApiSurface::Orders,
                "/orders/991/status",
                &serde_json::json!({ "status": 3 }),
            )
            .unwrap();
            let response = client.send(&request).await.unwrap();

            assert_eq!(response.status, 204);
        }
    }
}
