//! # Credential Manager
//!
//! OAuth2 client-credentials token for the remote commerce API.
//!
//! ## Authentication Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Credential Lifecycle                               │
//! │                                                                         │
//! │  ┌────────────────┐                          ┌─────────────────────┐    │
//! │  │  ApiClient     │                          │  Token endpoint     │    │
//! │  └───────┬────────┘                          └──────────┬──────────┘    │
//! │          │                                              │               │
//! │          │  get_valid_token()                           │               │
//! │          │  ── cached and now < expires_at - 300s ──► return            │
//! │          │                                              │               │
//! │          │  otherwise, under the same lock:             │               │
//! │          │  POST grant_type=client_credentials          │               │
//! │          │       client_id, client_secret, scope        │               │
//! │          │─────────────────────────────────────────────►│               │
//! │          │  200 {access_token, expires_in}              │               │
//! │          │◄─────────────────────────────────────────────│               │
//! │          │                                              │               │
//! │          │  [API answered 401]                          │               │
//! │          │  force_renew() ── always exchanges ─────────►│               │
//! │          │                                              │               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Single Flight
//! Every read and write of the cached token happens under one async mutex,
//! held across the exchange. Concurrent callers that all find the token
//! stale wait for the first caller's exchange and then reuse its result.

use async_trait::async_trait;
use bridge_core::validation::truncate_chars;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ConfigSource;
use crate::error::{SyncError, SyncResult};

/// Margin before token expiration to trigger refresh (5 minutes)
pub const REFRESH_MARGIN_SECS: u64 = 300;

/// Longest error body echoed back in an error message.
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Token information stored after authentication
#[derive(Clone)]
pub struct TokenInfo {
    /// The bearer token value
    pub access_token: String,
    /// When the access token expires (monotonic)
    pub expires_at: Instant,
}

impl TokenInfo {
    /// Check if the token is expired or about to expire
    pub fn needs_refresh(&self, now: Instant) -> bool {
        now + Duration::from_secs(REFRESH_MARGIN_SECS) >= self.expires_at
    }

    /// Check if the token is completely expired (no grace period)
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Get remaining valid time
    pub fn remaining_secs(&self, now: Instant) -> u64 {
        self.expires_at.saturating_duration_since(now).as_secs()
    }
}

impl fmt::Debug for TokenInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenInfo")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token endpoint success body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Source of bearer tokens for the transport.
///
/// Implemented by [`CredentialManager`]; tests of the retry loop stub it.
#[async_trait]
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    /// Cached token, renewed first if it is inside the refresh margin.
    async fn access_token(&self) -> SyncResult<String>;

    /// A freshly exchanged token, regardless of the cached one.
    async fn renew_access_token(&self) -> SyncResult<String>;
}

/// OAuth2 client-credentials manager.
pub struct CredentialManager {
    config: Arc<dyn ConfigSource>,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    token: Mutex<Option<TokenInfo>>,
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialManager")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl CredentialManager {
    /// Creates a manager with no cached token.
    pub fn new(config: Arc<dyn ConfigSource>, clock: Arc<dyn Clock>) -> SyncResult<Self> {
        let timeout = config.current().api.timeout();
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            config,
            client,
            clock,
            token: Mutex::new(None),
        })
    }

    /// Returns the cached token, renewing it first when needed.
    ///
    /// ## Flow
    /// 1. Lock the token state
    /// 2. If a token exists and `now < expires_at - 300s`, return it
    /// 3. Otherwise exchange credentials, store and return the new token
    pub async fn get_valid_token(&self) -> SyncResult<TokenInfo> {
        let mut guard = self.token.lock().await;
        let now = self.clock.now();

        if let Some(token) = guard.as_ref() {
            if !token.needs_refresh(now) {
                debug!(remaining_secs = token.remaining_secs(now), "Using cached token");
                return Ok(token.clone());
            }
            debug!("Token inside refresh margin, renewing");
        }

        let fresh = self.exchange().await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    /// Always performs a fresh exchange (used after a 401).
    pub async fn force_renew(&self) -> SyncResult<TokenInfo> {
        let mut guard = self.token.lock().await;

        let fresh = self.exchange().await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drops the cached token.
    pub async fn invalidate(&self) {
        *self.token.lock().await = None;
        info!("Cached token invalidated");
    }

    /// Returns true if a cached token is usable without renewal.
    pub async fn has_valid_token(&self) -> bool {
        let guard = self.token.lock().await;
        let now = self.clock.now();
        guard.as_ref().is_some_and(|t| !t.needs_refresh(now))
    }

    /// Seconds until the cached token expires, if there is one.
    pub async fn remaining_secs(&self) -> Option<u64> {
        let guard = self.token.lock().await;
        let now = self.clock.now();
        guard.as_ref().map(|t| t.remaining_secs(now))
    }

    /// Performs the client-credentials exchange. Never touches cached state.
    async fn exchange(&self) -> SyncResult<TokenInfo> {
        let config = self.config.current();
        let api = &config.api;

        if api.client_id.trim().is_empty() {
            return Err(SyncError::MissingCredentials("client_id"));
        }
        if api.client_secret.trim().is_empty() {
            return Err(SyncError::MissingCredentials("client_secret"));
        }
        if api.scope.trim().is_empty() {
            return Err(SyncError::MissingCredentials("scope"));
        }

        debug!(url = %api.auth_url, client_id = %api.client_id, "Requesting access token");

        let response = self
            .client
            .post(&api.auth_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", api.client_id.as_str()),
                ("client_secret", api.client_secret.as_str()),
                ("scope", api.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SyncError::AuthFailed(format!("Token request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::AuthFailed(format!("Token response unreadable: {}", e)))?;

        if status != reqwest::StatusCode::OK {
            warn!(status = status.as_u16(), "Token exchange rejected");
            return Err(SyncError::AuthFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate_chars(&body, MAX_ERROR_BODY_CHARS)
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| SyncError::AuthFailed(format!("Invalid token response: {}", e)))?;

        let token = TokenInfo {
            access_token: parsed.access_token,
            expires_at: self.clock.now() + Duration::from_secs(parsed.expires_in),
        };

        info!(expires_in_secs = parsed.expires_in, "Access token obtained");
        Ok(token)
    }
}

#[async_trait]
impl CredentialProvider for CredentialManager {
    async fn access_token(&self) -> SyncResult<String> {
        Ok(self.get_valid_token().await?.access_token)
    }

    async fn renew_access_token(&self) -> SyncResult<String> {
        Ok(self.force_renew().await?.access_token)
    }
}
