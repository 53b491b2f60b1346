//! # Bridge Configuration
//!
//! Configuration management for the delivery engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BRIDGE_ACTIVE=true                                                 │
//! │     BRIDGE_CLIENT_SECRET=...                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/channel-bridge/bridge.toml (Linux)                       │
//! │     ~/Library/Application Support/com.bellube.channel-bridge/...       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     inactive, batch 50, 30 req/min, 3 retries                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # bridge.toml
//! [integration]
//! active = true
//! batch_size = 50
//! max_retries = 3
//! poll_interval_secs = 60
//!
//! [api]
//! client_id = "..."
//! client_secret = "..."
//! scope = "api://fastchannel/.default"
//! subscription_key = "..."
//! max_requests_per_minute = 30
//!
//! [host]
//! storage_id = "1"
//! reseller_id = "77"
//!
//! [database]
//! path = "/var/lib/channel-bridge/bridge.db"
//! ```
//!
//! ## Who Reads It
//! The engine never holds a `BridgeConfig` directly. It asks a
//! [`ConfigSource`] for the current snapshot on every run, so an operator
//! editing `bridge.toml` doesn't need a restart.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Integration Settings
// =============================================================================

/// Processor behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationSettings {
    /// Administrative switch. When false every run is a no-op.
    #[serde(default)]
    pub active: bool,

    /// Items claimed per run.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Failed deliveries allowed before an item becomes ERRO_FATAL.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Seconds between scheduled runs.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Days to keep ENVIADO / ERRO_FATAL / CANCELADO items.
    #[serde(default = "default_cleanup_days")]
    pub cleanup_after_days: u32,

    /// PROCESSANDO items claimed longer ago than this are returned to
    /// PENDENTE when the scheduler starts.
    #[serde(default = "default_stale_claim")]
    pub stale_claim_secs: u64,
}

fn default_batch_size() -> u32 {
    50
}
fn default_max_retries() -> u32 {
    3
}
fn default_poll_interval() -> u64 {
    60
}
fn default_cleanup_days() -> u32 {
    30
}
fn default_stale_claim() -> u64 {
    600
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        IntegrationSettings {
            active: false,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            poll_interval_secs: default_poll_interval(),
            cleanup_after_days: default_cleanup_days(),
            stale_claim_secs: default_stale_claim(),
        }
    }
}

// =============================================================================
// API Settings
// =============================================================================

/// Remote API endpoints, credentials and transport limits.
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// OAuth2 token endpoint.
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Order management surface.
    #[serde(default = "default_orders_url")]
    pub orders_base_url: String,

    /// Stock management surface.
    #[serde(default = "default_stock_url")]
    pub stock_base_url: String,

    /// Price management surface.
    #[serde(default = "default_price_url")]
    pub price_base_url: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    #[serde(default)]
    pub scope: String,

    /// Fallback key for every surface.
    #[serde(default)]
    pub subscription_key: String,

    /// Key for the orders surface. Empty means `subscription_key`.
    #[serde(default)]
    pub distribution_subscription_key: String,

    /// Key for the stock and price surfaces. Empty means `subscription_key`.
    #[serde(default)]
    pub consumption_subscription_key: String,

    /// Per-request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Sliding-window cap across all surfaces.
    #[serde(default = "default_max_rpm")]
    pub max_requests_per_minute: u32,

    /// Extra attempts after the first for 429 / 5xx / network failures.
    #[serde(default = "default_transport_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles after each retryable failure.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
}

fn default_auth_url() -> String {
    "https://login.microsoftonline.com/fastchannel.com/oauth2/v2.0/token".to_string()
}
fn default_orders_url() -> String {
    "https://api.commerce.fastchannel.com/order-management/v1".to_string()
}
fn default_stock_url() -> String {
    "https://api.commerce.fastchannel.com/stock-management/v1".to_string()
}
fn default_price_url() -> String {
    "https://api.commerce.fastchannel.com/price-management/v1".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_max_rpm() -> u32 {
    30
}
fn default_transport_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    1000
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            auth_url: default_auth_url(),
            orders_base_url: default_orders_url(),
            stock_base_url: default_stock_url(),
            price_base_url: default_price_url(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: String::new(),
            subscription_key: String::new(),
            distribution_subscription_key: String::new(),
            consumption_subscription_key: String::new(),
            timeout_secs: default_timeout(),
            max_requests_per_minute: default_max_rpm(),
            max_retries: default_transport_retries(),
            initial_backoff_ms: default_initial_backoff(),
        }
    }
}

impl ApiSettings {
    /// Key sent to the orders surface.
    pub fn distribution_key(&self) -> &str {
        non_empty_or(&self.distribution_subscription_key, &self.subscription_key)
    }

    /// Key sent to the stock and price surfaces.
    pub fn consumption_key(&self) -> &str {
        non_empty_or(&self.consumption_subscription_key, &self.subscription_key)
    }

    /// Returns true when the token exchange can be attempted.
    pub fn has_credentials(&self) -> bool {
        !self.client_id.trim().is_empty()
            && !self.client_secret.trim().is_empty()
            && !self.scope.trim().is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSettings")
            .field("auth_url", &self.auth_url)
            .field("orders_base_url", &self.orders_base_url)
            .field("stock_base_url", &self.stock_base_url)
            .field("price_base_url", &self.price_base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("scope", &self.scope)
            .field("subscription_key", &redact(&self.subscription_key))
            .field(
                "distribution_subscription_key",
                &redact(&self.distribution_subscription_key),
            )
            .field(
                "consumption_subscription_key",
                &redact(&self.consumption_subscription_key),
            )
            .field("timeout_secs", &self.timeout_secs)
            .field("max_requests_per_minute", &self.max_requests_per_minute)
            .field("max_retries", &self.max_retries)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .finish()
    }
}

// =============================================================================
// Host Settings
// =============================================================================

/// Identifiers the ERP side assigns to this integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Storage location whose stock is published.
    #[serde(default)]
    pub storage_id: Option<String>,

    /// Reseller the prices are published for.
    #[serde(default)]
    pub reseller_id: Option<String>,

    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "BRL".to_string()
}

impl Default for HostSettings {
    fn default() -> Self {
        HostSettings {
            storage_id: None,
            reseller_id: None,
            currency: default_currency(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file holding the outbox queue.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "bellube", "channel-bridge")
        .map(|dirs| dirs.data_dir().join("bridge.db"))
        .unwrap_or_else(|| PathBuf::from("bridge.db"))
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub integration: IntegrationSettings,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub host: HostSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl BridgeConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (bridge.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading bridge config from file");
                config = Self::from_file(&path)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load bridge config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a TOML file without env overrides or validation.
    pub fn from_file(path: &Path) -> SyncResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Bridge config saved");
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// Missing credentials are not a validation error: an inactive bridge
    /// may be installed before anyone has them. They fail at token time.
    pub fn validate(&self) -> SyncResult<()> {
        for (name, value) in [
            ("auth_url", &self.api.auth_url),
            ("orders_base_url", &self.api.orders_base_url),
            ("stock_base_url", &self.api.stock_base_url),
            ("price_base_url", &self.api.price_base_url),
        ] {
            let parsed = url::Url::parse(value)
                .map_err(|e| SyncError::InvalidUrl(format!("{}: {} ({})", name, value, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(SyncError::InvalidUrl(format!(
                    "{} must use http or https, got: {}",
                    name, value
                )));
            }
        }

        if self.integration.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.api.max_requests_per_minute == 0 {
            return Err(SyncError::InvalidConfig(
                "max_requests_per_minute must be greater than 0".into(),
            ));
        }

        if self.integration.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `BRIDGE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(active) = var("BRIDGE_ACTIVE") {
            match active.to_lowercase().as_str() {
                "1" | "true" | "yes" | "s" => self.integration.active = true,
                "0" | "false" | "no" | "n" => self.integration.active = false,
                _ => warn!(value = %active, "Ignoring BRIDGE_ACTIVE"),
            }
        }

        if let Some(size) = var("BRIDGE_BATCH_SIZE").and_then(|v| v.parse().ok()) {
            self.integration.batch_size = size;
        }

        if let Some(retries) = var("BRIDGE_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.integration.max_retries = retries;
        }

        if let Some(secs) = var("BRIDGE_POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.integration.poll_interval_secs = secs;
        }

        if let Some(rpm) = var("BRIDGE_MAX_REQUESTS_PER_MINUTE").and_then(|v| v.parse().ok()) {
            debug!(rpm, "Overriding rate limit from environment");
            self.api.max_requests_per_minute = rpm;
        }

        if let Some(url) = var("BRIDGE_AUTH_URL") {
            self.api.auth_url = url;
        }
        if let Some(url) = var("BRIDGE_ORDERS_BASE_URL") {
            self.api.orders_base_url = url;
        }
        if let Some(url) = var("BRIDGE_STOCK_BASE_URL") {
            self.api.stock_base_url = url;
        }
        if let Some(url) = var("BRIDGE_PRICE_BASE_URL") {
            self.api.price_base_url = url;
        }

        if let Some(id) = var("BRIDGE_CLIENT_ID") {
            self.api.client_id = id;
        }
        if let Some(secret) = var("BRIDGE_CLIENT_SECRET") {
            self.api.client_secret = secret;
        }
        if let Some(scope) = var("BRIDGE_SCOPE") {
            self.api.scope = scope;
        }
        if let Some(key) = var("BRIDGE_SUBSCRIPTION_KEY") {
            self.api.subscription_key = key;
        }

        if let Some(id) = var("BRIDGE_STORAGE_ID") {
            self.host.storage_id = Some(id);
        }
        if let Some(id) = var("BRIDGE_RESELLER_ID") {
            self.host.reseller_id = Some(id);
        }

        if let Some(path) = var("BRIDGE_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "bellube", "channel-bridge")
            .map(|dirs| dirs.config_dir().join("bridge.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns true if the processor should run.
    pub fn is_active(&self) -> bool {
        self.integration.active
    }

    /// Item-level retry budget as stored in `retry_count`.
    pub fn max_retries(&self) -> i64 {
        i64::from(self.integration.max_retries)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.integration.poll_interval_secs)
    }

    pub fn stale_claim_after(&self) -> Duration {
        Duration::from_secs(self.integration.stale_claim_secs)
    }
}

// =============================================================================
// Config Source
// =============================================================================

/// Accessor the engine calls for the current configuration.
///
/// Implementations decide how fresh the value is; callers only read.
pub trait ConfigSource: Send + Sync + fmt::Debug {
    fn current(&self) -> Arc<BridgeConfig>;
}

/// A fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfig(Arc<BridgeConfig>);

impl StaticConfig {
    pub fn new(config: BridgeConfig) -> Self {
        StaticConfig(Arc::new(config))
    }
}

impl ConfigSource for StaticConfig {
    fn current(&self) -> Arc<BridgeConfig> {
        Arc::clone(&self.0)
    }
}

/// Serves the last loaded `bridge.toml`, refreshed in the background.
///
/// [`current`](ConfigSource::current) only clones the snapshot. The file is
/// read by [`reload`](Self::reload), which [`spawn_reloader`](Self::spawn_reloader)
/// calls once per `ttl` on the blocking pool. A failed reload keeps serving
/// the last good snapshot.
#[derive(Debug)]
pub struct ReloadingConfig {
    path: PathBuf,
    ttl: Duration,
    snapshot: RwLock<Arc<BridgeConfig>>,
}

/// How long a loaded configuration is served before re-reading the file.
pub const CONFIG_RELOAD_TTL: Duration = Duration::from_secs(300);

impl ReloadingConfig {
    /// Loads the file once; fails if the first load fails.
    pub fn new(path: PathBuf) -> SyncResult<Self> {
        Self::with_ttl(path, CONFIG_RELOAD_TTL)
    }

    pub fn with_ttl(path: PathBuf, ttl: Duration) -> SyncResult<Self> {
        let config = BridgeConfig::load(Some(path.clone()))?;
        Ok(ReloadingConfig {
            path,
            ttl,
            snapshot: RwLock::new(Arc::new(config)),
        })
    }

    /// Re-reads the file and swaps the snapshot. Blocking file IO.
    pub fn reload(&self) -> SyncResult<()> {
        let fresh = Arc::new(BridgeConfig::load(Some(self.path.clone()))?);

        let mut snapshot = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *snapshot = fresh;

        debug!(path = ?self.path, "Bridge config reloaded");
        Ok(())
    }

    /// Spawns a task that calls [`reload`](Self::reload) every `ttl`.
    pub fn spawn_reloader(self: &Arc<Self>) -> JoinHandle<()> {
        let source = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(source.ttl.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick is immediate; the file was just loaded.
            interval.tick().await;

            loop {
                interval.tick().await;

                let reloading = Arc::clone(&source);
                match tokio::task::spawn_blocking(move || reloading.reload()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Config reload failed, keeping previous"),
                    Err(e) => warn!(error = %e, "Config reload task failed"),
                }
            }
        })
    }
}

impl ConfigSource for ReloadingConfig {
    fn current(&self) -> Arc<BridgeConfig> {
        let snapshot = match self.snapshot.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(&*snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bridge-config-{}-{}.toml", name, std::process::id()))
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert!(!config.is_active());
        assert_eq!(config.integration.batch_size, 50);
        assert_eq!(config.api.max_requests_per_minute, 30);
        assert_eq!(config.api.max_retries, 3);
        assert_eq!(config.api.initial_backoff_ms, 1000);
        assert_eq!(config.host.currency, "BRL");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_subscription_key_fallback() {
        let mut api = ApiSettings {
            subscription_key: "shared".into(),
            ..ApiSettings::default()
        };
        assert_eq!(api.distribution_key(), "shared");
        assert_eq!(api.consumption_key(), "shared");

        api.consumption_subscription_key = "consumption".into();
        assert_eq!(api.consumption_key(), "consumption");
        assert_eq!(api.distribution_key(), "shared");
    }

    #[test]
    fn test_config_validation() {
        let mut config = BridgeConfig::default();

        config.integration.batch_size = 0;
        assert!(config.validate().is_err());

        config.integration.batch_size = 10;
        config.api.stock_base_url = "ftp://example.com".into();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.api.stock_base_url = "not a url".into();
        assert!(config.validate().is_err());

        config.api.stock_base_url = "http://localhost:8080/stock".into();
        config.api.max_requests_per_minute = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BRIDGE_ACTIVE", "true"),
            ("BRIDGE_BATCH_SIZE", "7"),
            ("BRIDGE_MAX_REQUESTS_PER_MINUTE", "12"),
            ("BRIDGE_CLIENT_SECRET", "s3cret"),
            ("BRIDGE_STORAGE_ID", "2"),
            ("BRIDGE_MAX_RETRIES", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = BridgeConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert!(config.is_active());
        assert_eq!(config.integration.batch_size, 7);
        assert_eq!(config.api.max_requests_per_minute, 12);
        assert_eq!(config.api.client_secret, "s3cret");
        assert_eq!(config.host.storage_id.as_deref(), Some("2"));
        assert_eq!(config.integration.max_retries, 3);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = BridgeConfig::default();
        config.api.client_secret = "super-secret".into();
        config.api.subscription_key = "sub-key".into();

        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("sub-key"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let path = temp_path("roundtrip");
        let mut config = BridgeConfig::default();
        config.integration.active = true;
        config.host.reseller_id = Some("77".into());

        config.save(Some(path.clone())).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[integration]"));
        assert!(contents.contains("[api]"));

        let loaded = BridgeConfig::from_file(&path).unwrap();
        assert!(loaded.is_active());
        assert_eq!(loaded.host.reseller_id.as_deref(), Some("77"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: BridgeConfig = toml::from_str("[integration]\nactive = true\n").unwrap();
        assert!(config.is_active());
        assert_eq!(config.integration.batch_size, 50);
        assert_eq!(config.api.timeout_secs, 30);
    }

    #[test]
    fn test_reloading_config_keeps_last_good() {
        let path = temp_path("reload");
        std::fs::write(&path, "[integration]\nbatch_size = 5\n").unwrap();

        let source = ReloadingConfig::with_ttl(path.clone(), Duration::ZERO).unwrap();
        assert_eq!(source.current().integration.batch_size, 5);

        // Reading never touches the file.
        std::fs::write(&path, "[integration]\nbatch_size = 9\n").unwrap();
        assert_eq!(source.current().integration.batch_size, 5);

        source.reload().unwrap();
        assert_eq!(source.current().integration.batch_size, 9);

        std::fs::write(&path, "[integration\nbroken").unwrap();
        assert!(source.reload().is_err());
        assert_eq!(source.current().integration.batch_size, 9);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_reloader_picks_up_changes() {
        let path = temp_path("reloader");
        std::fs::write(&path, "[integration]\nbatch_size = 5\n").unwrap();

        let source = Arc::new(
            ReloadingConfig::with_ttl(path.clone(), Duration::from_millis(20)).unwrap(),
        );
        let task = source.spawn_reloader();

        std::fs::write(&path, "[integration]\nbatch_size = 7\n").unwrap();
        let mut seen = 0;
        for _ in 0..100 {
            seen = source.current().integration.batch_size;
            if seen == 7 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(seen, 7);

        task.abort();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_static_config_shares_snapshot() {
        let source = StaticConfig::new(BridgeConfig::default());
        assert!(Arc::ptr_eq(&source.current(), &source.current()));
    }
}
