//! Test doubles shared by the engine's unit tests.

use async_trait::async_trait;
use bridge_db::{Database, DbConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::auth::CredentialProvider;
use crate::clock::ManualClock;
use crate::config::{BridgeConfig, ConfigSource, StaticConfig};
use crate::error::SyncResult;
use crate::handlers::HandlerRegistry;
use crate::rate_limit::RateLimiter;
use crate::resolver::CachedResolver;
use crate::transport::{ApiClient, ApiResponse, HttpExecutor, PreparedRequest};

/// Executor that replays a script and records every request.
///
/// Once the script runs out every call answers `fallback`.
#[derive(Debug)]
pub(crate) struct ScriptedExecutor {
    script: Mutex<VecDeque<SyncResult<ApiResponse>>>,
    fallback: Mutex<u16>,
    seen: Mutex<Vec<PreparedRequest>>,
}

impl ScriptedExecutor {
    pub(crate) fn new(script: Vec<SyncResult<ApiResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(200),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn statuses(statuses: &[u16]) -> Self {
        Self::new(statuses.iter().map(|s| Ok(ApiResponse::new(*s, ""))).collect())
    }

    pub(crate) fn always(status: u16) -> Self {
        let executor = Self::new(Vec::new());
        *executor.fallback.lock().unwrap() = status;
        executor
    }

    pub(crate) fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub(crate) fn request(&self, index: usize) -> PreparedRequest {
        self.seen.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl HttpExecutor for ScriptedExecutor {
    async fn execute(&self, request: PreparedRequest) -> SyncResult<ApiResponse> {
        self.seen.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ApiResponse::new(*self.fallback.lock().unwrap(), "")))
    }
}

/// Credentials that hand out `token-N`, where N counts renewals.
#[derive(Debug, Default)]
pub(crate) struct StubCredentials {
    pub(crate) renewals: AtomicU32,
}

#[async_trait]
impl CredentialProvider for StubCredentials {
    async fn access_token(&self) -> SyncResult<String> {
        Ok(format!("token-{}", self.renewals.load(Ordering::SeqCst)))
    }

    async fn renew_access_token(&self) -> SyncResult<String> {
        let n = self.renewals.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token-{}", n))
    }
}

/// Active configuration pointing at `https://api.test`.
pub(crate) fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.integration.active = true;
    config.integration.batch_size = 10;
    config.api.orders_base_url = "https://api.test/order-management/v1".into();
    config.api.stock_base_url = "https://api.test/stock-management/v1".into();
    config.api.price_base_url = "https://api.test/price-management/v1".into();
    config.api.client_id = "client".into();
    config.api.client_secret = "secret".into();
    config.api.scope = "scope".into();
    config.api.max_requests_per_minute = 1000;
    config.host.storage_id = Some("1".into());
    config.host.reseller_id = Some("R1".into());
    config
}

/// In-memory database plus a scripted API.
pub(crate) struct Fixture {
    pub(crate) db: Database,
    pub(crate) clock: ManualClock,
    pub(crate) config: Arc<dyn ConfigSource>,
    pub(crate) executor: Arc<ScriptedExecutor>,
    pub(crate) credentials: Arc<StubCredentials>,
    pub(crate) api: ApiClient,
    pub(crate) resolver: Arc<CachedResolver>,
}

impl Fixture {
    pub(crate) async fn new(config: BridgeConfig, executor: ScriptedExecutor) -> Self {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let clock = ManualClock::new();
        let config: Arc<dyn ConfigSource> = Arc::new(StaticConfig::new(config));
        let executor = Arc::new(executor);
        let credentials = Arc::new(StubCredentials::default());
        let limiter = Arc::new(RateLimiter::new(config.clone(), Arc::new(clock.clone())));
        let api = ApiClient::new(
            config.clone(),
            credentials.clone(),
            limiter,
            executor.clone(),
            Arc::new(clock.clone()),
        );
        let resolver = Arc::new(CachedResolver::new(db.mappings(), Arc::new(clock.clone())));

        Self {
            db,
            clock,
            config,
            executor,
            credentials,
            api,
            resolver,
        }
    }

    pub(crate) fn registry(&self) -> HandlerRegistry {
        HandlerRegistry::standard(
            self.api.clone(),
            self.resolver.clone(),
            Arc::new(self.db.catalog()),
            self.config.clone(),
        )
    }
}
