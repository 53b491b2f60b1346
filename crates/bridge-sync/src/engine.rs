//! Wires the engine components together.
//!
//! ```text
//! BridgeEngine::new(db, config, clock)
//!   ├── CredentialManager ──┐
//!   ├── ApiClient ◄─────────┘  (rate limiter + reqwest executor)
//!   ├── CachedResolver        (entity_mappings)
//!   ├── HandlerRegistry       (stock, price, product, order status)
//!   ├── OutboxProcessor
//!   └── Operator
//! ```

use bridge_db::Database;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::auth::CredentialManager;
use crate::clock::Clock;
use crate::config::ConfigSource;
use crate::error::SyncResult;
use crate::handlers::{HandlerRegistry, PriceHandler, SourceOfTruth, StockHandler};
use crate::operator::Operator;
use crate::outbox::OutboxProcessor;
use crate::resolver::{CachedResolver, EntityResolver};
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::transport::ApiClient;

/// A fully wired engine over one database.
#[derive(Debug, Clone)]
pub struct BridgeEngine {
    config: Arc<dyn ConfigSource>,
    processor: OutboxProcessor,
    operator: Operator,
}

impl BridgeEngine {
    /// Builds every component. Nothing touches the network yet.
    pub fn new(db: &Database, config: Arc<dyn ConfigSource>, clock: Arc<dyn Clock>) -> SyncResult<Self> {
        let credentials = Arc::new(CredentialManager::new(config.clone(), clock.clone())?);
        let api = ApiClient::from_config(config.clone(), credentials.clone(), clock.clone())?;
        let resolver: Arc<dyn EntityResolver> = Arc::new(CachedResolver::new(db.mappings(), clock.clone()));
        let source: Arc<dyn SourceOfTruth> = Arc::new(db.catalog());

        let registry = HandlerRegistry::standard(api.clone(), resolver.clone(), source.clone(), config.clone());
        let processor = OutboxProcessor::new(db.outbox(), registry, config.clone());

        let operator = Operator::new(
            processor.clone(),
            credentials,
            StockHandler::new(api.clone(), resolver.clone(), source.clone(), config.clone()),
            PriceHandler::new(api, resolver, source, config.clone()),
            clock,
        );

        Ok(Self {
            config,
            processor,
            operator,
        })
    }

    pub fn processor(&self) -> &OutboxProcessor {
        &self.processor
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// Spawns the scheduler as a background task.
    pub fn spawn_scheduler(&self) -> (JoinHandle<()>, SchedulerHandle) {
        let (scheduler, handle) = Scheduler::new(self.processor.clone(), self.config.clone());
        info!("Spawning outbox scheduler");
        (tokio::spawn(scheduler.run()), handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{BridgeConfig, StaticConfig};
    use crate::testing::test_config;
    use bridge_db::DbConfig;

    async fn engine(config: BridgeConfig) -> BridgeEngine {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        BridgeEngine::new(&db, Arc::new(StaticConfig::new(config)), Arc::new(ManualClock::new())).unwrap()
    }

    #[tokio::test]
    async fn test_engine_scheduler_round_trip() {
        let engine = engine(test_config()).await;
        let (task, handle) = engine.spawn_scheduler();

        let summary = handle.run_now().await.unwrap();
        assert_eq!(summary.claimed, 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_engine_runs_nothing() {
        let engine = engine(BridgeConfig::default()).await;

        let report = engine.operator().process_now().await.unwrap();

        assert!(report.summary.disabled);
        assert_eq!(engine.operator().status().await.unwrap().outstanding(), 0);
    }
}
