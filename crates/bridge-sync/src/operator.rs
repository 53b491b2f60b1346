//! # Operator Actions
//!
//! Manual actions behind the admin surface. Each returns a report the
//! caller can show as is; failures of individual items are part of the
//! report instead of an error.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Operator                                       │
//! │                                                                         │
//! │  process_now()        one processor run, pending before/after          │
//! │  reprocess(ids)       reset_for_retry per id                           │
//! │  cancel(ids)          cancel per id                                    │
//! │  purge_fatal()        delete ERRO_FATAL items                          │
//! │  cleanup(days)        delete finished items older than N days          │
//! │  status()             counts per status                                │
//! │  test_connection()    fresh token + remaining lifetime                 │
//! │  resync_prices(ids)   one price batch for many products                │
//! │  inspect_sku(sku)     stock and price as the API sees them             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use bridge_core::{EntityType, StatusSummary};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::CredentialManager;
use crate::clock::Clock;
use crate::error::SyncResult;
use crate::handlers::{PriceBatch, PriceHandler, RemotePrice, RemoteStock, StockHandler};
use crate::outbox::{OutboxProcessor, RunSummary};

/// An id the action could not apply to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub id: String,
    pub error: String,
}

/// Per-id result of a bulk action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTally {
    pub succeeded: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

impl ItemTally {
    fn fail(&mut self, id: &str, error: impl ToString) {
        self.failed.push(ItemFailure {
            id: id.to_string(),
            error: error.to_string(),
        });
    }

    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}

/// Result of [`Operator::process_now`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReport {
    pub pending_before: i64,
    pub pending_after: i64,
    pub summary: RunSummary,
}

/// Result of [`Operator::test_connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    pub connected: bool,
    pub remaining_secs: Option<u64>,
    pub error: Option<String>,
}

/// Remote view of one SKU.
#[derive(Debug, Clone, PartialEq)]
pub struct SkuInspection {
    pub sku: String,
    pub stock: Option<RemoteStock>,
    pub price: Option<RemotePrice>,
}

/// Entry point for manual actions.
#[derive(Debug, Clone)]
pub struct Operator {
    processor: OutboxProcessor,
    credentials: Arc<CredentialManager>,
    stock: StockHandler,
    prices: PriceHandler,
    clock: Arc<dyn Clock>,
}

impl Operator {
    pub fn new(
        processor: OutboxProcessor,
        credentials: Arc<CredentialManager>,
        stock: StockHandler,
        prices: PriceHandler,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            processor,
            credentials,
            stock,
            prices,
            clock,
        }
    }

    /// Runs the processor once, right now.
    pub async fn process_now(&self) -> SyncResult<ProcessReport> {
        let outbox = self.processor.outbox();
        let pending_before = outbox.status_summary().await?.pending;
        let summary = self.processor.run_once().await?;
        let pending_after = outbox.status_summary().await?.pending;

        info!(pending_before, pending_after, sent = summary.sent, "Manual outbox run finished");

        Ok(ProcessReport {
            pending_before,
            pending_after,
            summary,
        })
    }

    /// Puts each item back to PENDENTE with a fresh retry budget.
    pub async fn reprocess(&self, ids: &[String]) -> ItemTally {
        let mut tally = ItemTally::default();

        for id in ids {
            match self.processor.outbox().reset_for_retry(id).await {
                Ok(()) => tally.succeeded.push(id.clone()),
                Err(e) => {
                    warn!(id = %id, error = %e, "Reprocess failed");
                    tally.fail(id, e);
                }
            }
        }

        info!(
            succeeded = tally.success_count(),
            failed = tally.failure_count(),
            "Reprocess finished"
        );
        tally
    }

    /// Cancels each item that has not been delivered yet.
    pub async fn cancel(&self, ids: &[String]) -> ItemTally {
        let mut tally = ItemTally::default();

        for id in ids {
            match self.processor.outbox().cancel(id).await {
                Ok(true) => tally.succeeded.push(id.clone()),
                Ok(false) => tally.fail(id, "item is already finished"),
                Err(e) => tally.fail(id, e),
            }
        }

        tally
    }

    pub async fn purge_fatal(&self) -> SyncResult<u64> {
        let removed = self.processor.outbox().purge_fatal().await?;
        info!(removed, "Purged fatal items");
        Ok(removed)
    }

    pub async fn cleanup(&self, days: u32) -> SyncResult<u64> {
        let removed = self.processor.outbox().cleanup_old_items(days).await?;
        info!(removed, days, "Cleaned up finished items");
        Ok(removed)
    }

    pub async fn status(&self) -> SyncResult<StatusSummary> {
        Ok(self.processor.outbox().status_summary().await?)
    }

    /// Performs a fresh credential exchange.
    pub async fn test_connection(&self) -> ConnectionReport {
        match self.credentials.force_renew().await {
            Ok(token) => ConnectionReport {
                connected: true,
                remaining_secs: Some(token.remaining_secs(self.clock.now())),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "Connection test failed");
                ConnectionReport {
                    connected: false,
                    remaining_secs: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Sends the current price of each product in one batch.
    ///
    /// Products without a SKU mapping or without a usable price are
    /// reported and left out. If the batch call fails, every included
    /// product is reported with that error.
    pub async fn resync_prices(&self, entity_ids: &[String]) -> SyncResult<ItemTally> {
        let mut tally = ItemTally::default();
        let mut included = Vec::new();
        let mut prices = Vec::new();

        for id in entity_ids {
            let sku = match self.prices.resolver().resolve(EntityType::Product, id).await {
                Ok(Some(sku)) => sku,
                Ok(None) => {
                    tally.fail(id, "no SKU mapping");
                    continue;
                }
                Err(e) => {
                    tally.fail(id, e);
                    continue;
                }
            };

            match self.prices.price_update(id, sku).await {
                Ok(update) => {
                    included.push(id.clone());
                    prices.push(update);
                }
                Err(e) if e.is_config_error() => return Err(e),
                Err(e) => tally.fail(id, e),
            }
        }

        let Some(reseller_id) = prices.first().map(|p| p.reseller_id.clone()) else {
            return Ok(tally);
        };

        match self.prices.push_batch(&PriceBatch { reseller_id, prices }).await {
            Ok(()) => tally.succeeded.extend(included),
            Err(e) => {
                warn!(error = %e, "Price batch failed");
                for id in &included {
                    tally.fail(id, &e);
                }
            }
        }

        Ok(tally)
    }

    /// Reads stock and price for a SKU from the API.
    pub async fn inspect_sku(&self, sku: &str) -> SyncResult<SkuInspection> {
        let stock = self.stock.remote_stock(sku).await?;
        let price = self.prices.remote_price(sku).await?;

        Ok(SkuInspection {
            sku: sku.to_string(),
            stock,
            price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::handlers::SourceOfTruth;
    use crate::resolver::EntityResolver;
    use crate::testing::{test_config, Fixture, ScriptedExecutor};
    use crate::transport::ApiResponse;
    use bridge_core::{Money, NewQueueItem, Operation, QueueStatus};
    use bridge_db::EnqueueOutcome;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn operator(f: &Fixture, credentials: Arc<CredentialManager>) -> Operator {
        let source: Arc<dyn SourceOfTruth> = Arc::new(f.db.catalog());
        let processor = OutboxProcessor::new(f.db.outbox(), f.registry(), f.config.clone());
        Operator::new(
            processor,
            credentials,
            StockHandler::new(f.api.clone(), f.resolver.clone(), source.clone(), f.config.clone()),
            PriceHandler::new(f.api.clone(), f.resolver.clone(), source, f.config.clone()),
            Arc::new(f.clock.clone()),
        )
    }

    fn offline_credentials(f: &Fixture) -> Arc<CredentialManager> {
        Arc::new(CredentialManager::new(f.config.clone(), Arc::new(f.clock.clone())).unwrap())
    }

    async fn enqueue(f: &Fixture, new: NewQueueItem) -> String {
        match f.db.outbox().enqueue(&new).await.unwrap() {
            EnqueueOutcome::Queued(item) => item.id,
            other => panic!("not queued: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_process_now_reports_pending_counts() {
        let f = Fixture::new(test_config(), ScriptedExecutor::statuses(&[])).await;
        let op = operator(&f, offline_credentials(&f));

        enqueue(&f, NewQueueItem::new(EntityType::Stock, Operation::Delete, "1").with_key("A1")).await;
        enqueue(&f, NewQueueItem::new(EntityType::Stock, Operation::Delete, "2").with_key("A2")).await;

        let report = op.process_now().await.unwrap();

        assert_eq!(report.pending_before, 2);
        assert_eq!(report.pending_after, 0);
        assert_eq!(report.summary.sent, 2);
    }

    #[tokio::test]
    async fn test_reprocess_tallies_each_id() {
        let f = Fixture::new(test_config(), ScriptedExecutor::statuses(&[])).await;
        let op = operator(&f, offline_credentials(&f));

        let id = enqueue(&f, NewQueueItem::new(EntityType::Partner, Operation::Create, "9")).await;
        op.process_now().await.unwrap();
        assert_eq!(f.db.outbox().get(&id).await.unwrap().unwrap().status, QueueStatus::FatalError);

        let tally = op.reprocess(&[id.clone(), "missing".to_string()]).await;

        assert_eq!(tally.succeeded, vec![id.clone()]);
        assert_eq!(tally.failure_count(), 1);
        assert_eq!(tally.failed[0].id, "missing");

        let item = f.db.outbox().get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert!(item.last_error.is_none());
    }

    #[tokio::test]
    async fn test_cancel_reports_finished_items() {
        let f = Fixture::new(test_config(), ScriptedExecutor::statuses(&[])).await;
        let op = operator(&f, offline_credentials(&f));

        let sent = enqueue(&f, NewQueueItem::new(EntityType::Stock, Operation::Delete, "1").with_key("A1")).await;
        op.process_now().await.unwrap();
        let pending = enqueue(&f, NewQueueItem::new(EntityType::Stock, Operation::Delete, "2").with_key("A2")).await;

        let tally = op.cancel(&[pending.clone(), sent.clone()]).await;

        assert_eq!(tally.succeeded, vec![pending]);
        assert_eq!(tally.failed[0].id, sent);
        assert_eq!(op.status().await.unwrap().cancelled, 1);
    }

    #[tokio::test]
    async fn test_purge_and_cleanup_counts() {
        let f = Fixture::new(test_config(), ScriptedExecutor::statuses(&[])).await;
        let op = operator(&f, offline_credentials(&f));

        enqueue(&f, NewQueueItem::new(EntityType::Partner, Operation::Create, "9")).await;
        enqueue(&f, NewQueueItem::new(EntityType::Stock, Operation::Delete, "1").with_key("A1")).await;
        op.process_now().await.unwrap();

        // Nothing is older than a day yet.
        assert_eq!(op.cleanup(1).await.unwrap(), 0);
        assert_eq!(op.purge_fatal().await.unwrap(), 1);
        assert_eq!(op.purge_fatal().await.unwrap(), 0);

        let status = op.status().await.unwrap();
        assert_eq!(status.fatal, 0);
        assert_eq!(status.sent, 1);
    }

    #[tokio::test]
    async fn test_connection_reports_token_lifetime() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let mut config: BridgeConfig = test_config();
        config.api.auth_url = format!("{}/token", server.uri());
        let f = Fixture::new(config, ScriptedExecutor::statuses(&[])).await;
        let op = operator(&f, offline_credentials(&f));

        let report = op.test_connection().await;
        assert!(report.connected);
        assert_eq!(report.remaining_secs, Some(3600));

        // Every test performs a new exchange.
        f.clock.advance(Duration::from_secs(100));
        let report = op.test_connection().await;
        assert_eq!(report.remaining_secs, Some(3600));
    }

    #[tokio::test]
    async fn test_connection_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let mut config = test_config();
        config.api.auth_url = format!("{}/token", server.uri());
        let f = Fixture::new(config, ScriptedExecutor::statuses(&[])).await;
        let op = operator(&f, offline_credentials(&f));

        let report = op.test_connection().await;

        assert!(!report.connected);
        assert_eq!(report.remaining_secs, None);
        assert!(report.error.unwrap().contains("invalid_client"));
    }

    #[tokio::test]
    async fn test_resync_prices_sends_one_batch() {
        let f = Fixture::new(test_config(), ScriptedExecutor::statuses(&[200])).await;
        let op = operator(&f, offline_credentials(&f));

        f.db.catalog().upsert_price("1", Money::from_cents(1990), None).await.unwrap();
        f.db.catalog().upsert_price("2", Money::from_cents(500), Some(Money::from_cents(750))).await.unwrap();
        f.resolver.set_mapping(EntityType::Product, "1", "SKU-1").await.unwrap();
        f.resolver.set_mapping(EntityType::Product, "2", "SKU-2").await.unwrap();
        f.resolver.set_mapping(EntityType::Product, "3", "SKU-3").await.unwrap();

        let ids: Vec<String> = ["1", "2", "3", "4"].iter().map(|s| s.to_string()).collect();
        let tally = op.resync_prices(&ids).await.unwrap();

        assert_eq!(tally.succeeded, vec!["1".to_string(), "2".to_string()]);
        let failed: Vec<&str> = tally.failed.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(failed, vec!["3", "4"]);

        assert_eq!(f.executor.calls(), 1);
        let sent = f.executor.request(0);
        assert_eq!(
            sent.url.as_str(),
            "https://api.test/price-management/v1/prices/R1/batches"
        );
        let body: serde_json::Value = serde_json::from_str(&sent.body.unwrap()).unwrap();
        assert_eq!(body["resellerId"], "R1");
        assert_eq!(body["prices"].as_array().unwrap().len(), 2);
        assert_eq!(body["prices"][1]["listPrice"], serde_json::json!(7.5));
    }

    #[tokio::test]
    async fn test_resync_prices_batch_failure_fails_included() {
        let f = Fixture::new(test_config(), ScriptedExecutor::always(400)).await;
        let op = operator(&f, offline_credentials(&f));

        f.db.catalog().upsert_price("1", Money::from_cents(1990), None).await.unwrap();
        f.resolver.set_mapping(EntityType::Product, "1", "SKU-1").await.unwrap();

        let tally = op.resync_prices(&["1".to_string()]).await.unwrap();

        assert!(tally.succeeded.is_empty());
        assert_eq!(tally.failed[0].id, "1");
    }

    #[tokio::test]
    async fn test_resync_prices_without_reseller_is_config_error() {
        let mut config = test_config();
        config.host.reseller_id = None;
        let f = Fixture::new(config, ScriptedExecutor::statuses(&[])).await;
        let op = operator(&f, offline_credentials(&f));

        f.db.catalog().upsert_price("1", Money::from_cents(1990), None).await.unwrap();
        f.resolver.set_mapping(EntityType::Product, "1", "SKU-1").await.unwrap();

        let err = op.resync_prices(&["1".to_string()]).await.unwrap_err();

        assert!(err.is_config_error());
        assert_eq!(f.executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_inspect_sku_reads_both_surfaces() {
        let executor = ScriptedExecutor::new(vec![
            Ok(ApiResponse::new(200, r#"{"sku":"ABC","quantity":4}"#)),
            Ok(ApiResponse::new(404, "")),
        ]);
        let f = Fixture::new(test_config(), executor).await;
        let op = operator(&f, offline_credentials(&f));

        let inspection = op.inspect_sku("ABC").await.unwrap();

        assert_eq!(inspection.stock.unwrap().quantity, 4.0);
        assert!(inspection.price.is_none());
        assert_eq!(
            f.executor.request(1).url.as_str(),
            "https://api.test/price-management/v1/prices/ABC"
        );
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = ConnectionReport {
            connected: true,
            remaining_secs: Some(10),
            error: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["remainingSecs"], 10);
        assert!(json["error"].is_null());
    }
}
