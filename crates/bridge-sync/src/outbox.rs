//! # Outbox Processor
//!
//! Drains the outbox queue into the remote API, one run at a time.
//!
//! ## Run Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        OutboxProcessor::run_once                        │
//! │                                                                         │
//! │  1. integration.active == false ──► return (no-op, logged)              │
//! │     credentials missing         ──► return (no-op, logged)              │
//! │                                                                         │
//! │  2. reactivate_errors(max)   ERRO, retry_count < max  ──► PENDENTE      │
//! │     fail_exhausted(max)      ERRO, retry_count >= max ──► ERRO_FATAL    │
//! │                                                                         │
//! │  3. claim_batch(batch_size)  priority DESC, created_at ASC              │
//! │                                                                         │
//! │  4. for each item, in order:                                            │
//! │       mark_processing ── lost the row? ──► skip                         │
//! │       registry.dispatch(item)                                           │
//! │         ├── Ok                          ──► mark_sent                   │
//! │         ├── Err, configuration          ──► release, stop the run       │
//! │         ├── Err, permanent              ──► mark_fatal                  │
//! │         ├── Err, retry_count < max      ──► mark_error                  │
//! │         └── Err, retries used up        ──► mark_fatal                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A handler failure is recorded on its item and never aborts the batch.
//! A configuration failure is not the item's fault: the item goes back to
//! PENDENTE with its retry count intact and the rest of the batch waits
//! for the next run. A store failure aborts the run and is returned to the
//! caller.

use bridge_core::QueueItem;
use bridge_db::OutboxRepository;
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ConfigSource;
use crate::error::SyncResult;
use crate::handlers::{HandlerOutcome, HandlerRegistry};

/// Tally of one processor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// The integration was disabled and nothing ran.
    pub disabled: bool,
    /// Credentials or a required setting were missing. Items claimed before
    /// this was noticed went back to PENDENTE untouched.
    pub unconfigured: bool,
    /// ERRO items moved back to PENDENTE.
    pub reactivated: u64,
    /// ERRO items moved to ERRO_FATAL after using every retry.
    pub exhausted: u64,
    /// Items returned by the claim query.
    pub claimed: usize,
    /// Items another processor took first.
    pub lost: usize,
    pub sent: usize,
    /// Items handed back to PENDENTE without using a retry.
    pub released: usize,
    /// Items finished without a remote call.
    pub skipped: usize,
    /// Items marked ERRO for a later retry.
    pub failed: usize,
    pub fatal: usize,
}

impl RunSummary {
    fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    fn unconfigured() -> Self {
        Self {
            unconfigured: true,
            ..Self::default()
        }
    }

    /// Items this run finished successfully.
    pub fn succeeded(&self) -> usize {
        self.sent + self.skipped
    }
}

/// Runs the outbox through the registered handlers.
#[derive(Debug, Clone)]
pub struct OutboxProcessor {
    outbox: OutboxRepository,
    registry: Arc<HandlerRegistry>,
    config: Arc<dyn ConfigSource>,
}

impl OutboxProcessor {
    pub fn new(
        outbox: OutboxRepository,
        registry: HandlerRegistry,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            outbox,
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn outbox(&self) -> &OutboxRepository {
        &self.outbox
    }

    /// Returns items a dead run left in PROCESSANDO to PENDENTE.
    pub async fn recover_stale(&self) -> SyncResult<u64> {
        let older_than = self.config.current().stale_claim_after();
        let older_than = chrono::Duration::from_std(older_than)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        Ok(self.outbox.recover_stale(older_than).await?)
    }

    /// Performs one processing run.
    ///
    /// ## Errors
    /// Only store failures. Handler failures are recorded on their items.
    pub async fn run_once(&self) -> SyncResult<RunSummary> {
        let config = self.config.current();

        if !config.is_active() {
            info!("Integration disabled, skipping outbox run");
            return Ok(RunSummary::disabled());
        }

        if !config.api.has_credentials() {
            warn!("API credentials not configured, skipping outbox run");
            return Ok(RunSummary::unconfigured());
        }

        let max_retries = config.max_retries();
        let mut summary = RunSummary {
            reactivated: self.outbox.reactivate_errors(max_retries).await?,
            exhausted: self.outbox.fail_exhausted(max_retries).await?,
            ..RunSummary::default()
        };

        let batch = self.outbox.claim_batch(config.integration.batch_size).await?;
        summary.claimed = batch.len();

        if batch.is_empty() {
            debug!("No pending outbox items");
            return Ok(summary);
        }

        info!(count = batch.len(), "Processing outbox batch");

        for item in &batch {
            if self.process_item(item, max_retries, &mut summary).await?.is_break() {
                summary.unconfigured = true;
                break;
            }
        }

        info!(
            sent = summary.sent,
            released = summary.released,
            skipped = summary.skipped,
            failed = summary.failed,
            fatal = summary.fatal,
            lost = summary.lost,
            "Outbox run complete"
        );

        Ok(summary)
    }

    async fn process_item(
        &self,
        item: &QueueItem,
        max_retries: i64,
        summary: &mut RunSummary,
    ) -> SyncResult<ControlFlow<()>> {
        if !self.outbox.mark_processing(&item.id).await? {
            debug!(id = %item.id, "Item claimed elsewhere, skipping");
            summary.lost += 1;
            return Ok(ControlFlow::Continue(()));
        }

        match self.registry.dispatch(item).await {
            Ok(outcome) => {
                self.outbox.mark_sent(&item.id).await?;
                match outcome {
                    HandlerOutcome::Delivered => {
                        debug!(id = %item.id, entity_type = %item.entity_type, "Item sent");
                        summary.sent += 1;
                    }
                    HandlerOutcome::Skipped(reason) => {
                        info!(id = %item.id, entity_type = %item.entity_type, %reason, "Item skipped");
                        summary.skipped += 1;
                    }
                }
            }
            Err(err) if err.is_config_error() => {
                warn!(
                    id = %item.id,
                    entity_type = %item.entity_type,
                    error = %err,
                    "Configuration incomplete, releasing item and stopping the run"
                );
                self.outbox.release(&item.id).await?;
                summary.released += 1;
                return Ok(ControlFlow::Break(()));
            }
            Err(err) if err.is_permanent() => {
                warn!(
                    id = %item.id,
                    entity_type = %item.entity_type,
                    entity_id = %item.entity_id,
                    error = %err,
                    "Permanent failure, item is fatal"
                );
                self.outbox.mark_fatal(&item.id, &err.to_string()).await?;
                summary.fatal += 1;
            }
            Err(err) if item.can_retry(max_retries) => {
                warn!(
                    id = %item.id,
                    entity_type = %item.entity_type,
                    entity_id = %item.entity_id,
                    retry_count = item.retry_count,
                    kind = ?err.failure_kind(),
                    error = %err,
                    "Delivery failed, will retry"
                );
                self.outbox.mark_error(&item.id, &err.to_string()).await?;
                summary.failed += 1;
            }
            Err(err) => {
                warn!(
                    id = %item.id,
                    entity_type = %item.entity_type,
                    entity_id = %item.entity_id,
                    retry_count = item.retry_count,
                    error = %err,
                    "Delivery failed with no retries left"
                );
                self.outbox.mark_fatal(&item.id, &err.to_string()).await?;
                summary.fatal += 1;
            }
        }

        Ok(ControlFlow::Continue(()))
    }
}
