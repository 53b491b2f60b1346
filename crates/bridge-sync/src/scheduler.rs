//! Background loop that runs the outbox processor.
//!
//! ```text
//! recover_stale()        PROCESSANDO left by a dead run ──► PENDENTE
//! interval.tick()        first tick is immediate
//! run_once
//! loop {
//!     select! {
//!         interval.tick()   ──► run_once
//!         trigger_rx.recv() ──► run_once (operator "process now")
//!         shutdown_rx.recv() ─► break
//!     }
//! }
//! ```
//!
//! Runs happen inside the loop body, so the scheduler never overlaps its
//! own runs. Ticks missed during a long run are delayed, not bunched.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::config::ConfigSource;
use crate::error::{SyncError, SyncResult};
use crate::outbox::{OutboxProcessor, RunSummary};

const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

type RunReply = oneshot::Sender<SyncResult<RunSummary>>;

/// Periodic driver for an [`OutboxProcessor`].
pub struct Scheduler {
    processor: OutboxProcessor,
    poll_interval: Duration,
    trigger_rx: mpsc::Receiver<Option<RunReply>>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling a running [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    trigger_tx: mpsc::Sender<Option<RunReply>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SchedulerHandle {
    /// Requests a run as soon as the current one (if any) finishes.
    ///
    /// Requests made while one is already waiting are merged into it.
    pub fn trigger(&self) -> SyncResult<()> {
        match self.trigger_tx.try_send(None) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SyncError::ShuttingDown),
        }
    }

    /// Requests a run and waits for its summary.
    pub async fn run_now(&self) -> SyncResult<RunSummary> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.trigger_tx
            .send(Some(reply_tx))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        reply_rx.await.map_err(|_| SyncError::ShuttingDown)?
    }

    /// Triggers graceful shutdown. The run in progress, if any, completes.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }
}

impl Scheduler {
    /// Creates a scheduler and returns its handle.
    pub fn new(processor: OutboxProcessor, config: Arc<dyn ConfigSource>) -> (Self, SchedulerHandle) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let scheduler = Scheduler {
            processor,
            poll_interval: config.current().poll_interval().max(MIN_POLL_INTERVAL),
            trigger_rx,
            shutdown_rx,
        };

        (scheduler, SchedulerHandle { trigger_tx, shutdown_tx })
    }

    /// Runs until shutdown. Spawn this as a background task.
    pub async fn run(mut self) {
        info!(interval_secs = self.poll_interval.as_secs(), "Outbox scheduler starting");

        if let Err(e) = self.processor.recover_stale().await {
            error!(error = %e, "Recovering abandoned items failed");
        }

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // The startup run, so a request sent meanwhile is never served ahead
        // of it.
        interval.tick().await;
        self.run_logged().await;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    info!("Outbox scheduler shutting down");
                    break;
                }

                _ = interval.tick() => {
                    self.run_logged().await;
                }

                Some(reply) = self.trigger_rx.recv() => {
                    debug!("Outbox run requested");
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(self.processor.run_once().await);
                        }
                        None => self.run_logged().await,
                    }
                }
            }
        }

        info!("Outbox scheduler stopped");
    }

    /// Scheduled runs only log.
    async fn run_logged(&self) {
        match self.processor.run_once().await {
            Ok(summary) if summary.claimed > 0 => {
                info!(
                    sent = summary.sent,
                    failed = summary.failed,
                    fatal = summary.fatal,
                    released = summary.released,
                    "Scheduled outbox run finished"
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Scheduled outbox run failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::testing::{test_config, Fixture, ScriptedExecutor};
    use bridge_core::{EntityType, NewQueueItem, Operation, QueueStatus};

    async fn setup(poll_secs: u64) -> (Fixture, Scheduler, SchedulerHandle) {
        let mut config = test_config();
        config.integration.poll_interval_secs = poll_secs;
        setup_with(config).await
    }

    async fn setup_with(config: BridgeConfig) -> (Fixture, Scheduler, SchedulerHandle) {
        let f = Fixture::new(config, ScriptedExecutor::statuses(&[])).await;
        let processor = OutboxProcessor::new(f.db.outbox(), f.registry(), f.config.clone());
        let (scheduler, handle) = Scheduler::new(processor, f.config.clone());
        (f, scheduler, handle)
    }

    async fn enqueue_stock(f: &Fixture, id: &str) {
        f.db.outbox()
            .enqueue(
                &NewQueueItem::new(EntityType::Stock, Operation::Delete, id)
                    .with_key(format!("S{}", id)),
            )
            .await
            .unwrap();
    }

    async fn wait_for_sent(f: &Fixture, expected: i64) {
        for _ in 0..100 {
            if f.db.outbox().count_by_status(QueueStatus::Sent).await.unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("expected {} sent items", expected);
    }

    #[tokio::test]
    async fn test_run_now_returns_summary() {
        let (f, scheduler, handle) = setup(3600).await;
        let task = tokio::spawn(scheduler.run());

        // Served after the startup run, on an empty queue.
        let idle = handle.run_now().await.unwrap();
        assert_eq!(idle.claimed, 0);

        enqueue_stock(&f, "1").await;
        let summary = handle.run_now().await.unwrap();

        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(f.db.outbox().count_by_status(QueueStatus::Pending).await.unwrap(), 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_run_precedes_queued_request() {
        let (f, scheduler, handle) = setup(3600).await;
        enqueue_stock(&f, "1").await;

        // Queued before the loop starts; the startup run takes the item.
        let request = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.run_now().await })
        };
        tokio::task::yield_now().await;
        let task = tokio::spawn(scheduler.run());

        let summary = request.await.unwrap().unwrap();
        assert_eq!(summary.claimed, 0);
        assert_eq!(f.db.outbox().count_by_status(QueueStatus::Sent).await.unwrap(), 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_recovers_abandoned_items() {
        let mut config = test_config();
        config.integration.poll_interval_secs = 3600;
        config.integration.stale_claim_secs = 0;
        let (f, scheduler, handle) = setup_with(config).await;
        enqueue_stock(&f, "1").await;
        let item = f.db.outbox().claim_batch(1).await.unwrap().remove(0);
        assert!(f.db.outbox().mark_processing(&item.id).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;

        let task = tokio::spawn(scheduler.run());
        wait_for_sent(&f, 1).await;

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let (_f, scheduler, handle) = setup(3600).await;
        let task = tokio::spawn(scheduler.run());

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(matches!(handle.trigger(), Err(SyncError::ShuttingDown)));
        assert!(matches!(handle.run_now().await, Err(SyncError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_interval_drives_runs() {
        let (f, scheduler, handle) = setup(1).await;

        enqueue_stock(&f, "1").await;
        let task = tokio::spawn(scheduler.run());
        wait_for_sent(&f, 1).await;

        enqueue_stock(&f, "2").await;
        wait_for_sent(&f, 2).await;

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_runs_without_waiting_for_tick() {
        let (f, scheduler, handle) = setup(3600).await;
        let task = tokio::spawn(scheduler.run());
        handle.run_now().await.unwrap();

        enqueue_stock(&f, "1").await;
        handle.trigger().unwrap();
        wait_for_sent(&f, 1).await;

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_is_merged_when_full() {
        let (_f, _scheduler, handle) = setup(3600).await;

        // Nothing is draining the channel yet.
        handle.trigger().unwrap();
        handle.trigger().unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let (_f, scheduler, _handle) = setup(0).await;
        assert_eq!(scheduler.poll_interval, MIN_POLL_INTERVAL);
    }
}
