//! # Outbox Queue Repository
//!
//! Durable queue of pending synchronizations.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  ERP FIELD CHANGE (stock moved, price edited, order invoiced)          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  enqueue(ESTOQUE, UPDATE, "42", "ABC123")                              │
//! │       │                                                                 │
//! │       ├── same entity PENDENTE/PROCESSANDO in the last 5s? ──► no-op  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT ... status = 'PENDENTE'                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            OUTBOX PROCESSOR (every 1-2 minutes)                 │   │
//! │  │                                                                 │   │
//! │  │  1. reactivate_errors(max)   ERRO → PENDENTE                   │   │
//! │  │  2. claim_batch(n)           priority DESC, created_at ASC     │   │
//! │  │  3. mark_processing(id)      PENDENTE → PROCESSANDO (atomic)   │   │
//! │  │  4. mark_sent / mark_error / mark_fatal                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • Rapid repeated changes collapse into one item                       │
//! │  • Only PENDENTE items are ever claimed                                │
//! │  • Two processors never both win the same item                         │
//! │  • Re-applying a transition never corrupts the row                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use bridge_core::validation::{truncate_error, validate_new_item};
use bridge_core::{
    EntityType, NewQueueItem, QueueItem, QueueStatus, StatusSummary, DEBOUNCE_WINDOW_SECS,
};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};

/// Columns selected into [`QueueItem`].
const ITEM_COLUMNS: &str = "id, entity_type, operation, entity_id, entity_key, payload, \
     status, retry_count, last_error, priority, created_at, processed_at";

/// Result of an enqueue call.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// A new PENDENTE item was written.
    Queued(QueueItem),
    /// An equivalent item is already waiting; nothing was written.
    Debounced,
}

impl EnqueueOutcome {
    /// Returns true when a row was inserted.
    pub fn is_queued(&self) -> bool {
        matches!(self, EnqueueOutcome::Queued(_))
    }
}

/// Repository for outbox queue operations.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Queues an entity for synchronization.
    ///
    /// The debounce check and the insert are one statement
    /// (`INSERT ... SELECT ... WHERE NOT EXISTS`), so two producers racing on
    /// the same entity still leave a single item.
    ///
    /// ## Debounce Rule
    /// Skipped when an item with the same `entity_type` and the same
    /// `entity_id` *or* the same `entity_key` is PENDENTE or PROCESSANDO and
    /// was created within the last 5 seconds.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let req = NewQueueItem::new(EntityType::Stock, Operation::Update, "42").with_key("ABC123");
    /// match repo.enqueue(&req).await? {
    ///     EnqueueOutcome::Queued(item) => println!("queued {}", item.id),
    ///     EnqueueOutcome::Debounced => {}
    /// }
    /// ```
    pub async fn enqueue(&self, req: &NewQueueItem) -> DbResult<EnqueueOutcome> {
        validate_new_item(req)?;

        let now = Utc::now();
        let cutoff = now - Duration::seconds(DEBOUNCE_WINDOW_SECS);
        let key = req
            .entity_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string);

        let item = QueueItem {
            id: Uuid::new_v4().to_string(),
            entity_type: req.entity_type.as_str().to_string(),
            operation: req.operation.as_str().to_string(),
            entity_id: req.entity_id.trim().to_string(),
            entity_key: key,
            payload: req.payload.clone(),
            status: QueueStatus::Pending,
            retry_count: 0,
            last_error: None,
            priority: req.priority,
            created_at: now,
            processed_at: None,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO outbox_queue (
                id, entity_type, operation, entity_id, entity_key, payload,
                status, retry_count, priority, created_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, 'PENDENTE', 0, ?7, ?8
            WHERE NOT EXISTS (
                SELECT 1 FROM outbox_queue
                WHERE entity_type = ?2
                  AND status IN ('PENDENTE', 'PROCESSANDO')
                  AND created_at >= ?9
                  AND (entity_id = ?4 OR (?5 IS NOT NULL AND entity_key = ?5))
            )
            "#,
        )
        .bind(&item.id)
        .bind(&item.entity_type)
        .bind(&item.operation)
        .bind(&item.entity_id)
        .bind(&item.entity_key)
        .bind(&item.payload)
        .bind(item.priority)
        .bind(item.created_at)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(
                entity_type = %item.entity_type,
                entity_id = %item.entity_id,
                "Debounced enqueue"
            );
            return Ok(EnqueueOutcome::Debounced);
        }

        debug!(
            id = %item.id,
            entity_type = %item.entity_type,
            entity_id = %item.entity_id,
            priority = item.priority,
            "Queued for sync"
        );

        Ok(EnqueueOutcome::Queued(item))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets up to `limit` PENDENTE items in claim order.
    ///
    /// Ordered by `priority` descending, then `created_at` ascending (FIFO
    /// within a band). Does not change any status; callers follow with
    /// [`mark_processing`](Self::mark_processing).
    pub async fn claim_batch(&self, limit: u32) -> DbResult<Vec<QueueItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM outbox_queue \
             WHERE status = 'PENDENTE' \
             ORDER BY priority DESC, created_at ASC, seq ASC \
             LIMIT ?1"
        );

        let items = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    /// Gets a single item by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<QueueItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM outbox_queue WHERE id = ?1");

        let item = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    /// Counts items in one status.
    pub async fn count_by_status(&self, status: QueueStatus) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_queue WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Counts items in one status for one entity type.
    pub async fn count_by_status_and_type(
        &self,
        status: QueueStatus,
        entity_type: EntityType,
    ) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox_queue WHERE status = ?1 AND entity_type = ?2",
        )
        .bind(status.as_str())
        .bind(entity_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Counts items for every status in one query.
    pub async fn status_summary(&self) -> DbResult<StatusSummary> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM outbox_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut summary = StatusSummary::default();
        for (status, count) in rows {
            match status.parse::<QueueStatus>() {
                Ok(status) => summary.set(status, count),
                Err(_) => warn!(status = %status, "Unknown status in outbox_queue"),
            }
        }

        Ok(summary)
    }

    // =========================================================================
    // Status Transitions
    // =========================================================================

    /// Moves an item from PENDENTE to PROCESSANDO.
    ///
    /// ## Returns
    /// `true` if this call won the item, `false` if it was no longer
    /// PENDENTE (another processor claimed it, or an operator cancelled it).
    pub async fn mark_processing(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_queue SET
                status = 'PROCESSANDO',
                claimed_at = ?2
            WHERE id = ?1 AND status = 'PENDENTE'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Hands a PROCESSANDO item back to PENDENTE without touching its retry
    /// count or error. Used when the attempt never reached the remote side.
    pub async fn release(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_queue SET
                status = 'PENDENTE',
                claimed_at = NULL
            WHERE id = ?1 AND status = 'PROCESSANDO'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.ensure_applied(result.rows_affected(), id, "release")
            .await
    }

    /// Marks an item as delivered.
    pub async fn mark_sent(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_queue SET
                status = 'ENVIADO',
                last_error = NULL,
                processed_at = ?2
            WHERE id = ?1 AND status <> 'CANCELADO'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.ensure_applied(result.rows_affected(), id, "mark_sent")
            .await
    }

    /// Records a retryable failure.
    ///
    /// Increments `retry_count` once and stores the message (truncated to
    /// 4000 characters). An item already in ERRO is left untouched, so a
    /// repeated call does not count the same failure twice.
    pub async fn mark_error(&self, id: &str, message: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_queue SET
                status = 'ERRO',
                retry_count = retry_count + 1,
                last_error = ?2,
                processed_at = ?3
            WHERE id = ?1 AND status IN ('PENDENTE', 'PROCESSANDO')
            "#,
        )
        .bind(id)
        .bind(truncate_error(message))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.ensure_applied(result.rows_affected(), id, "mark_error")
            .await
    }

    /// Marks an item as permanently failed.
    pub async fn mark_fatal(&self, id: &str, message: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_queue SET
                status = 'ERRO_FATAL',
                last_error = ?2,
                processed_at = ?3
            WHERE id = ?1 AND status <> 'CANCELADO'
            "#,
        )
        .bind(id)
        .bind(truncate_error(message))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        warn!(id = %id, error = %message, "Item marked ERRO_FATAL");

        self.ensure_applied(result.rows_affected(), id, "mark_fatal")
            .await
    }

    /// Puts an item back to PENDENTE with a fresh retry budget.
    ///
    /// Operator-triggered; works from any status.
    pub async fn reset_for_retry(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_queue SET
                status = 'PENDENTE',
                retry_count = 0,
                last_error = NULL,
                processed_at = NULL
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("QueueItem", id));
        }

        info!(id = %id, "Item reset for reprocessing");
        Ok(())
    }

    /// Cancels an item that has not been delivered yet.
    ///
    /// ## Returns
    /// `true` if the item moved to CANCELADO, `false` if it was already
    /// terminal.
    pub async fn cancel(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_queue SET
                status = 'CANCELADO',
                processed_at = ?2
            WHERE id = ?1 AND status IN ('PENDENTE', 'PROCESSANDO', 'ERRO')
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        match self.get(id).await? {
            Some(_) => Ok(false),
            None => Err(DbError::not_found("QueueItem", id)),
        }
    }

    // =========================================================================
    // Bulk Operations
    // =========================================================================

    /// Returns ERRO items with `retry_count < max_retries` to PENDENTE.
    ///
    /// ## Returns
    /// Number of reactivated items.
    pub async fn reactivate_errors(&self, max_retries: i64) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_queue SET
                status = 'PENDENTE',
                last_error = NULL
            WHERE status = 'ERRO' AND retry_count < ?1
            "#,
        )
        .bind(max_retries)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            info!(count = count, "Reactivated items for retry");
        }
        Ok(count)
    }

    /// Moves ERRO items whose retry budget is spent to ERRO_FATAL.
    ///
    /// Without this, an item that failed its last allowed attempt would sit
    /// in ERRO forever: reactivation skips it and claiming only sees PENDENTE.
    /// The previous failure reason is kept after the prefix.
    pub async fn fail_exhausted(&self, max_retries: i64) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_queue SET
                status = 'ERRO_FATAL',
                last_error = substr('Exceeded max retries: ' || COALESCE(last_error, ''), 1, ?2),
                processed_at = ?3
            WHERE status = 'ERRO' AND retry_count >= ?1
            "#,
        )
        .bind(max_retries)
        .bind(bridge_core::MAX_ERROR_LENGTH as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            warn!(count = count, "Items exhausted their retries");
        }
        Ok(count)
    }

    /// Returns PROCESSANDO items claimed more than `older_than` ago to
    /// PENDENTE.
    ///
    /// A processor that dies between claiming and recording the outcome
    /// leaves its item in PROCESSANDO, where nothing claims it again. The
    /// retry count is unchanged: the interrupted attempt may or may not
    /// have reached the remote side, and every delivery is idempotent.
    pub async fn recover_stale(&self, older_than: Duration) -> DbResult<u64> {
        let cutoff = Utc::now() - older_than;

        let result = sqlx::query(
            r#"
            UPDATE outbox_queue SET
                status = 'PENDENTE',
                claimed_at = NULL
            WHERE status = 'PROCESSANDO'
              AND (claimed_at IS NULL OR claimed_at < ?1)
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            warn!(count = count, "Recovered items abandoned in PROCESSANDO");
        }
        Ok(count)
    }

    /// Deletes every ERRO_FATAL item.
    pub async fn purge_fatal(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM outbox_queue WHERE status = 'ERRO_FATAL'")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Deletes terminal items created more than `days` days ago.
    ///
    /// ## Returns
    /// Number of deleted items.
    pub async fn cleanup_old_items(&self, days: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));

        let result = sqlx::query(
            r#"
            DELETE FROM outbox_queue
            WHERE status IN ('ENVIADO', 'ERRO_FATAL', 'CANCELADO')
              AND created_at < ?1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            info!(count = count, days = days, "Removed old queue items");
        }
        Ok(count)
    }

    /// Turns "0 rows updated" into NotFound when the id does not exist.
    ///
    /// A row that exists but didn't match the guard already holds the target
    /// state (or was cancelled), which is fine.
    async fn ensure_applied(&self, rows: u64, id: &str, transition: &str) -> DbResult<()> {
        if rows > 0 {
            return Ok(());
        }

        match self.get(id).await? {
            Some(item) => {
                debug!(id = %id, status = %item.status, transition, "Transition not applied");
                Ok(())
            }
            None => Err(DbError::not_found("QueueItem", id)),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
