//! # Domain Types
//!
//! Core types shared by the outbox store and the sync engine.
//!
//! ## Queue Item Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Queue Item Lifecycle                             │
//! │                                                                         │
//! │   enqueue                                                               │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  ┌──────────┐  mark_processing  ┌─────────────┐  mark_sent ┌─────────┐ │
//! │  │ PENDENTE │──────────────────►│ PROCESSANDO │───────────►│ ENVIADO │ │
//! │  └──────────┘                   └──────┬──────┘            └─────────┘ │
//! │      ▲                                 │                                │
//! │      │ reactivate                      │ mark_error / mark_fatal        │
//! │      │ (retry_count < max)             ▼                                │
//! │  ┌──────────┐                   ┌─────────────┐                         │
//! │  │   ERRO   │◄──────────────────│  (failure)  │──────►┌────────────┐   │
//! │  └──────────┘                   └─────────────┘       │ ERRO_FATAL │   │
//! │                                                       └────────────┘   │
//! │                                                                         │
//! │  CANCELADO: operator-only terminal state                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Spelling
//! Statuses, entity types and operations are stored as the uppercase strings
//! the host ERP already uses (`PENDENTE`, `ESTOQUE`, `UPDATE`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

// =============================================================================
// Priority Bands
// =============================================================================

/// Order status updates: customers are waiting on these.
pub const PRIORITY_ORDER_STATUS: i64 = 100;

/// Stock updates: overselling is the costliest failure.
pub const PRIORITY_STOCK: i64 = 10;

/// Price updates.
pub const PRIORITY_PRICE: i64 = 5;

/// Product catalog and everything else.
pub const PRIORITY_DEFAULT: i64 = 0;

// =============================================================================
// Entity Type
// =============================================================================

/// Kind of entity a queue item refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "PRODUTO")]
    Product,
    #[serde(rename = "ESTOQUE")]
    Stock,
    #[serde(rename = "PRECO")]
    Price,
    #[serde(rename = "PEDIDO_STATUS")]
    OrderStatus,
    #[serde(rename = "PARCEIRO")]
    Partner,
}

impl EntityType {
    /// All known entity types.
    pub const ALL: [EntityType; 5] = [
        EntityType::Product,
        EntityType::Stock,
        EntityType::Price,
        EntityType::OrderStatus,
        EntityType::Partner,
    ];

    /// Returns the stored spelling.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityType::Product => "PRODUTO",
            EntityType::Stock => "ESTOQUE",
            EntityType::Price => "PRECO",
            EntityType::OrderStatus => "PEDIDO_STATUS",
            EntityType::Partner => "PARCEIRO",
        }
    }

    /// Priority band producers use for this kind.
    pub const fn default_priority(&self) -> i64 {
        match self {
            EntityType::OrderStatus => PRIORITY_ORDER_STATUS,
            EntityType::Stock => PRIORITY_STOCK,
            EntityType::Price => PRIORITY_PRICE,
            EntityType::Product | EntityType::Partner => PRIORITY_DEFAULT,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::UnknownEntityType(s.to_string()))
    }
}

// =============================================================================
// Operation
// =============================================================================

/// What happened to the source record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    #[default]
    Update,
    Delete,
}

impl Operation {
    /// Returns the stored spelling.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Operation::Create),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(CoreError::UnknownOperation(other.to_string())),
        }
    }
}

// =============================================================================
// Queue Status
// =============================================================================

/// Delivery state of a queue item.
///
/// Only `Pending` items are claimable. Only `Error` items below the retry
/// budget are reactivated. `Sent`, `FatalError` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
pub enum QueueStatus {
    #[serde(rename = "PENDENTE")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "PENDENTE"))]
    Pending,
    #[serde(rename = "PROCESSANDO")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "PROCESSANDO"))]
    Processing,
    #[serde(rename = "ENVIADO")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "ENVIADO"))]
    Sent,
    #[serde(rename = "ERRO")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "ERRO"))]
    Error,
    #[serde(rename = "ERRO_FATAL")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "ERRO_FATAL"))]
    FatalError,
    #[serde(rename = "CANCELADO")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "CANCELADO"))]
    Cancelled,
}

impl QueueStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [QueueStatus; 6] = [
        QueueStatus::Pending,
        QueueStatus::Processing,
        QueueStatus::Sent,
        QueueStatus::Error,
        QueueStatus::FatalError,
        QueueStatus::Cancelled,
    ];

    /// Returns the stored spelling.
    pub const fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDENTE",
            QueueStatus::Processing => "PROCESSANDO",
            QueueStatus::Sent => "ENVIADO",
            QueueStatus::Error => "ERRO",
            QueueStatus::FatalError => "ERRO_FATAL",
            QueueStatus::Cancelled => "CANCELADO",
        }
    }

    /// Returns true for states the processor never touches again.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Sent | QueueStatus::FatalError | QueueStatus::Cancelled
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s.trim())
            .ok_or_else(|| CoreError::UnknownStatus(s.to_string()))
    }
}

// =============================================================================
// Queue Item
// =============================================================================

/// A unit of pending synchronization work.
///
/// `entity_type` and `operation` keep the raw stored text: a row written by a
/// newer or buggy producer must still load so the processor can mark it fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct QueueItem {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stored entity type, e.g. `ESTOQUE`.
    pub entity_type: String,

    /// Stored operation, e.g. `UPDATE`.
    pub operation: String,

    /// Local identifier of the source record.
    pub entity_id: String,

    /// Alternate key (usually the SKU), may be absent at enqueue time.
    pub entity_key: Option<String>,

    /// Handler-defined auxiliary JSON.
    pub payload: Option<String>,

    pub status: QueueStatus,

    /// Incremented exactly once per failed delivery.
    pub retry_count: i64,

    /// Last failure; cleared on success or reactivation.
    pub last_error: Option<String>,

    /// Higher claims first.
    pub priority: i64,

    pub created_at: DateTime<Utc>,

    pub processed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Parses the stored entity type.
    pub fn kind(&self) -> Result<EntityType, CoreError> {
        self.entity_type.parse()
    }

    /// Parses the stored operation.
    pub fn op(&self) -> Result<Operation, CoreError> {
        self.operation.parse()
    }

    /// Returns the non-blank entity key, if any.
    pub fn key(&self) -> Option<&str> {
        self.entity_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Returns true while another failure would still be retried.
    pub fn can_retry(&self, max_retries: i64) -> bool {
        self.retry_count < max_retries
    }
}

// =============================================================================
// Enqueue Request
// =============================================================================

/// Arguments for `Enqueue`, validated before they reach the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQueueItem {
    pub entity_type: EntityType,
    pub operation: Operation,
    pub entity_id: String,
    pub entity_key: Option<String>,
    pub payload: Option<String>,
    pub priority: i64,
}

impl NewQueueItem {
    /// Creates a request using the entity type's priority band.
    pub fn new(entity_type: EntityType, operation: Operation, entity_id: impl Into<String>) -> Self {
        NewQueueItem {
            entity_type,
            operation,
            entity_id: entity_id.into(),
            entity_key: None,
            payload: None,
            priority: entity_type.default_priority(),
        }
    }

    /// Sets the alternate key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.entity_key = Some(key.into());
        self
    }

    /// Sets the auxiliary payload.
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Overrides the priority band.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

// =============================================================================
// Status Summary
// =============================================================================

/// Item counts per status, for operators and health checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub pending: i64,
    pub processing: i64,
    pub sent: i64,
    pub error: i64,
    pub fatal: i64,
    pub cancelled: i64,
}

impl StatusSummary {
    /// Records a count for one status.
    pub fn set(&mut self, status: QueueStatus, count: i64) {
        match status {
            QueueStatus::Pending => self.pending = count,
            QueueStatus::Processing => self.processing = count,
            QueueStatus::Sent => self.sent = count,
            QueueStatus::Error => self.error = count,
            QueueStatus::FatalError => self.fatal = count,
            QueueStatus::Cancelled => self.cancelled = count,
        }
    }

    /// Items that still need delivery.
    pub fn outstanding(&self) -> i64 {
        self.pending + self.processing + self.error
    }
}
