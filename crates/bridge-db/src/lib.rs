//! # bridge-db: Database Layer for Channel Bridge
//!
//! SQLite storage for the outbox queue and its two lookup collaborators.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Channel Bridge Data Flow                           │
//! │                                                                         │
//! │  ERP observer ── enqueue ──┐            ┌── OutboxProcessor (sync)     │
//! │                            ▼            ▼                               │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     bridge-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐  ┌────────────────────┐  ┌──────────────┐  │   │
//! │  │   │   Database    │  │   Repositories     │  │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │  │                    │  │  (embedded)  │  │   │
//! │  │   │               │  │ OutboxRepository   │  │ 001_outbox   │  │   │
//! │  │   │ SqlitePool    │◄─│ MappingRepository  │  │ 002_mappings │  │   │
//! │  │   │ WAL, FKs      │  │ CatalogRepository  │  │ 003_catalog  │  │   │
//! │  │   └───────────────┘  └────────────────────┘  └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Outbox, mapping and catalog repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_core::{EntityType, NewQueueItem, Operation};
//! use bridge_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("bridge.db")).await?;
//!
//! let req = NewQueueItem::new(EntityType::Stock, Operation::Update, "42").with_key("ABC123");
//! db.outbox().enqueue(&req).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::catalog::{CatalogRepository, PriceRow};
pub use repository::mapping::MappingRepository;
pub use repository::outbox::{EnqueueOutcome, OutboxRepository};
