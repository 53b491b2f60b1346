//! # bridge-sync: Outbox Delivery Engine for Channel Bridge
//!
//! Drains the outbox queue into the remote commerce API: authenticates with
//! OAuth2 client credentials, throttles and retries HTTP calls, dispatches
//! each queued item to the handler for its entity type, and records the
//! outcome back on the item.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Delivery Engine                                  │
//! │                                                                         │
//! │  ┌──────────────────┐  tick / trigger  ┌──────────────────────────┐    │
//! │  │    Scheduler     │ ───────────────► │     OutboxProcessor      │    │
//! │  └──────────────────┘                  │ reactivate, claim, mark  │    │
//! │  ┌──────────────────┐   process_now    └────────────┬─────────────┘    │
//! │  │    Operator      │ ─────────────────────────────►│                  │
//! │  └──────────────────┘                               ▼                  │
//! │                                        ┌──────────────────────────┐    │
//! │                                        │     HandlerRegistry      │    │
//! │                                        │ stock price product order│    │
//! │                                        └──┬──────────────┬────────┘    │
//! │                                           │              │             │
//! │                         ┌─────────────────▼──┐   ┌───────▼──────────┐  │
//! │                         │  EntityResolver    │   │    ApiClient     │  │
//! │                         │  SourceOfTruth     │   │ RateLimiter      │  │
//! │                         └────────────────────┘   │ backoff retries  │  │
//! │                                                  └───────┬──────────┘  │
//! │                                                  ┌───────▼──────────┐  │
//! │                                                  │CredentialManager │  │
//! │                                                  └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`auth`] - OAuth2 token cache with single-flight renewal
//! - [`clock`] - Injectable monotonic clock
//! - [`config`] - `bridge.toml` configuration and config sources
//! - [`engine`] - Wiring of every component over one database
//! - [`error`] - Sync error types and failure classification
//! - [`handlers`] - Per-entity delivery handlers
//! - [`operator`] - Manual actions with per-item reports
//! - [`outbox`] - The processor run
//! - [`rate_limit`] - Rolling-window request limiter
//! - [`resolver`] - Local id / remote key mapping with a TTL cache
//! - [`scheduler`] - Background interval loop
//! - [`transport`] - Rate-limited retrying HTTP client
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_db::{Database, DbConfig};
//! use bridge_sync::{BridgeEngine, StaticConfig, SystemClock};
//!
//! let db = Database::new(DbConfig::new("bridge.db")).await?;
//! let engine = BridgeEngine::new(&db, Arc::new(StaticConfig::new(config)), Arc::new(SystemClock))?;
//!
//! let (task, handle) = engine.spawn_scheduler();
//! // ...
//! handle.shutdown().await?;
//! task.await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod operator;
pub mod outbox;
pub mod rate_limit;
pub mod resolver;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::{CredentialManager, CredentialProvider, TokenInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BridgeConfig, ConfigSource, ReloadingConfig, StaticConfig};
pub use engine::BridgeEngine;
pub use error::{FailureKind, SyncError, SyncResult};
pub use handlers::{EntityHandler, HandlerOutcome, HandlerRegistry, SourceOfTruth};
pub use operator::{ConnectionReport, ItemTally, Operator, ProcessReport};
pub use outbox::{OutboxProcessor, RunSummary};
pub use rate_limit::RateLimiter;
pub use resolver::{CachedResolver, EntityResolver};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use transport::{ApiClient, ApiRequest, ApiResponse, ApiSurface};
