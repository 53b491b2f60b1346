//! # bridge-core: Pure Domain Types for Channel Bridge
//!
//! Everything the outbox engine agrees on before any I/O happens: what a
//! queue item looks like, which entity kinds exist, how statuses are spelled
//! in the database, how producers prioritise work, and how money travels.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Channel Bridge Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Producers (ERP field-change observers)                 │   │
//! │  │      stock moved ──► price changed ──► order invoiced           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ enqueue                                │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ bridge-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │ validation│  │   error   │  │   │
//! │  │   │ QueueItem │  │   Money   │  │  sku, id  │  │ CoreError │  │   │
//! │  │   │ Status    │  │ (cents)   │  │  payload  │  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          bridge-db (outbox table) / bridge-sync (engine)        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Queue item, entity type, operation, status, priorities
//! - [`money`] - Money type with integer arithmetic
//! - [`error`] - Domain error types
//! - [`validation`] - Enqueue-time validation rules
//!
//! ## Example Usage
//!
//! ```rust
//! use bridge_core::{EntityType, QueueStatus};
//!
//! assert_eq!(QueueStatus::Pending.as_str(), "PENDENTE");
//! assert_eq!("ESTOQUE".parse::<EntityType>().unwrap(), EntityType::Stock);
//! assert!(EntityType::OrderStatus.default_priority() > EntityType::Stock.default_priority());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Enqueue calls for the same entity within this window collapse into one item.
pub const DEBOUNCE_WINDOW_SECS: i64 = 5;

/// Maximum stored length of `last_error`, in characters.
pub const MAX_ERROR_LENGTH: usize = 4000;

/// Default number of failed deliveries before an item becomes fatal.
pub const DEFAULT_MAX_RETRIES: i64 = 3;
