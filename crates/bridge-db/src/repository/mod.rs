//! # Repository Module
//!
//! Database repositories for the bridge.
//!
//! ## Who Uses What
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ERP observers ──► OutboxRepository::enqueue                           │
//! │                                                                         │
//! │  OutboxProcessor                                                       │
//! │  ├── OutboxRepository   reactivate, claim, mark_*                      │
//! │  ├── MappingRepository  (through CachedResolver) local id ↔ SKU        │
//! │  └── CatalogRepository  (through SourceOfTruth) stock and prices       │
//! │                                                                         │
//! │  Operator actions ──► OutboxRepository reset / purge / cleanup         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`OutboxRepository`] - Queue items and their status transitions
//! - [`MappingRepository`] - Local id ↔ external key mappings
//! - [`CatalogRepository`] - Current stock and price snapshot

pub mod catalog;
pub mod mapping;
pub mod outbox;

pub use catalog::{CatalogRepository, PriceRow};
pub use mapping::MappingRepository;
pub use outbox::{EnqueueOutcome, OutboxRepository};
