//! # Error Types
//!
//! Domain-specific error types for bridge-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  bridge-core errors (this file)                                        │
//! │  ├── CoreError        - Unknown stored values, wrapped validation      │
//! │  └── ValidationError  - Enqueue / handler input failures               │
//! │                                                                         │
//! │  bridge-db errors                                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  bridge-sync errors                                                    │
//! │  └── SyncError        - Auth, transport, handler, config failures      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → queue last_error      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Stored entity type matches no known kind.
    ///
    /// ## When This Occurs
    /// - A producer wrote a type this build doesn't know
    /// - Manual edits to the queue table
    ///
    /// The processor treats this as permanent: the item goes straight to
    /// `ERRO_FATAL`.
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Stored operation matches none of CREATE/UPDATE/DELETE.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Stored status matches none of the known spellings.
    #[error("Unknown queue status: {0}")]
    UnknownStatus(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g. payload is not JSON).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
