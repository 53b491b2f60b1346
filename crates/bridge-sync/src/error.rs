//! # Sync Error Types
//!
//! Error types for outbox delivery.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │ Authentication  │  │      Transport          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  AuthFailed     │  │  Network                │ │
//! │  │  MissingCreds   │  │                 │  │  ServerError (5xx)      │ │
//! │  │  InvalidUrl     │  │                 │  │  RateLimited (429)      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Handler      │  │    Database     │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  MappingMissing │  │  Database       │  │  DeadlineExceeded       │ │
//! │  │  RemoteRejected │  │                 │  │  ShuttingDown           │ │
//! │  │  PayloadInvalid │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## What Happens to a Queue Item
//! ```text
//! FailureKind::Transport  ──► ERRO, retried while retry_count < max
//! FailureKind::Data       ──► ERRO, retried while retry_count < max
//! FailureKind::Permanent  ──► ERRO_FATAL immediately
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// How a handler failure is routed by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// HTTP plumbing: network, 429, 5xx, authentication.
    Transport,
    /// Business data not ready yet (missing mapping, missing price).
    Data,
    /// Will never succeed as queued.
    Permanent,
}

/// Sync error type covering all delivery failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Client id, secret or scope not configured.
    #[error("Missing credentials: {0} not configured")]
    MissingCredentials(&'static str),

    /// Malformed endpoint URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Authentication Errors
    // =========================================================================
    /// Token exchange failed, or the API still answered 401 after a renewal.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Connection, DNS, TLS or timeout failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The API answered 5xx after all retries.
    #[error("Server error (HTTP {status}): {body}")]
    ServerError { status: u16, body: String },

    /// The API answered 429 after all retries.
    #[error("Rate limited by remote API: {body}")]
    RateLimited { body: String },

    /// The retry loop could not finish before its deadline.
    #[error("Deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32 },

    // =========================================================================
    // Handler Errors
    // =========================================================================
    /// No remote key for a local entity.
    #[error("No mapping for {entity_type} {entity_id}")]
    MappingMissing {
        entity_type: String,
        entity_id: String,
    },

    /// The source-of-truth store has nothing to send.
    #[error("Source data missing: {0}")]
    SourceDataMissing(String),

    /// The API answered a terminal 4xx.
    #[error("Remote rejected request (HTTP {status}): {body}")]
    RemoteRejected { status: u16, body: String },

    /// Queue payload or handler input can't be used.
    #[error("Invalid payload: {0}")]
    PayloadInvalid(String),

    /// No handler registered for the stored entity type.
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Outbox, mapping or catalog access failed.
    #[error("Database error: {0}")]
    Database(#[from] bridge_db::DbError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Failed to serialize a request body.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Scheduler is shutting down.
    #[error("Bridge is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            SyncError::InvalidConfig(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<bridge_core::ValidationError> for SyncError {
    fn from(err: bridge_core::ValidationError) -> Self {
        SyncError::PayloadInvalid(err.to_string())
    }
}

impl From<bridge_core::CoreError> for SyncError {
    fn from(err: bridge_core::CoreError) -> Self {
        match err {
            bridge_core::CoreError::UnknownEntityType(kind) => SyncError::UnknownEntityType(kind),
            other => SyncError::PayloadInvalid(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the transport should try the same request again.
    ///
    /// ## Retryable Errors
    /// - Network failures
    /// - 5xx and 429 answers
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::ServerError { .. } | SyncError::RateLimited { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingCredentials(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Classifies a handler failure for the processor.
    ///
    /// Configuration and database errors are `Transport`: they are about the
    /// bridge, not the item. The processor checks
    /// [`is_config_error`](Self::is_config_error) first and releases the item
    /// without spending a retry.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SyncError::MappingMissing { .. } | SyncError::SourceDataMissing(_) => FailureKind::Data,

            SyncError::PayloadInvalid(_)
            | SyncError::UnknownEntityType(_)
            | SyncError::SerializationFailed(_) => FailureKind::Permanent,

            _ => FailureKind::Transport,
        }
    }

    /// Returns true if the processor must not retry the item.
    pub fn is_permanent(&self) -> bool {
        self.failure_kind() == FailureKind::Permanent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Network("reset".into()).is_retryable());
        assert!(SyncError::ServerError {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(SyncError::RateLimited { body: String::new() }.is_retryable());

        assert!(!SyncError::AuthFailed("401".into()).is_retryable());
        assert!(!SyncError::RemoteRejected {
            status: 400,
            body: String::new()
        }
        .is_retryable());
    }

    #[test]
    fn test_failure_kinds() {
        let missing = SyncError::MappingMissing {
            entity_type: "ESTOQUE".into(),
            entity_id: "42".into(),
        };
        assert_eq!(missing.failure_kind(), FailureKind::Data);
        assert_eq!(
            SyncError::PayloadInvalid("x".into()).failure_kind(),
            FailureKind::Permanent
        );
        assert!(SyncError::UnknownEntityType("PARCEIRO".into()).is_permanent());
        assert_eq!(
            SyncError::Network("x".into()).failure_kind(),
            FailureKind::Transport
        );
    }

    #[test]
    fn test_core_error_conversion() {
        let unknown: SyncError = bridge_core::CoreError::UnknownEntityType("XYZ".into()).into();
        assert!(matches!(unknown, SyncError::UnknownEntityType(ref t) if t == "XYZ"));

        let op: SyncError = bridge_core::CoreError::UnknownOperation("MERGE".into()).into();
        assert!(op.is_permanent());
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::MissingCredentials("client_id").is_config_error());
        assert!(!SyncError::Network("x".into()).is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::MappingMissing {
            entity_type: "ESTOQUE".into(),
            entity_id: "42".into(),
        };
        assert_eq!(err.to_string(), "No mapping for ESTOQUE 42");
    }
}
