//! # Validation Module
//!
//! Rules applied before an item enters the queue and before a handler builds
//! a request body.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Enqueue (THIS MODULE)                                        │
//! │  ├── entity_id present, key and payload well-formed                    │
//! │  └── rejected before a row is written                                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Handler (THIS MODULE)                                        │
//! │  ├── SKU shape, non-negative quantity                                  │
//! │  └── failure is permanent → ERRO_FATAL                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                       │
//! │  └── NOT NULL / CHECK constraints                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::types::NewQueueItem;
use crate::MAX_ERROR_LENGTH;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest SKU the remote catalog accepts.
pub const MAX_SKU_LENGTH: usize = 60;

/// Longest local identifier.
pub const MAX_ENTITY_ID_LENGTH: usize = 64;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a SKU before it goes into a URL path.
///
/// ## Rules
/// - Must not be empty
/// - At most 60 characters
/// - Letters, digits, `-`, `_` and `.` only (no `/`, no whitespace)
///
/// ## Example
/// ```rust
/// use bridge_core::validation::validate_sku;
///
/// assert!(validate_sku("ABC123").is_ok());
/// assert!(validate_sku("").is_err());
/// assert!(validate_sku("a/b").is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    let sku = sku.trim();

    if sku.is_empty() {
        return Err(ValidationError::Required {
            field: "sku".to_string(),
        });
    }

    if sku.chars().count() > MAX_SKU_LENGTH {
        return Err(ValidationError::TooLong {
            field: "sku".to_string(),
            max: MAX_SKU_LENGTH,
        });
    }

    if !sku
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, '-', '_' and '.'".to_string(),
        });
    }

    Ok(())
}

/// Validates a local entity identifier.
pub fn validate_entity_id(id: &str) -> ValidationResult<()> {
    let id = id.trim();

    if id.is_empty() {
        return Err(ValidationError::Required {
            field: "entity_id".to_string(),
        });
    }

    if id.len() > MAX_ENTITY_ID_LENGTH {
        return Err(ValidationError::TooLong {
            field: "entity_id".to_string(),
            max: MAX_ENTITY_ID_LENGTH,
        });
    }

    Ok(())
}

/// Validates an optional payload: when present it must be JSON.
pub fn validate_payload(payload: Option<&str>) -> ValidationResult<()> {
    match payload {
        None => Ok(()),
        Some(raw) => serde_json::from_str::<serde_json::Value>(raw)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidFormat {
                field: "payload".to_string(),
                reason: e.to_string(),
            }),
    }
}

/// Validates a full enqueue request.
pub fn validate_new_item(item: &NewQueueItem) -> ValidationResult<()> {
    validate_entity_id(&item.entity_id)?;
    if let Some(key) = item.entity_key.as_deref().filter(|k| !k.trim().is_empty()) {
        if key.len() > MAX_SKU_LENGTH * 2 {
            return Err(ValidationError::TooLong {
                field: "entity_key".to_string(),
                max: MAX_SKU_LENGTH * 2,
            });
        }
    }
    validate_payload(item.payload.as_deref())
}

// =============================================================================
// Helpers
// =============================================================================

/// Truncates an error message to what the queue table stores.
///
/// Cuts on a character boundary, never inside a multi-byte sequence.
pub fn truncate_error(message: &str) -> String {
    truncate_chars(message, MAX_ERROR_LENGTH)
}

/// Returns at most `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
