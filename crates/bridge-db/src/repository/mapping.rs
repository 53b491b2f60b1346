//! # Entity Mapping Repository
//!
//! Local identifier ↔ remote key, per entity type.
//!
//! ```text
//! entity_mappings
//! ┌───────────────┬──────────┬──────────────┐
//! │ entity_type   │ local_id │ external_key │
//! ├───────────────┼──────────┼──────────────┤
//! │ PRODUTO       │ 42       │ ABC123       │   resolve(PRODUTO, "42")        → ABC123
//! │ PEDIDO_STATUS │ 9001     │ FC-7781      │   resolve_reverse(.., "FC-7781") → 9001
//! └───────────────┴──────────┴──────────────┘
//! ```
//!
//! Both directions are unique, so a remote key belongs to one local record.

use bridge_core::EntityType;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for entity mappings.
#[derive(Debug, Clone)]
pub struct MappingRepository {
    pool: SqlitePool,
}

impl MappingRepository {
    /// Creates a new MappingRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MappingRepository { pool }
    }

    /// Looks up the remote key for a local id.
    pub async fn get_external(
        &self,
        entity_type: EntityType,
        local_id: &str,
    ) -> DbResult<Option<String>> {
        let key: Option<String> = sqlx::query_scalar(
            "SELECT external_key FROM entity_mappings WHERE entity_type = ?1 AND local_id = ?2",
        )
        .bind(entity_type.as_str())
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    /// Looks up the local id for a remote key.
    pub async fn get_local(
        &self,
        entity_type: EntityType,
        external_key: &str,
    ) -> DbResult<Option<String>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT local_id FROM entity_mappings WHERE entity_type = ?1 AND external_key = ?2",
        )
        .bind(entity_type.as_str())
        .bind(external_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    /// Creates or replaces the mapping for a local id.
    ///
    /// ## Errors
    /// `DbError::UniqueViolation` when `external_key` is already mapped to a
    /// different local id of the same type.
    pub async fn upsert(
        &self,
        entity_type: EntityType,
        local_id: &str,
        external_key: &str,
    ) -> DbResult<()> {
        debug!(
            entity_type = %entity_type,
            local_id = %local_id,
            external_key = %external_key,
            "Saving mapping"
        );

        sqlx::query(
            r#"
            INSERT INTO entity_mappings (entity_type, local_id, external_key, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (entity_type, local_id) DO UPDATE SET
                external_key = excluded.external_key,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entity_type.as_str())
        .bind(local_id)
        .bind(external_key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, external_key),
            other => other,
        })?;

        Ok(())
    }

    /// Deletes the mapping for a local id.
    ///
    /// ## Returns
    /// `true` if a mapping existed.
    pub async fn remove(&self, entity_type: EntityType, local_id: &str) -> DbResult<bool> {
        let result =
            sqlx::query("DELETE FROM entity_mappings WHERE entity_type = ?1 AND local_id = ?2")
                .bind(entity_type.as_str())
                .bind(local_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
