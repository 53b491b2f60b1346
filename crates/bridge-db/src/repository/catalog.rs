//! # Catalog Repository
//!
//! Read side of the ERP's current stock and price values.
//!
//! Handlers never trust the queue item for quantities or prices: by the
//! time an item is processed the value may have changed again, so they read
//! the current snapshot here right before calling the remote API.

use bridge_core::Money;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::DbResult;

/// One row of `catalog_prices`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PriceRow {
    pub product_id: String,
    pub price_cents: i64,
    pub list_price_cents: Option<i64>,
    pub active: bool,
}

impl PriceRow {
    /// Sale price.
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// List price, falling back to the sale price.
    pub fn list_price(&self) -> Money {
        Money::from_cents(self.list_price_cents.unwrap_or(self.price_cents))
    }
}

/// Repository for the catalog snapshot.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// Current quantity of a product in one storage location.
    pub async fn stock_quantity(&self, product_id: &str, storage_id: &str) -> DbResult<Option<i64>> {
        let qty: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM catalog_stock WHERE product_id = ?1 AND storage_id = ?2",
        )
        .bind(product_id)
        .bind(storage_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(qty)
    }

    /// Current active price of a product.
    pub async fn active_price(&self, product_id: &str) -> DbResult<Option<PriceRow>> {
        let row = sqlx::query_as::<_, PriceRow>(
            r#"
            SELECT product_id, price_cents, list_price_cents, active
            FROM catalog_prices
            WHERE product_id = ?1 AND active = 1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Writes a stock level (used by the ERP feed and by tests).
    pub async fn upsert_stock(&self, product_id: &str, storage_id: &str, quantity: i64) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO catalog_stock (product_id, storage_id, quantity, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (product_id, storage_id) DO UPDATE SET
                quantity = excluded.quantity,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(product_id)
        .bind(storage_id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Writes a price (used by the ERP feed and by tests).
    pub async fn upsert_price(
        &self,
        product_id: &str,
        price: Money,
        list_price: Option<Money>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO catalog_prices (product_id, price_cents, list_price_cents, active, updated_at)
            VALUES (?1, ?2, ?3, 1, ?4)
            ON CONFLICT (product_id) DO UPDATE SET
                price_cents = excluded.price_cents,
                list_price_cents = excluded.list_price_cents,
                active = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(product_id)
        .bind(price.cents())
        .bind(list_price.map(|m| m.cents()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Marks a price inactive so handlers stop reading it.
    pub async fn deactivate_price(&self, product_id: &str) -> DbResult<bool> {
        let result = sqlx::query("UPDATE catalog_prices SET active = 0 WHERE product_id = ?1")
            .bind(product_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
