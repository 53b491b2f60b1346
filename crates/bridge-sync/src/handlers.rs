//! # Entity Handlers
//!
//! One handler per entity type. A handler turns a claimed queue item into
//! remote calls, always reading current values from the source of truth
//! rather than trusting whatever was true at enqueue time.
//!
//! ```text
//! QueueItem ──► HandlerRegistry::dispatch
//!                 │
//!                 ├── ESTOQUE        StockHandler        PUT  /stock/{sku}
//!                 ├── PRECO          PriceHandler        PUT  /prices/{sku}
//!                 ├── PRODUTO        ProductHandler      (mapping only)
//!                 ├── PEDIDO_STATUS  OrderStatusHandler  PUT  /orders/{id}/status
//!                 └── anything else  UnknownEntityType   (fatal)
//! ```

use async_trait::async_trait;
use bridge_core::money::serialize_decimal;
use bridge_core::validation::validate_sku;
use bridge_core::{EntityType, Money, Operation, QueueItem};
use bridge_db::CatalogRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ConfigSource;
use crate::error::{SyncError, SyncResult};
use crate::resolver::EntityResolver;
use crate::transport::{ApiClient, ApiRequest, ApiSurface};

// =============================================================================
// Source of Truth
// =============================================================================

/// Current sale and list price of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceQuote {
    pub price: Money,
    pub list_price: Money,
}

/// Authoritative local values the handlers push.
#[async_trait]
pub trait SourceOfTruth: Send + Sync + Debug {
    async fn current_stock(&self, entity_id: &str, storage_id: &str) -> SyncResult<Option<i64>>;

    async fn current_price(&self, entity_id: &str) -> SyncResult<Option<PriceQuote>>;
}

#[async_trait]
impl SourceOfTruth for CatalogRepository {
    async fn current_stock(&self, entity_id: &str, storage_id: &str) -> SyncResult<Option<i64>> {
        Ok(self.stock_quantity(entity_id, storage_id).await?)
    }

    async fn current_price(&self, entity_id: &str) -> SyncResult<Option<PriceQuote>> {
        Ok(self.active_price(entity_id).await?.map(|row| PriceQuote {
            price: row.price(),
            list_price: row.list_price(),
        }))
    }
}

// =============================================================================
// Wire Bodies
// =============================================================================

/// Body of `PUT /stock/{sku}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdate {
    pub sku: String,
    pub storage_id: String,
    pub quantity: i64,
}

/// Stock record as the API reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStock {
    pub sku: String,
    #[serde(default)]
    pub storage_id: Option<String>,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub reserved_quantity: Option<f64>,
    #[serde(default)]
    pub available_quantity: Option<f64>,
}

/// Body of `PUT /prices/{sku}` and one entry of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub sku: String,
    pub reseller_id: String,
    #[serde(serialize_with = "serialize_decimal")]
    pub price: Money,
    #[serde(serialize_with = "serialize_decimal")]
    pub list_price: Money,
    pub currency: String,
}

/// Body of `POST /prices/{resellerId}/batches`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBatch {
    pub reseller_id: String,
    pub prices: Vec<PriceUpdate>,
}

/// Price record as the API reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePrice {
    pub sku: String,
    #[serde(default)]
    pub reseller_id: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub list_price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Body of `PUT /orders/{id}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderStatusUpdate {
    pub status: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Queue payload of a `PEDIDO_STATUS` item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrderStatusPayload {
    pub status: i32,
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// Handler Trait and Registry
// =============================================================================

/// Result of a handler run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The remote side now reflects the item.
    Delivered,
    /// Nothing needed sending; the item is still finished.
    Skipped(String),
}

/// Delivers one kind of queue item.
#[async_trait]
pub trait EntityHandler: Send + Sync + Debug {
    fn entity_type(&self) -> EntityType;

    async fn handle(&self, item: &QueueItem) -> SyncResult<HandlerOutcome>;
}

/// Handlers by entity type.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EntityType, Arc<dyn EntityHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the stock, price, product and order-status handlers.
    pub fn standard(
        api: ApiClient,
        resolver: Arc<dyn EntityResolver>,
        source: Arc<dyn SourceOfTruth>,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StockHandler::new(
            api.clone(),
            resolver.clone(),
            source.clone(),
            config.clone(),
        )));
        registry.register(Arc::new(PriceHandler::new(
            api.clone(),
            resolver.clone(),
            source,
            config,
        )));
        registry.register(Arc::new(ProductHandler::new(resolver.clone())));
        registry.register(Arc::new(OrderStatusHandler::new(api, resolver)));
        registry
    }

    /// Adds or replaces the handler for its entity type.
    pub fn register(&mut self, handler: Arc<dyn EntityHandler>) {
        self.handlers.insert(handler.entity_type(), handler);
    }

    pub fn get(&self, entity_type: EntityType) -> Option<&Arc<dyn EntityHandler>> {
        self.handlers.get(&entity_type)
    }

    /// Routes an item to its handler.
    ///
    /// ## Errors
    /// `SyncError::UnknownEntityType` if the stored type doesn't parse or
    /// has no handler.
    pub async fn dispatch(&self, item: &QueueItem) -> SyncResult<HandlerOutcome> {
        let kind = item.kind()?;
        let handler = self
            .get(kind)
            .ok_or_else(|| SyncError::UnknownEntityType(item.entity_type.clone()))?;

        handler.handle(item).await
    }
}

/// SKU from the item key, else the product mapping.
async fn resolve_sku(resolver: &dyn EntityResolver, item: &QueueItem) -> SyncResult<String> {
    let sku = match item.key() {
        Some(key) => key.to_string(),
        None => resolver
            .resolve(EntityType::Product, &item.entity_id)
            .await?
            .ok_or_else(|| SyncError::MappingMissing {
                entity_type: item.entity_type.clone(),
                entity_id: item.entity_id.clone(),
            })?,
    };

    validate_sku(&sku)?;
    Ok(sku.trim().to_string())
}

fn required_setting(value: &Option<String>, name: &str) -> SyncResult<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SyncError::InvalidConfig(format!("{} is not configured", name)))
}

// =============================================================================
// Stock
// =============================================================================

/// Pushes the current stock level of a product.
#[derive(Debug, Clone)]
pub struct StockHandler {
    api: ApiClient,
    resolver: Arc<dyn EntityResolver>,
    source: Arc<dyn SourceOfTruth>,
    config: Arc<dyn ConfigSource>,
}

impl StockHandler {
    pub fn new(
        api: ApiClient,
        resolver: Arc<dyn EntityResolver>,
        source: Arc<dyn SourceOfTruth>,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            api,
            resolver,
            source,
            config,
        }
    }

    pub async fn push_stock(&self, update: &StockUpdate) -> SyncResult<()> {
        let request = ApiRequest::put(ApiSurface::Stock, format!("/stock/{}", update.sku), update)?;
        self.api.send(&request).await?.error_for_status()?;
        Ok(())
    }

    /// Stock as the API sees it; `None` when the SKU is unknown there.
    pub async fn remote_stock(&self, sku: &str) -> SyncResult<Option<RemoteStock>> {
        validate_sku(sku)?;
        let request = ApiRequest::get(ApiSurface::Stock, format!("/stock/{}", sku));
        let response = self.api.send(&request).await?;

        if response.is_not_found() {
            debug!(sku, "SKU not found on stock surface");
            return Ok(None);
        }

        Ok(Some(response.error_for_status()?.json()?))
    }
}

#[async_trait]
impl EntityHandler for StockHandler {
    fn entity_type(&self) -> EntityType {
        EntityType::Stock
    }

    async fn handle(&self, item: &QueueItem) -> SyncResult<HandlerOutcome> {
        let sku = resolve_sku(self.resolver.as_ref(), item).await?;
        let storage_id = required_setting(&self.config.current().host.storage_id, "host.storage_id")?;

        let quantity = match item.op()? {
            Operation::Delete => 0,
            _ => self
                .source
                .current_stock(&item.entity_id, &storage_id)
                .await?
                .unwrap_or(0),
        };

        let quantity = if quantity < 0 {
            warn!(sku = %sku, quantity, "Negative stock sent as zero");
            0
        } else {
            quantity
        };

        info!(sku = %sku, storage_id = %storage_id, quantity, "Updating stock");
        self.push_stock(&StockUpdate {
            sku,
            storage_id,
            quantity,
        })
        .await?;

        Ok(HandlerOutcome::Delivered)
    }
}

// =============================================================================
// Price
// =============================================================================

/// Pushes the current active price of a product.
#[derive(Debug, Clone)]
pub struct PriceHandler {
    api: ApiClient,
    resolver: Arc<dyn EntityResolver>,
    source: Arc<dyn SourceOfTruth>,
    config: Arc<dyn ConfigSource>,
}

impl PriceHandler {
    pub fn new(
        api: ApiClient,
        resolver: Arc<dyn EntityResolver>,
        source: Arc<dyn SourceOfTruth>,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            api,
            resolver,
            source,
            config,
        }
    }

    /// Builds the update for one product from the source of truth.
    ///
    /// ## Errors
    /// `SourceDataMissing` when there is no active price or it is zero.
    pub async fn price_update(&self, entity_id: &str, sku: String) -> SyncResult<PriceUpdate> {
        let config = self.config.current();
        let reseller_id = required_setting(&config.host.reseller_id, "host.reseller_id")?;

        let quote = self
            .source
            .current_price(entity_id)
            .await?
            .ok_or_else(|| SyncError::SourceDataMissing(format!("no active price for product {}", entity_id)))?;

        if !quote.price.is_positive() {
            return Err(SyncError::SourceDataMissing(format!(
                "price for product {} is {}",
                entity_id, quote.price
            )));
        }

        Ok(PriceUpdate {
            sku,
            reseller_id,
            price: quote.price,
            list_price: quote.list_price,
            currency: config.host.currency.clone(),
        })
    }

    pub async fn push_price(&self, update: &PriceUpdate) -> SyncResult<()> {
        let request = ApiRequest::put(ApiSurface::Price, format!("/prices/{}", update.sku), update)?;
        self.api.send(&request).await?.error_for_status()?;
        Ok(())
    }

    /// Sends many prices for one reseller in a single call.
    pub async fn push_batch(&self, batch: &PriceBatch) -> SyncResult<()> {
        if batch.prices.is_empty() {
            return Ok(());
        }

        let request = ApiRequest::post(
            ApiSurface::Price,
            format!("/prices/{}/batches", batch.reseller_id),
            batch,
        )?;
        info!(reseller_id = %batch.reseller_id, count = batch.prices.len(), "Sending price batch");
        self.api.send(&request).await?.error_for_status()?;
        Ok(())
    }

    /// Price as the API sees it; `None` when the SKU is unknown there.
    pub async fn remote_price(&self, sku: &str) -> SyncResult<Option<RemotePrice>> {
        validate_sku(sku)?;
        let request = ApiRequest::get(ApiSurface::Price, format!("/prices/{}", sku));
        let response = self.api.send(&request).await?;

        if response.is_not_found() {
            return Ok(None);
        }

        Ok(Some(response.error_for_status()?.json()?))
    }

    pub fn resolver(&self) -> &Arc<dyn EntityResolver> {
        &self.resolver
    }
}

#[async_trait]
impl EntityHandler for PriceHandler {
    fn entity_type(&self) -> EntityType {
        EntityType::Price
    }

    async fn handle(&self, item: &QueueItem) -> SyncResult<HandlerOutcome> {
        if item.op()? == Operation::Delete {
            return Ok(HandlerOutcome::Skipped(
                "price deletions are not sent".to_string(),
            ));
        }

        let sku = resolve_sku(self.resolver.as_ref(), item).await?;
        let update = self.price_update(&item.entity_id, sku).await?;

        info!(sku = %update.sku, price = %update.price, "Updating price");
        self.push_price(&update).await?;

        Ok(HandlerOutcome::Delivered)
    }
}

// =============================================================================
// Product
// =============================================================================

/// Records the product ↔ SKU mapping. No remote call.
#[derive(Debug, Clone)]
pub struct ProductHandler {
    resolver: Arc<dyn EntityResolver>,
}

impl ProductHandler {
    pub fn new(resolver: Arc<dyn EntityResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl EntityHandler for ProductHandler {
    fn entity_type(&self) -> EntityType {
        EntityType::Product
    }

    async fn handle(&self, item: &QueueItem) -> SyncResult<HandlerOutcome> {
        if item.op()? == Operation::Delete {
            let removed = self
                .resolver
                .remove_mapping(EntityType::Product, &item.entity_id)
                .await?;
            info!(entity_id = %item.entity_id, removed, "Product mapping removed");
            return Ok(HandlerOutcome::Delivered);
        }

        let sku = resolve_sku(self.resolver.as_ref(), item).await?;
        self.resolver
            .set_mapping(EntityType::Product, &item.entity_id, &sku)
            .await?;

        info!(entity_id = %item.entity_id, sku = %sku, "Product mapped");
        Ok(HandlerOutcome::Delivered)
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// Reports an order status change to the orders surface.
#[derive(Debug, Clone)]
pub struct OrderStatusHandler {
    api: ApiClient,
    resolver: Arc<dyn EntityResolver>,
}

impl OrderStatusHandler {
    pub fn new(api: ApiClient, resolver: Arc<dyn EntityResolver>) -> Self {
        Self { api, resolver }
    }

    pub async fn push_status(&self, order_id: &str, update: &OrderStatusUpdate) -> SyncResult<()> {
        let request = ApiRequest::put(
            ApiSurface::Orders,
            format!("/orders/{}/status", order_id),
            update,
        )?;
        self.api.send(&request).await?.error_for_status()?;
        Ok(())
    }

    async fn remote_order_id(&self, item: &QueueItem) -> SyncResult<String> {
        let order_id = match item.key() {
            Some(key) => key.to_string(),
            None => self
                .resolver
                .resolve(EntityType::OrderStatus, &item.entity_id)
                .await?
                .ok_or_else(|| SyncError::MappingMissing {
                    entity_type: item.entity_type.clone(),
                    entity_id: item.entity_id.clone(),
                })?,
        };

        if order_id.contains(|c| matches!(c, '/' | '?' | '#')) {
            return Err(SyncError::PayloadInvalid(format!(
                "order id {:?} is not a path segment",
                order_id
            )));
        }
        Ok(order_id)
    }
}

#[async_trait]
impl EntityHandler for OrderStatusHandler {
    fn entity_type(&self) -> EntityType {
        EntityType::OrderStatus
    }

    async fn handle(&self, item: &QueueItem) -> SyncResult<HandlerOutcome> {
        if item.op()? == Operation::Delete {
            return Ok(HandlerOutcome::Skipped(
                "order status deletions are not sent".to_string(),
            ));
        }

        let raw = item
            .payload
            .as_deref()
            .ok_or_else(|| SyncError::PayloadInvalid("order status payload is missing".to_string()))?;
        let payload: OrderStatusPayload = serde_json::from_str(raw)
            .map_err(|e| SyncError::PayloadInvalid(format!("order status payload: {}", e)))?;

        let order_id = self.remote_order_id(item).await?;

        info!(order_id = %order_id, status = payload.status, "Updating order status");
        self.push_status(
            &order_id,
            &OrderStatusUpdate {
                status: payload.status,
                message: payload.message,
                timestamp: Utc::now(),
            },
        )
        .await?;

        Ok(HandlerOutcome::Delivered)
    }
}
