use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use stockgate_core::{DomainError, OrderId, ProductId};
use stockgate_products::Product;
use stockgate_sales::{NewOrder, Order, StockDelta};

/// Authoritative store operation error.
///
/// These are **infrastructure errors** as opposed to domain errors; the
/// admission boundary maps them into [`DomainError`] so callers always get a
/// specific rejection reason.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The row does not exist.
    #[error("product {0} not found")]
    NotFound(ProductId),

    /// The conditional stock check failed at commit time.
    #[error("stock conflict on product {0}")]
    Conflict(ProductId),

    /// The operation exceeded its time budget and was abandoned (rolled back).
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O, pool or driver failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The input cannot be stored as given; retrying will not help.
    #[error("invalid input: {0}")]
    Invalid(String),
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(product_id) => DomainError::ProductNotFound { product_id },
            StoreError::Conflict(product_id) => DomainError::InsufficientStock { product_id },
            StoreError::Timeout(after) => {
                DomainError::store_unavailable(format!("timed out after {after:?}"))
            }
            StoreError::Unavailable(msg) => DomainError::StoreUnavailable(msg),
            StoreError::Invalid(msg) => DomainError::Validation(msg),
        }
    }
}

/// Outcome of a committed admission: the order row and the product rows as
/// they stand right after the decrement (the values the cache write-back pushes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedOrder {
    pub order: Order,
    pub products: Vec<Product>,
}

/// The authoritative product/order store.
///
/// `commit_order` is the correctness boundary of admission: it inserts the
/// order and its items and applies every stock delta with a per-row
/// `stock + delta >= 0` re-check, all inside one transaction. Either the
/// order row exists and every delta is applied, or nothing changed.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn get_product(&self, id: ProductId) -> Result<Product, StoreError>;

    /// Read all referenced rows in a single consistent query.
    ///
    /// Missing ids are simply absent from the returned map.
    async fn get_products_bulk(
        &self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, StoreError>;

    /// Every product row, ordered by id.
    async fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Insert the order + items and apply `deltas` atomically.
    ///
    /// Fails with [`StoreError::Conflict`] naming the first row (in `deltas`
    /// order) whose stock would go negative, or [`StoreError::NotFound`] if a
    /// row vanished. Both roll the whole transaction back.
    async fn commit_order(
        &self,
        order: &NewOrder,
        deltas: &[StockDelta],
    ) -> Result<CommittedOrder, StoreError>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Insert or replace a product row, returning it as stored.
    async fn upsert_product(&self, product: &Product) -> Result<Product, StoreError>;

    /// Delete a product row. Deleting an absent row is `NotFound`.
    async fn delete_product(&self, id: ProductId) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> ProductStore for Arc<S>
where
    S: ProductStore + ?Sized,
{
    async fn get_product(&self, id: ProductId) -> Result<Product, StoreError> {
        (**self).get_product(id).await
    }

    async fn get_products_bulk(
        &self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, StoreError> {
        (**self).get_products_bulk(ids).await
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        (**self).list_products().await
    }

    async fn commit_order(
        &self,
        order: &NewOrder,
        deltas: &[StockDelta],
    ) -> Result<CommittedOrder, StoreError> {
        (**self).commit_order(order, deltas).await
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).get_order(id).await
    }

    async fn upsert_product(&self, product: &Product) -> Result<Product, StoreError> {
        (**self).upsert_product(product).await
    }

    async fn delete_product(&self, id: ProductId) -> Result<(), StoreError> {
        (**self).delete_product(id).await
    }
}

/// Run a store future under a time budget.
///
/// Dropping a pending sqlx transaction rolls it back, so a timed-out call
/// never leaves a half-applied commit behind.
pub async fn with_timeout<T, F>(budget: Duration, fut: F) -> Result<T, StoreError>
where
    F: core::future::Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(res) => res,
        Err(_) => Err(StoreError::Timeout(budget)),
    }
}
