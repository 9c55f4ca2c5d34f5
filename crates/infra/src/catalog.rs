use std::time::Duration;

use tracing::{debug, instrument, warn};

use stockgate_core::{DomainError, DomainResult, ProductId};
use stockgate_products::Product;

use crate::cache::StockCache;
use crate::store::{ProductStore, with_timeout};
use crate::workers::CacheJobQueue;

/// Cache-first product reads and cache-aware product writes.
#[derive(Debug, Clone)]
pub struct ProductCatalog<S, C> {
    store: S,
    cache: C,
    jobs: CacheJobQueue,
    store_timeout: Duration,
}

impl<S, C> ProductCatalog<S, C>
where
    S: ProductStore,
    C: StockCache,
{
    pub fn new(store: S, cache: C, jobs: CacheJobQueue, store_timeout: Duration) -> Self {
        Self {
            store,
            cache,
            jobs,
            store_timeout,
        }
    }

    /// Serve from cache when present; otherwise read the store and warm the cache.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn get_product(&self, id: ProductId) -> DomainResult<Product> {
        match self.cache.get(id).await {
            Ok(Some(product)) => return Ok(product),
            Ok(None) => debug!("cache miss"),
            Err(err) => warn!(error = %err, "cache read failed; reading store"),
        }

        let product = with_timeout(self.store_timeout, self.store.get_product(id))
            .await
            .map_err(DomainError::from)?;
        self.jobs.submit_write_back(vec![product.clone()]);
        Ok(product)
    }

    /// Insert or replace a product, then refresh its cache entry.
    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    pub async fn save_product(&self, product: Product) -> DomainResult<Product> {
        validate(&product)?;
        let stored = with_timeout(self.store_timeout, self.store.upsert_product(&product))
            .await
            .map_err(DomainError::from)?;
        self.jobs.submit_write_back(vec![stored.clone()]);
        Ok(stored)
    }

    /// Delete a product and its cache entry.
    ///
    /// A repair is always queued afterwards: it drops the entry if the
    /// removal failed or a write-back already in flight re-warmed it.
    #[instrument(skip(self), fields(product_id = %id), err)]
    pub async fn remove_product(&self, id: ProductId) -> DomainResult<()> {
        with_timeout(self.store_timeout, self.store.delete_product(id))
            .await
            .map_err(DomainError::from)?;

        if let Err(err) = self.cache.remove(id).await {
            warn!(error = %err, "cache removal failed");
        }
        self.jobs.submit_repair(vec![id]);
        Ok(())
    }
}

fn validate(product: &Product) -> DomainResult<()> {
    if product.name.trim().is_empty() {
        return Err(DomainError::validation("product name must not be empty"));
    }
    if product.price < 0 {
        return Err(DomainError::validation("price must not be negative"));
    }
    if product.stock < 0 {
        return Err(DomainError::validation("stock must not be negative"));
    }
    Ok(())
}
