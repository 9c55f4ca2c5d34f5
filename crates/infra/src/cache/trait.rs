use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use stockgate_core::ProductId;
use stockgate_products::Product;

/// Stock cache operation error.
///
/// Never surfaced to admission callers: the evaluator treats any of these as a
/// miss and the background workers log them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache command error: {0}")]
    Command(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),

    /// Some keys of a batch write failed; the rest were written.
    #[error("cache write failed for {} key(s)", failed.len())]
    PartialWrite { failed: Vec<ProductId> },
}

impl CacheError {
    /// Product ids a write could not store, given the ids that were attempted.
    ///
    /// A partial write names its failures; any other error means nothing can
    /// be assumed written.
    pub fn failed_ids(&self, attempted: &[ProductId]) -> Vec<ProductId> {
        match self {
            CacheError::PartialWrite { failed } => failed.clone(),
            _ => attempted.to_vec(),
        }
    }
}

/// Fast, possibly stale, best-effort mirror of product rows keyed by id.
///
/// Entries are snapshots: a read may return a value older than the store's,
/// and any entry may disappear at any time (expiry, eviction, restart).
/// Writes within one `set_many` are independent per key; there is no
/// cross-key atomicity.
#[async_trait]
pub trait StockCache: Send + Sync {
    /// Look up one product. `Ok(None)` is a miss.
    async fn get(&self, id: ProductId) -> Result<Option<Product>, CacheError>;

    /// Write every product with the given time-to-live.
    ///
    /// A snapshot whose `version` is lower than the live entry's is skipped
    /// (not an error), so writes arriving out of order keep the newest value.
    /// Per-key failures are reported as [`CacheError::PartialWrite`].
    async fn set_many(&self, products: &[Product], ttl: Duration) -> Result<(), CacheError>;

    /// Drop an entry. Removing an absent key is not an error.
    async fn remove(&self, id: ProductId) -> Result<(), CacheError>;

    /// Stream every live entry.
    ///
    /// Not a point-in-time snapshot: entries written or expiring during the
    /// walk may or may not appear.
    fn enumerate(&self) -> BoxStream<'static, Result<Product, CacheError>>;
}

#[async_trait]
impl<C> StockCache for Arc<C>
where
    C: StockCache + ?Sized,
{
    async fn get(&self, id: ProductId) -> Result<Option<Product>, CacheError> {
        (**self).get(id).await
    }

    async fn set_many(&self, products: &[Product], ttl: Duration) -> Result<(), CacheError> {
        (**self).set_many(products, ttl).await
    }

    async fn remove(&self, id: ProductId) -> Result<(), CacheError> {
        (**self).remove(id).await
    }

    fn enumerate(&self) -> BoxStream<'static, Result<Product, CacheError>> {
        (**self).enumerate()
    }
}
