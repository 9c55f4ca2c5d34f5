use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::Instant;

use stockgate_core::ProductId;
use stockgate_products::Product;

use super::r#trait::{CacheError, StockCache};

#[derive(Debug, Clone)]
struct Entry {
    product: Product,
    expires_at: Instant,
}

/// In-process stock cache with per-entry expiry.
///
/// A write whose snapshot is older than the live entry for the same product
/// is skipped, so out-of-order write-backs settle on the newest value.
///
/// Intended for tests/dev. Expiry uses the tokio clock, so tests running with
/// a paused clock can advance past a TTL deterministically.
#[derive(Debug, Default)]
pub struct InMemoryStockCache {
    entries: RwLock<HashMap<ProductId, Entry>>,
}

impl InMemoryStockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|e| e.values().filter(|v| v.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw peek used by tests to assert on cached values.
    pub fn peek(&self, id: ProductId) -> Option<Product> {
        let now = Instant::now();
        self.entries
            .read()
            .ok()?
            .get(&id)
            .filter(|e| e.expires_at > now)
            .map(|e| e.product.clone())
    }

    fn poisoned() -> CacheError {
        CacheError::Connection("cache lock poisoned".to_string())
    }
}

#[async_trait]
impl StockCache for InMemoryStockCache {
    async fn get(&self, id: ProductId) -> Result<Option<Product>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries
            .get(&id)
            .filter(|e| e.expires_at > now)
            .map(|e| e.product.clone()))
    }

    async fn set_many(&self, products: &[Product], ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let expires_at = now + ttl;
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        for p in products {
            let superseded = entries
                .get(&p.id)
                .is_some_and(|e| e.expires_at > now && p.is_older_than(&e.product));
            if superseded {
                continue;
            }
            entries.insert(
                p.id,
                Entry {
                    product: p.clone(),
                    expires_at,
                },
            );
        }
        // Opportunistic sweep keeps the map from growing with dead entries.
        entries.retain(|_, e| e.expires_at > now);
        Ok(())
    }

    async fn remove(&self, id: ProductId) -> Result<(), CacheError> {
        self.entries
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(&id);
        Ok(())
    }

    fn enumerate(&self) -> BoxStream<'static, Result<Product, CacheError>> {
        let now = Instant::now();
        let live: Vec<Result<Product, CacheError>> = match self.entries.read() {
            Ok(entries) => entries
                .values()
                .filter(|e| e.expires_at > now)
                .map(|e| Ok(e.product.clone()))
                .collect(),
            Err(_) => vec![Err(Self::poisoned())],
        };
        stream::iter(live).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn product(id: i64, stock: i64) -> Product {
        Product::new(ProductId::new(id), format!("p{id}"), 100, stock)
    }

    #[tokio::test]
    async fn get_returns_written_snapshot() {
        let cache = InMemoryStockCache::new();
        cache
            .set_many(&[product(1, 5)], Duration::from_secs(60))
            .await
            .unwrap();

        let hit = cache.get(ProductId::new(1)).await.unwrap().unwrap();
        assert_eq!(hit.stock, 5);
        assert!(cache.get(ProductId::new(2)).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryStockCache::new();
        cache
            .set_many(&[product(1, 5)], Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(cache.get(ProductId::new(1)).await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn older_snapshot_does_not_replace_newer_entry() {
        let cache = InMemoryStockCache::new();
        let ttl = Duration::from_secs(60);
        cache.set_many(&[product(1, 8).with_version(6)], ttl).await.unwrap();

        cache.set_many(&[product(1, 9).with_version(5)], ttl).await.unwrap();
        assert_eq!(cache.peek(ProductId::new(1)).unwrap().stock, 8);

        cache.set_many(&[product(1, 7).with_version(7)], ttl).await.unwrap();
        assert_eq!(cache.peek(ProductId::new(1)).unwrap().stock, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_does_not_block_older_snapshot() {
        let cache = InMemoryStockCache::new();
        cache
            .set_many(&[product(1, 8).with_version(6)], Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        cache
            .set_many(&[product(1, 9).with_version(5)], Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(cache.peek(ProductId::new(1)).unwrap().stock, 9);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let cache = InMemoryStockCache::new();
        cache.remove(ProductId::new(1)).await.unwrap();
        cache
            .set_many(&[product(1, 5)], Duration::from_secs(60))
            .await
            .unwrap();
        cache.remove(ProductId::new(1)).await.unwrap();
        cache.remove(ProductId::new(1)).await.unwrap();
        assert!(cache.peek(ProductId::new(1)).is_none());
    }

    #[tokio::test]
    async fn enumerate_lists_live_entries() {
        let cache = InMemoryStockCache::new();
        cache
            .set_many(&[product(1, 5), product(2, 7)], Duration::from_secs(60))
            .await
            .unwrap();

        let mut ids: Vec<_> = cache
            .enumerate()
            .map_ok(|p| p.id)
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        ids.sort();
        assert_eq!(ids, vec![ProductId::new(1), ProductId::new(2)]);
    }
}
