use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, info, warn};

use stockgate_core::ProductId;
use stockgate_products::Product;

use crate::cache::StockCache;
use crate::store::{ProductStore, with_timeout};

/// Outcome of one repair or reload pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Distinct products the pass tried to refresh.
    pub requested: usize,
    /// Entries written to the cache.
    pub written: usize,
    /// Entries that could not be written or removed.
    pub failed: usize,
    /// Entries removed because the product no longer exists.
    pub removed: usize,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Re-populates cache entries from the authoritative store.
///
/// Best effort, single pass: failures are logged and counted, never retried
/// here. The next scheduled reload picks up whatever a pass left behind.
#[derive(Debug, Clone)]
pub struct CacheRepairTask<S, C> {
    store: S,
    cache: C,
    ttl: Duration,
    store_timeout: Duration,
}

impl<S, C> CacheRepairTask<S, C>
where
    S: ProductStore,
    C: StockCache,
{
    pub fn new(store: S, cache: C, ttl: Duration, store_timeout: Duration) -> Self {
        Self {
            store,
            cache,
            ttl,
            store_timeout,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Write `products` as-is, returning the ids that failed.
    ///
    /// This is the write-back step after a commit: the snapshots come straight
    /// from the committed transaction, so no store read is needed.
    pub async fn write_snapshots(&self, products: &[Product]) -> Vec<ProductId> {
        if products.is_empty() {
            return Vec::new();
        }
        match self.cache.set_many(products, self.ttl).await {
            Ok(()) => Vec::new(),
            Err(err) => {
                let attempted: Vec<ProductId> = products.iter().map(|p| p.id).collect();
                let failed = err.failed_ids(&attempted);
                warn!(failed = failed.len(), error = %err, "cache write-back failed");
                failed
            }
        }
    }

    /// Re-read `ids` from the store and write them to the cache.
    ///
    /// Ids the store no longer has are removed from the cache.
    pub async fn repair(&self, ids: &[ProductId]) -> RepairReport {
        let ids: Vec<ProductId> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let mut report = RepairReport {
            requested: ids.len(),
            ..RepairReport::default()
        };
        if ids.is_empty() {
            return report;
        }

        let rows = match with_timeout(self.store_timeout, self.store.get_products_bulk(&ids)).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(requested = ids.len(), error = %err, "cache repair could not read store");
                report.failed = ids.len();
                return report;
            }
        };

        let found: Vec<Product> = ids.iter().filter_map(|id| rows.get(id).cloned()).collect();
        let failed = self.write_snapshots(&found).await;
        report.failed += failed.len();
        report.written = found.len() - failed.len();

        for id in ids.iter().filter(|id| !rows.contains_key(id)) {
            self.remove_entry(*id, &mut report).await;
        }

        debug!(
            requested = report.requested,
            written = report.written,
            failed = report.failed,
            removed = report.removed,
            "cache repair pass finished"
        );
        report
    }

    /// Refresh every product and drop entries for products that no longer exist.
    pub async fn reload_all(&self) -> RepairReport {
        let products = match with_timeout(self.store_timeout, self.store.list_products()).await {
            Ok(products) => products,
            Err(err) => {
                warn!(error = %err, "cache reload could not list products");
                return RepairReport {
                    failed: 1,
                    ..RepairReport::default()
                };
            }
        };

        let mut report = RepairReport {
            requested: products.len(),
            ..RepairReport::default()
        };

        let failed = self.write_snapshots(&products).await;
        report.failed += failed.len();
        report.written = products.len() - failed.len();

        let live: HashSet<ProductId> = products.iter().map(|p| p.id).collect();
        let mut orphans = Vec::new();
        let mut entries = self.cache.enumerate();
        while let Some(entry) = entries.next().await {
            match entry {
                Ok(p) if !live.contains(&p.id) => orphans.push(p.id),
                Ok(_) => {}
                Err(err) => {
                    // Orphans left behind expire via TTL.
                    warn!(error = %err, "cache enumeration failed; skipping orphan sweep");
                    break;
                }
            }
        }
        for id in orphans {
            self.remove_entry(id, &mut report).await;
        }

        info!(
            requested = report.requested,
            written = report.written,
            failed = report.failed,
            removed = report.removed,
            "cache reload finished"
        );
        report
    }

    async fn remove_entry(&self, id: ProductId, report: &mut RepairReport) {
        match self.cache.remove(id).await {
            Ok(()) => report.removed += 1,
            Err(err) => {
                warn!(product_id = %id, error = %err, "cache entry removal failed");
                report.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::cache::InMemoryStockCache;
    use crate::store::InMemoryProductStore;
    use crate::test_support::{FlakyCache, InstrumentedStore};

    const TTL: Duration = Duration::from_secs(60);
    const BUDGET: Duration = Duration::from_secs(1);

    fn pid(n: i64) -> ProductId {
        ProductId::new(n)
    }

    fn catalog() -> Vec<Product> {
        vec![
            Product::new(pid(1), "apple", 100, 10),
            Product::new(pid(2), "pear", 100, 6),
            Product::new(pid(3), "plum", 100, 0),
        ]
    }

    #[tokio::test]
    async fn repair_writes_current_store_values() {
        let store = Arc::new(InMemoryProductStore::with_products(catalog()));
        let cache = Arc::new(InMemoryStockCache::new());
        cache
            .set_many(&[Product::new(pid(1), "apple", 100, 99)], TTL)
            .await
            .unwrap();

        let task = CacheRepairTask::new(store, cache.clone(), TTL, BUDGET);
        let report = task.repair(&[pid(1), pid(2), pid(1)]).await;

        assert_eq!(report, RepairReport { requested: 2, written: 2, failed: 0, removed: 0 });
        assert_eq!(cache.peek(pid(1)).unwrap().stock, 10);
        assert_eq!(cache.peek(pid(2)).unwrap().stock, 6);
    }

    #[tokio::test]
    async fn repair_removes_entries_of_deleted_products() {
        let store = Arc::new(InMemoryProductStore::with_products(catalog()));
        let cache = Arc::new(InMemoryStockCache::new());
        cache
            .set_many(&[Product::new(pid(7), "ghost", 1, 1)], TTL)
            .await
            .unwrap();

        let task = CacheRepairTask::new(store, cache.clone(), TTL, BUDGET);
        let report = task.repair(&[pid(7)]).await;

        assert_eq!(report.removed, 1);
        assert!(cache.peek(pid(7)).is_none());
    }

    #[tokio::test]
    async fn repair_is_idempotent() {
        let store = Arc::new(InMemoryProductStore::with_products(catalog()));
        let cache = Arc::new(InMemoryStockCache::new());
        let task = CacheRepairTask::new(store, cache.clone(), TTL, BUDGET);
        let ids = [pid(1), pid(2), pid(3)];

        task.repair(&ids).await;
        let first: Vec<_> = ids.iter().map(|id| cache.peek(*id).map(|p| p.stock)).collect();
        task.repair(&ids).await;
        let second: Vec<_> = ids.iter().map(|id| cache.peek(*id).map(|p| p.stock)).collect();

        assert_eq!(first, vec![Some(10), Some(6), Some(0)]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn repair_counts_failed_keys_without_retrying() {
        let store = Arc::new(InMemoryProductStore::with_products(catalog()));
        let cache = Arc::new(FlakyCache::new());
        cache.fail_writes_for([pid(2)]);

        let task = CacheRepairTask::new(store, cache.clone(), TTL, BUDGET);
        let report = task.repair(&[pid(1), pid(2)]).await;

        assert_eq!(report.written, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(cache.writes(), 1);
        assert!(cache.inner().peek(pid(1)).is_some());
        assert!(cache.inner().peek(pid(2)).is_none());
    }

    #[tokio::test]
    async fn repair_with_store_down_fails_every_id() {
        let store = Arc::new(InstrumentedStore::new(InMemoryProductStore::with_products(catalog())));
        store.set_unavailable(true);
        let cache = Arc::new(InMemoryStockCache::new());

        let task = CacheRepairTask::new(store, cache.clone(), TTL, BUDGET);
        let report = task.repair(&[pid(1), pid(2)]).await;

        assert_eq!(report.failed, 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn reload_refreshes_everything_and_prunes_orphans() {
        let store = Arc::new(InMemoryProductStore::with_products(catalog()));
        let cache = Arc::new(InMemoryStockCache::new());
        cache
            .set_many(
                &[Product::new(pid(1), "apple", 100, 1), Product::new(pid(9), "gone", 1, 5)],
                TTL,
            )
            .await
            .unwrap();

        let task = CacheRepairTask::new(store, cache.clone(), TTL, BUDGET);
        let report = task.reload_all().await;

        assert_eq!(report, RepairReport { requested: 3, written: 3, failed: 0, removed: 1 });
        assert_eq!(cache.peek(pid(1)).unwrap().stock, 10);
        assert!(cache.peek(pid(9)).is_none());
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn stale_reload_listing_does_not_overwrite_newer_write_back() {
        let store = Arc::new(InMemoryProductStore::with_products(catalog()));
        let cache = Arc::new(InMemoryStockCache::new());
        let task = CacheRepairTask::new(store.clone(), cache.clone(), TTL, BUDGET);

        // A reload lists products, then an order commits and its write-back
        // lands before the reload gets to write.
        let listing = store.list_products().await.unwrap();
        let order = stockgate_sales::NewOrder::new(
            stockgate_core::UserId::new(1),
            vec![stockgate_sales::OrderItem::new(pid(1), 4, 100)],
        );
        let committed = store
            .commit_order(&order, &order.demand().unwrap())
            .await
            .unwrap();
        assert!(task.write_snapshots(&committed.products).await.is_empty());
        assert!(task.write_snapshots(&listing).await.is_empty());

        assert_eq!(cache.peek(pid(1)).unwrap().stock, 6);
        assert_eq!(cache.peek(pid(2)).unwrap().stock, 6);
    }

    #[tokio::test]
    async fn write_snapshots_reports_everything_when_cache_is_down() {
        let store = Arc::new(InMemoryProductStore::new());
        let cache = Arc::new(FlakyCache::new());
        cache.set_down(true);

        let task = CacheRepairTask::new(store, cache, TTL, BUDGET);
        let failed = task.write_snapshots(&catalog()).await;
        assert_eq!(failed, vec![pid(1), pid(2), pid(3)]);
    }
}
