//! Fault-injecting wrappers around the in-memory store and cache.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use stockgate_core::{OrderId, ProductId};
use stockgate_products::Product;
use stockgate_sales::{NewOrder, Order, StockDelta};

use crate::cache::{CacheError, InMemoryStockCache, StockCache};
use crate::store::{CommittedOrder, InMemoryProductStore, ProductStore, StoreError};

/// Store wrapper that counts reads and can be slowed down or taken offline.
#[derive(Debug, Default)]
pub struct InstrumentedStore {
    inner: InMemoryProductStore,
    unavailable: AtomicBool,
    delay_ms: AtomicU64,
    bulk_reads: AtomicUsize,
    list_reads: AtomicUsize,
}

impl InstrumentedStore {
    pub fn new(inner: InMemoryProductStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &InMemoryProductStore {
        &self.inner
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn bulk_reads(&self) -> usize {
        self.bulk_reads.load(Ordering::SeqCst)
    }

    pub fn list_reads(&self) -> usize {
        self.list_reads.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), StoreError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductStore for InstrumentedStore {
    async fn get_product(&self, id: ProductId) -> Result<Product, StoreError> {
        self.gate().await?;
        self.inner.get_product(id).await
    }

    async fn get_products_bulk(
        &self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, StoreError> {
        self.bulk_reads.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        self.inner.get_products_bulk(ids).await
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        self.list_reads.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        self.inner.list_products().await
    }

    async fn commit_order(
        &self,
        order: &NewOrder,
        deltas: &[StockDelta],
    ) -> Result<CommittedOrder, StoreError> {
        self.gate().await?;
        self.inner.commit_order(order, deltas).await
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.gate().await?;
        self.inner.get_order(id).await
    }

    async fn upsert_product(&self, product: &Product) -> Result<Product, StoreError> {
        self.gate().await?;
        self.inner.upsert_product(product).await
    }

    async fn delete_product(&self, id: ProductId) -> Result<(), StoreError> {
        self.gate().await?;
        self.inner.delete_product(id).await
    }
}

/// Cache wrapper that can fail individual keys or go down entirely.
#[derive(Debug, Default)]
pub struct FlakyCache {
    inner: InMemoryStockCache,
    down: AtomicBool,
    failing: Mutex<HashSet<ProductId>>,
    failing_once: Mutex<HashSet<ProductId>>,
    writes: AtomicUsize,
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryStockCache {
        &self.inner
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Make writes of `ids` fail until cleared.
    pub fn fail_writes_for(&self, ids: impl IntoIterator<Item = ProductId>) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.extend(ids);
        }
    }

    /// Make only the next write of each of `ids` fail.
    pub fn fail_next_write_for(&self, ids: impl IntoIterator<Item = ProductId>) {
        if let Ok(mut once) = self.failing_once.lock() {
            once.extend(ids);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
    }

    /// Number of `set_many` calls observed.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_up(&self) -> Result<(), CacheError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("injected outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StockCache for FlakyCache {
    async fn get(&self, id: ProductId) -> Result<Option<Product>, CacheError> {
        self.check_up()?;
        self.inner.get(id).await
    }

    async fn set_many(&self, products: &[Product], ttl: Duration) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;

        let failing = self
            .failing
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default();
        let mut once = self
            .failing_once
            .lock()
            .map(|mut f| std::mem::take(&mut *f))
            .unwrap_or_default();
        let (bad, good): (Vec<&Product>, Vec<&Product>) = products
            .iter()
            .partition(|p| failing.contains(&p.id) || once.remove(&p.id));

        // One-shot failures for keys not in this batch stay armed.
        if !once.is_empty() {
            if let Ok(mut f) = self.failing_once.lock() {
                f.extend(once);
            }
        }

        let good: Vec<Product> = good.into_iter().cloned().collect();
        self.inner.set_many(&good, ttl).await?;

        if bad.is_empty() {
            Ok(())
        } else {
            Err(CacheError::PartialWrite {
                failed: bad.iter().map(|p| p.id).collect(),
            })
        }
    }

    async fn remove(&self, id: ProductId) -> Result<(), CacheError> {
        self.check_up()?;
        self.inner.remove(id).await
    }

    fn enumerate(&self) -> BoxStream<'static, Result<Product, CacheError>> {
        if self.down.load(Ordering::SeqCst) {
            return Box::pin(futures::stream::once(async {
                Err(CacheError::Connection("injected outage".to_string()))
            }));
        }
        self.inner.enumerate()
    }
}
