use std::time::Duration;

use tracing::{info, instrument, warn};

use stockgate_core::{DomainError, DomainResult, OrderId};
use stockgate_sales::{NewOrder, Order};

use crate::cache::StockCache;
use crate::store::{ProductStore, StoreError, with_timeout};
use crate::workers::CacheJobQueue;

use super::evaluator::ReservationEvaluator;

/// Entry point for accepting orders.
///
/// `admit` runs: validate → advisory evaluation → one store transaction that
/// inserts the order and re-checks every decrement → enqueue a cache
/// write-back of the committed rows. The result depends only on the
/// transaction; the write-back is never awaited and its failures never
/// reach the caller.
#[derive(Debug, Clone)]
pub struct OrderAdmission<S, C> {
    evaluator: ReservationEvaluator<S, C>,
    store: S,
    jobs: CacheJobQueue,
    store_timeout: Duration,
}

impl<S, C> OrderAdmission<S, C>
where
    S: ProductStore + Clone,
    C: StockCache,
{
    pub fn new(store: S, cache: C, jobs: CacheJobQueue, store_timeout: Duration) -> Self {
        Self {
            evaluator: ReservationEvaluator::new(store.clone(), cache, store_timeout),
            store,
            jobs,
            store_timeout,
        }
    }

    pub fn evaluator(&self) -> &ReservationEvaluator<S, C> {
        &self.evaluator
    }

    #[instrument(skip(self, order), fields(owner = %order.owner, items = order.items.len()), err)]
    pub async fn admit(&self, order: &NewOrder) -> DomainResult<OrderId> {
        order.validate()?;

        let reservation = self.evaluator.evaluate(&order.items).await?;

        let committed = with_timeout(
            self.store_timeout,
            self.store.commit_order(order, &reservation.deltas),
        )
        .await
        .map_err(|err| {
            if matches!(err, StoreError::Conflict(_)) {
                warn!(error = %err, source = ?reservation.source, "stock changed between evaluation and commit");
            }
            DomainError::from(err)
        })?;

        let order_id = committed.order.id;
        // Commit is durable at this point; the cache may now follow.
        self.jobs.submit_write_back(committed.products);

        info!(order_id = %order_id, source = ?reservation.source, "order admitted");
        Ok(order_id)
    }

    /// Fetch a persisted order.
    pub async fn get_order(&self, id: OrderId) -> DomainResult<Option<Order>> {
        with_timeout(self.store_timeout, self.store.get_order(id))
            .await
            .map_err(DomainError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stockgate_core::{ProductId, UserId};
    use stockgate_products::Product;
    use stockgate_sales::OrderItem;
    use tokio_util::sync::CancellationToken;

    use crate::cache::InMemoryStockCache;
    use crate::store::InMemoryProductStore;
    use crate::test_support::{FlakyCache, InstrumentedStore};
    use crate::workers::{CacheRepairTask, CacheWorkers, CacheWorkersHandle, WorkerConfig};

    const TTL: Duration = Duration::from_secs(60);
    const BUDGET: Duration = Duration::from_millis(500);

    fn pid(n: i64) -> ProductId {
        ProductId::new(n)
    }

    fn order(lines: &[(i64, u32)]) -> NewOrder {
        NewOrder::new(
            UserId::new(1),
            lines.iter().map(|(p, q)| OrderItem::new(pid(*p), *q, 100)).collect(),
        )
    }

    fn engine<C>(
        store: Arc<InstrumentedStore>,
        cache: Arc<C>,
    ) -> (OrderAdmission<Arc<InstrumentedStore>, Arc<C>>, CacheWorkersHandle)
    where
        C: StockCache + 'static,
    {
        let repairer = CacheRepairTask::new(store.clone(), cache.clone(), TTL, BUDGET);
        let (jobs, handle) = CacheWorkers::spawn(repairer, WorkerConfig::default(), CancellationToken::new());
        (OrderAdmission::new(store, cache, jobs, BUDGET), handle)
    }

    fn stocked(stock: i64) -> Arc<InstrumentedStore> {
        Arc::new(InstrumentedStore::new(InMemoryProductStore::with_products([
            Product::new(pid(1), "apple", 100, stock),
            Product::new(pid(2), "pear", 100, stock),
        ])))
    }

    #[tokio::test]
    async fn admitted_order_decrements_and_writes_back() {
        let store = stocked(10);
        let cache = Arc::new(InMemoryStockCache::new());
        let (admission, workers) = engine(store.clone(), cache.clone());

        let id = admission.admit(&order(&[(1, 4), (2, 1)])).await.unwrap();
        workers.shutdown().await;

        assert_eq!(store.inner().stock_of(pid(1)), Some(6));
        assert_eq!(cache.peek(pid(1)).unwrap().stock, 6);
        assert_eq!(cache.peek(pid(2)).unwrap().stock, 9);
        let persisted = admission.get_order(id).await.unwrap().unwrap();
        assert_eq!(persisted.items.len(), 2);
    }

    #[tokio::test]
    async fn stale_cache_cannot_oversell() {
        let store = stocked(2);
        let cache = Arc::new(InMemoryStockCache::new());
        // Cache still believes there are 10 units.
        cache
            .set_many(&[Product::new(pid(1), "apple", 100, 10)], TTL)
            .await
            .unwrap();
        let (admission, _workers) = engine(store.clone(), cache);

        let err = admission.admit(&order(&[(1, 5)])).await.unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(pid(1)));
        assert_eq!(store.inner().stock_of(pid(1)), Some(2));
        assert_eq!(store.inner().order_count(), 0);
    }

    #[tokio::test]
    async fn empty_and_zero_quantity_orders_never_reach_the_store() {
        let store = stocked(10);
        let cache = Arc::new(InMemoryStockCache::new());
        let (admission, _workers) = engine(store.clone(), cache);

        assert_eq!(admission.admit(&order(&[])).await, Err(DomainError::EmptyOrder));
        assert_eq!(
            admission.admit(&order(&[(1, 0)])).await,
            Err(DomainError::InvalidQuantity { product_id: pid(1) })
        );
        assert_eq!(store.bulk_reads(), 0);
    }

    #[tokio::test]
    async fn cache_outage_does_not_block_admission() {
        let store = stocked(10);
        let cache = Arc::new(FlakyCache::new());
        cache.set_down(true);
        let (admission, workers) = engine(store.clone(), cache);

        admission.admit(&order(&[(1, 3)])).await.unwrap();
        workers.shutdown().await;
        assert_eq!(store.inner().stock_of(pid(1)), Some(7));
    }

    #[tokio::test]
    async fn store_outage_is_reported_as_unavailable() {
        let store = stocked(10);
        let cache = Arc::new(InMemoryStockCache::new());
        cache
            .set_many(&[Product::new(pid(1), "apple", 100, 10)], TTL)
            .await
            .unwrap();
        store.set_unavailable(true);
        let (admission, _workers) = engine(store.clone(), cache);

        let err = admission.admit(&order(&[(1, 1)])).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_commit_times_out_without_applying() {
        let store = stocked(10);
        let cache = Arc::new(InMemoryStockCache::new());
        cache
            .set_many(&[Product::new(pid(1), "apple", 100, 10)], TTL)
            .await
            .unwrap();
        store.set_delay(Duration::from_secs(5));
        let (admission, _workers) = engine(store.clone(), cache);

        let err = admission.admit(&order(&[(1, 1)])).await.unwrap_err();
        assert!(matches!(err, DomainError::StoreUnavailable(_)));
        assert_eq!(store.inner().stock_of(pid(1)), Some(10));
        assert_eq!(store.inner().order_count(), 0);
    }
}
