use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use stockgate_core::{OrderId, ProductId};
use stockgate_products::Product;
use stockgate_sales::{NewOrder, Order, StockDelta};

use super::r#trait::{CommittedOrder, ProductStore, StoreError};

#[derive(Debug, Default)]
struct State {
    products: BTreeMap<ProductId, Product>,
    orders: BTreeMap<OrderId, Order>,
    last_order_id: i64,
    last_version: i64,
}

impl State {
    /// Next row revision; shared by every product so a re-created row never
    /// reuses an older value.
    fn next_version(&mut self) -> i64 {
        self.last_version += 1;
        self.last_version
    }

    fn write(&mut self, product: Product) -> Product {
        let stored = product.with_version(self.next_version());
        self.products.insert(stored.id, stored.clone());
        stored
    }
}

/// In-memory product/order store.
///
/// Intended for tests/dev. A single mutex serializes commits, which gives the
/// same all-or-nothing semantics as a database transaction.
#[derive(Debug, Default)]
pub struct InMemoryProductStore {
    state: Mutex<State>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `products`.
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            for p in products {
                state.write(p);
            }
        }
        store
    }

    /// Current stock of a product, if it exists (test/dev helper).
    pub fn stock_of(&self, id: ProductId) -> Option<i64> {
        self.state.lock().ok()?.products.get(&id).map(|p| p.stock)
    }

    /// Number of persisted orders (test/dev helper).
    pub fn order_count(&self) -> usize {
        self.state.lock().map(|s| s.orders.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn get_product(&self, id: ProductId) -> Result<Product, StoreError> {
        self.lock()?
            .products
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn get_products_bulk(
        &self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, StoreError> {
        let state = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.products.get(id).map(|p| (*id, p.clone())))
            .collect())
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self.lock()?.products.values().cloned().collect())
    }

    async fn commit_order(
        &self,
        order: &NewOrder,
        deltas: &[StockDelta],
    ) -> Result<CommittedOrder, StoreError> {
        let mut state = self.lock()?;
        let now = Utc::now();

        // Check every row before touching any of them.
        let mut updated = Vec::with_capacity(deltas.len());
        for d in deltas {
            let current = state
                .products
                .get(&d.product_id)
                .ok_or(StoreError::NotFound(d.product_id))?;
            let next = current
                .stock
                .checked_add(d.delta)
                .filter(|s| *s >= 0)
                .ok_or(StoreError::Conflict(d.product_id))?;
            updated.push(current.with_stock(next, now));
        }

        let updated: Vec<Product> = updated.into_iter().map(|p| state.write(p)).collect();

        state.last_order_id += 1;
        let persisted = Order {
            id: OrderId::new(state.last_order_id),
            owner: order.owner,
            status: order.status,
            items: order.items.clone(),
            created_at: now,
        };
        state.orders.insert(persisted.id, persisted.clone());

        Ok(CommittedOrder {
            order: persisted,
            products: updated,
        })
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.lock()?.orders.get(&id).cloned())
    }

    async fn upsert_product(&self, product: &Product) -> Result<Product, StoreError> {
        let mut stored = product.clone();
        stored.updated_at = Utc::now();
        Ok(self.lock()?.write(stored))
    }

    async fn delete_product(&self, id: ProductId) -> Result<(), StoreError> {
        self.lock()?
            .products
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}
