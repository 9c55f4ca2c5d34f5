//! Postgres-backed product/order store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (check violation) | `23514` | `Conflict` | `stock >= 0` constraint tripped by a racing writer |
//! | Out-of-range column value | N/A | `Invalid` | Checked before binding, never sent |
//! | Database (other) | Any other | `Unavailable` | Constraint/driver errors |
//! | PoolTimedOut / PoolClosed / Io | N/A | `Unavailable` | Connection problems |
//! | RowNotFound | N/A | `NotFound` | Only where a single row is expected |
//!
//! ## Conditional decrement
//!
//! `commit_order` applies each delta as
//! `UPDATE products SET stock = stock + $delta WHERE id = $id AND stock + $delta >= 0`.
//! The row lock taken by the UPDATE makes the check-and-write atomic against
//! concurrent admissions; a zero-row result is then classified as
//! `NotFound` or `Conflict` inside the same transaction, and the
//! transaction is rolled back.
//!
//! ## Row versions
//!
//! Every insert or update of a product row draws `version` from the single
//! `product_versions` sequence. A writer blocked on the row lock recomputes
//! its `SET` list once the lock is granted, so per row the committed
//! versions increase in commit order. Caches use this to drop snapshots that
//! arrive after a newer one.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use stockgate_core::{CategoryId, OrderId, ProductId, UserId};
use stockgate_products::Product;
use stockgate_sales::{NewOrder, Order, OrderItem, OrderStatus, StockDelta};

use super::r#trait::{CommittedOrder, ProductStore, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const PRODUCT_COLUMNS: &str = "id, name, description, price, category_id, stock, updated_at, version";

/// Postgres-backed authoritative store.
///
/// `PgPool` is internally reference counted, so cloning the store is cheap
/// and every clone shares the same pool.
#[derive(Debug, Clone)]
pub struct PostgresProductStore {
    pool: PgPool,
    /// Applied as `SET LOCAL statement_timeout` inside write transactions.
    statement_timeout: Duration,
}

impl PostgresProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: Duration::from_secs(5),
        }
    }

    /// Connect a pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Create the tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        // SET LOCAL does not accept bind parameters.
        let millis = self.statement_timeout.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL statement_timeout = {millis}"))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(tx)
    }
}

#[async_trait]
impl ProductStore for PostgresProductStore {
    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn get_product(&self, id: ProductId) -> Result<Product, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_product", e))?;

        match row {
            Some(row) => Ok(ProductRow::from_row(&row)
                .map_err(|e| map_sqlx_error("get_product", e))?
                .into()),
            None => Err(StoreError::NotFound(id)),
        }
    }

    #[instrument(
        skip(self, ids),
        fields(requested = ids.len(), found = tracing::field::Empty),
        err
    )]
    async fn get_products_bulk(
        &self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, StoreError> {
        let raw: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)"
        ))
        .bind(&raw)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_products_bulk", e))?;

        let mut found = HashMap::with_capacity(rows.len());
        for row in rows {
            let product: Product = ProductRow::from_row(&row)
                .map_err(|e| map_sqlx_error("get_products_bulk", e))?
                .into();
            found.insert(product.id, product);
        }
        Span::current().record("found", found.len());
        Ok(found)
    }

    #[instrument(skip(self), err)]
    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;

        rows.iter()
            .map(|row| {
                ProductRow::from_row(row)
                    .map(Product::from)
                    .map_err(|e| map_sqlx_error("list_products", e))
            })
            .collect()
    }

    #[instrument(
        skip(self, order, deltas),
        fields(owner = %order.owner, items = order.items.len(), deltas = deltas.len()),
        err
    )]
    async fn commit_order(
        &self,
        order: &NewOrder,
        deltas: &[StockDelta],
    ) -> Result<CommittedOrder, StoreError> {
        let mut tx = self.begin("commit_order").await?;

        let order_row = sqlx::query(
            r#"
            INSERT INTO orders (user_id, status)
            VALUES ($1, $2)
            RETURNING id, created_at
            "#,
        )
        .bind(order.owner.get())
        .bind(order.status.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;

        let order_id = OrderId::new(
            order_row
                .try_get::<i64, _>("id")
                .map_err(|e| map_sqlx_error("insert_order", e))?,
        );
        let created_at: DateTime<Utc> = order_row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("insert_order", e))?;

        for (index, item) in order.items.iter().enumerate() {
            let (line_no, quantity) = item_columns(index, item)?;
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, line_no, product_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order_id.get())
            .bind(line_no)
            .bind(item.product_id.get())
            .bind(quantity)
            .bind(item.unit_price)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_order_item", e))?;
        }

        let mut products = Vec::with_capacity(deltas.len());
        for d in deltas {
            let updated = sqlx::query(&format!(
                r#"
                UPDATE products
                SET stock = stock + $1,
                    updated_at = NOW(),
                    version = nextval('product_versions')
                WHERE id = $2 AND stock + $1 >= 0
                RETURNING {PRODUCT_COLUMNS}
                "#
            ))
            .bind(d.delta)
            .bind(d.product_id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_decrement_error(d.product_id, e))?;

            match updated {
                Some(row) => {
                    let product: Product = ProductRow::from_row(&row)
                        .map_err(|e| map_sqlx_error("decrement_stock", e))?
                        .into();
                    products.push(product);
                }
                None => {
                    let err = classify_missed_update(&mut tx, d.product_id).await?;
                    tx.rollback()
                        .await
                        .map_err(|e| map_sqlx_error("rollback", e))?;
                    return Err(err);
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(CommittedOrder {
            order: Order {
                id: order_id,
                owner: order.owner,
                status: order.status,
                items: order.items.clone(),
                created_at,
            },
            products,
        })
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let Some(row) = sqlx::query("SELECT id, user_id, status, created_at FROM orders WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_order", e))?
        else {
            return Ok(None);
        };

        let status: String = row.try_get("status").map_err(|e| map_sqlx_error("get_order", e))?;
        let owner: i64 = row.try_get("user_id").map_err(|e| map_sqlx_error("get_order", e))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("get_order", e))?;

        let item_rows = sqlx::query(
            r#"
            SELECT product_id, quantity, unit_price
            FROM order_items
            WHERE order_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_order_items", e))?;

        let mut items = Vec::with_capacity(item_rows.len());
        for r in item_rows {
            let product_id: i64 = r.try_get("product_id").map_err(|e| map_sqlx_error("get_order_items", e))?;
            let quantity: i64 = r.try_get("quantity").map_err(|e| map_sqlx_error("get_order_items", e))?;
            let unit_price: i64 = r.try_get("unit_price").map_err(|e| map_sqlx_error("get_order_items", e))?;
            let quantity = u32::try_from(quantity).map_err(|_| {
                StoreError::Unavailable(format!("stored quantity {quantity} out of range"))
            })?;
            items.push(OrderItem::new(ProductId::new(product_id), quantity, unit_price));
        }

        Ok(Some(Order {
            id,
            owner: UserId::new(owner),
            status: status
                .parse::<OrderStatus>()
                .map_err(|e| StoreError::Unavailable(e.to_string()))?,
            items,
            created_at,
        }))
    }

    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    async fn upsert_product(&self, product: &Product) -> Result<Product, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO products (id, name, description, price, category_id, stock)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id)
            DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                price = EXCLUDED.price,
                category_id = EXCLUDED.category_id,
                stock = EXCLUDED.stock,
                updated_at = NOW(),
                version = nextval('product_versions')
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(product.id.get())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.category_id.map(|c| c.get()))
        .bind(product.stock)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_product", e))?;

        Ok(ProductRow::from_row(&row)
            .map_err(|e| map_sqlx_error("upsert_product", e))?
            .into())
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn delete_product(&self, id: ProductId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_product", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

/// `(line_no, quantity)` as bound into `order_items`. Line numbers start at 1.
fn item_columns(index: usize, item: &OrderItem) -> Result<(i32, i64), StoreError> {
    let line_no = index
        .checked_add(1)
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| StoreError::Invalid(format!("order has more than {} lines", i32::MAX)))?;
    Ok((line_no, i64::from(item.quantity)))
}

/// Decide why a conditional decrement matched no row.
async fn classify_missed_update(
    tx: &mut Transaction<'static, Postgres>,
    product_id: ProductId,
) -> Result<StoreError, StoreError> {
    let exists = sqlx::query("SELECT 1 FROM products WHERE id = $1")
        .bind(product_id.get())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("classify_missed_update", e))?
        .is_some();

    Ok(if exists {
        StoreError::Conflict(product_id)
    } else {
        StoreError::NotFound(product_id)
    })
}

fn map_decrement_error(product_id: ProductId, err: sqlx::Error) -> StoreError {
    if is_check_violation(&err) {
        return StoreError::Conflict(product_id);
    }
    map_sqlx_error("decrement_stock", err)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Unavailable(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        other => StoreError::Unavailable(format!("error in {}: {}", operation, other)),
    }
}

fn is_check_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23514";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct ProductRow {
    id: i64,
    name: String,
    description: String,
    price: i64,
    category_id: Option<i64>,
    stock: i64,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            price: row.try_get("price")?,
            category_id: row.try_get("category_id")?,
            stock: row.try_get("stock")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: ProductId::new(row.id),
            name: row.name,
            description: row.description,
            price: row.price,
            category_id: row.category_id.map(CategoryId::new),
            stock: row.stock,
            updated_at: row.updated_at,
            version: row.version,
        }
    }
}
