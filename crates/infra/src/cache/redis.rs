//! Redis-backed stock cache.
//!
//! ## Layout
//!
//! - **Key**: `<namespace>:<product id>` (one string per product)
//! - **Value**: JSON-serialized [`Product`] snapshot
//! - **Expiry**: `SET .. EX <ttl>` per key, so every entry ages independently
//!
//! Batch writes are issued as concurrent per-key script calls over a
//! multiplexed [`ConnectionManager`]; a failure on one key does not affect the
//! others and is reported through [`CacheError::PartialWrite`]. The script
//! compares the incoming snapshot's `version` with the stored one and leaves
//! a newer entry in place, all inside one server-side step.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{self, BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use tracing::{debug, instrument, warn};

use stockgate_core::ProductId;
use stockgate_products::Product;

use super::r#trait::{CacheError, StockCache};

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "products";

/// Keys requested per `SCAN` round trip.
const SCAN_BATCH: usize = 200;

/// KEYS[1] = entry key; ARGV = payload, version, ttl seconds.
/// Returns 1 when written, 0 when a newer snapshot is already cached.
const SET_UNLESS_NEWER: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
  local ok, decoded = pcall(cjson.decode, current)
  if ok and type(decoded) == 'table' and (tonumber(decoded['version']) or 0) > tonumber(ARGV[2]) then
    return 0
  end
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
return 1
"#;

#[derive(Clone)]
pub struct RedisStockCache {
    conn: ConnectionManager,
    namespace: String,
    set_unless_newer: redis::Script,
}

impl std::fmt::Debug for RedisStockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStockCache")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl RedisStockCache {
    /// Connect to `redis_url` and use `namespace` as the key prefix.
    pub async fn connect(
        redis_url: impl AsRef<str>,
        namespace: impl Into<String>,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Self {
            conn,
            namespace: namespace.into(),
            set_unless_newer: redis::Script::new(SET_UNLESS_NEWER),
        })
    }

    fn key(&self, id: ProductId) -> String {
        format!("{}:{}", self.namespace, id)
    }
}

#[async_trait]
impl StockCache for RedisStockCache {
    #[instrument(skip(self), fields(product_id = %id))]
    async fn get(&self, id: ProductId) -> Result<Option<Product>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;

        raw.map(|json| decode(&json)).transpose()
    }

    #[instrument(skip(self, products), fields(count = products.len(), ttl_secs = ttl.as_secs()))]
    async fn set_many(&self, products: &[Product], ttl: Duration) -> Result<(), CacheError> {
        // EX 0 is rejected by Redis.
        let ttl_secs = ttl.as_secs().max(1);
        let script = &self.set_unless_newer;

        let writes = products.iter().map(|p| {
            let mut conn = self.conn.clone();
            let key = self.key(p.id);
            async move {
                let payload = serde_json::to_string(p)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                let written: i64 = script
                    .key(&key)
                    .arg(payload)
                    .arg(p.version)
                    .arg(ttl_secs)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| CacheError::Command(e.to_string()))?;
                if written == 0 {
                    debug!(product_id = %p.id, version = p.version, "newer snapshot already cached");
                }
                Ok::<_, CacheError>(())
            }
        });

        let failed: Vec<ProductId> = join_all(writes)
            .await
            .into_iter()
            .zip(products)
            .filter_map(|(res, p)| match res {
                Ok(()) => None,
                Err(err) => {
                    warn!(product_id = %p.id, error = %err, "cache write failed");
                    Some(p.id)
                }
            })
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(CacheError::PartialWrite { failed })
        }
    }

    #[instrument(skip(self), fields(product_id = %id))]
    async fn remove(&self, id: ProductId) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;
        Ok(())
    }

    fn enumerate(&self) -> BoxStream<'static, Result<Product, CacheError>> {
        let pattern = format!("{}:*", self.namespace);
        let conn = self.conn.clone();

        // State: connection plus the next SCAN cursor; `None` once the walk wraps to 0.
        stream::unfold((conn, Some(0u64)), move |(mut conn, cursor)| {
            let pattern = pattern.clone();
            async move {
                let cursor = cursor?;
                let scanned: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await;

                let (next, keys) = match scanned {
                    Ok(v) => v,
                    Err(e) => {
                        return Some((vec![Err(CacheError::Command(e.to_string()))], (conn, None)));
                    }
                };
                let next_cursor = (next != 0).then_some(next);

                if keys.is_empty() {
                    return Some((Vec::new(), (conn, next_cursor)));
                }

                let values: Result<Vec<Option<String>>, _> =
                    redis::cmd("MGET").arg(&keys).query_async(&mut conn).await;

                let batch = match values {
                    // Keys that expired between SCAN and MGET come back as nil.
                    Ok(values) => values.into_iter().flatten().map(|v| decode(&v)).collect(),
                    Err(e) => vec![Err(CacheError::Command(e.to_string()))],
                };
                debug!(cursor, keys = keys.len(), "scanned cache batch");
                Some((batch, (conn, next_cursor)))
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }
}

fn decode(json: &str) -> Result<Product, CacheError> {
    serde_json::from_str(json).map_err(|e| CacheError::Serialization(e.to_string()))
}
