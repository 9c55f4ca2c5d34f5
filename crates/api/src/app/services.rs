use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use stockgate_infra::{
    Engine, EngineConfig, InMemoryProductStore, InMemoryStockCache, PostgresProductStore,
    ProductStore, StockCache,
};
use stockgate_products::Product;

use crate::config::ServerConfig;

pub type DynStore = Arc<dyn ProductStore>;
pub type DynCache = Arc<dyn StockCache>;

/// Services shared by every handler.
pub struct AppServices {
    pub engine: Engine<DynStore, DynCache>,
    shutdown: CancellationToken,
}

impl AppServices {
    /// Wire the engine over the given backends and start its background tasks.
    pub fn start(store: DynStore, cache: DynCache, config: &EngineConfig) -> Self {
        let shutdown = CancellationToken::new();
        let engine = Engine::start(store, cache, config, shutdown.clone());
        Self { engine, shutdown }
    }

    /// In-memory backends, optionally seeded (dev + tests).
    pub fn in_memory(config: &EngineConfig, seed: Vec<Product>) -> Self {
        let store: DynStore = Arc::new(InMemoryProductStore::with_products(seed));
        let cache: DynCache = Arc::new(InMemoryStockCache::new());
        Self::start(store, cache, config)
    }

    /// Token observed by every background task.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop background tasks and drain queued cache jobs.
    pub async fn shutdown(self) {
        self.engine.shutdown().await;
    }
}

/// Store backend chosen from process configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    InMemory,
}

/// Cache backend chosen from process configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    InMemory,
}

/// Pick each backend independently.
///
/// `DATABASE_URL` alone selects Postgres. `REDIS_URL` selects Redis only in
/// builds with the `redis` feature; otherwise the cache stays in memory.
pub fn select_backends(server: &ServerConfig) -> (StoreBackend, CacheBackend) {
    let store = if server.database_url.is_some() {
        StoreBackend::Postgres
    } else {
        StoreBackend::InMemory
    };
    let cache = if server.redis_url.is_some() && cfg!(feature = "redis") {
        CacheBackend::Redis
    } else {
        CacheBackend::InMemory
    };
    (store, cache)
}

/// Build services from process configuration.
pub async fn build_services(
    server: &ServerConfig,
    engine: &EngineConfig,
) -> anyhow::Result<AppServices> {
    let (store_backend, cache_backend) = select_backends(server);
    if server.redis_url.is_some() && cache_backend == CacheBackend::InMemory {
        tracing::warn!("REDIS_URL set but built without the redis feature; using in-memory cache");
    }

    let store: DynStore = match (store_backend, &server.database_url) {
        (StoreBackend::Postgres, Some(database_url)) => {
            let store = PostgresProductStore::connect(database_url, 10)
                .await?
                .with_statement_timeout(engine.store_timeout);
            store.migrate().await?;
            Arc::new(store)
        }
        _ => Arc::new(InMemoryProductStore::new()),
    };
    let cache = connect_cache(cache_backend, server, engine).await?;

    tracing::info!(store = ?store_backend, cache = ?cache_backend, "backends selected");
    Ok(AppServices::start(store, cache, engine))
}

#[cfg(feature = "redis")]
async fn connect_cache(
    backend: CacheBackend,
    server: &ServerConfig,
    engine: &EngineConfig,
) -> anyhow::Result<DynCache> {
    use stockgate_infra::cache::RedisStockCache;

    match (backend, &server.redis_url) {
        (CacheBackend::Redis, Some(redis_url)) => Ok(Arc::new(
            RedisStockCache::connect(redis_url, engine.cache_namespace.clone()).await?,
        )),
        _ => Ok(Arc::new(InMemoryStockCache::new())),
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_cache(
    _backend: CacheBackend,
    _server: &ServerConfig,
    _engine: &EngineConfig,
) -> anyhow::Result<DynCache> {
    Ok(Arc::new(InMemoryStockCache::new()))
}
