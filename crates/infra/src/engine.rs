use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admission::OrderAdmission;
use crate::cache::StockCache;
use crate::catalog::ProductCatalog;
use crate::config::EngineConfig;
use crate::scheduler::ReloadScheduler;
use crate::store::ProductStore;
use crate::workers::{CacheJobQueue, CacheRepairTask, CacheWorkers, CacheWorkersHandle};

/// A running admission engine: the front-door services plus their
/// background cache pipeline and reload timer.
#[derive(Debug)]
pub struct Engine<S, C> {
    pub admission: OrderAdmission<S, C>,
    pub catalog: ProductCatalog<S, C>,
    pub scheduler: ReloadScheduler<S, C>,
    pub repairer: CacheRepairTask<S, C>,
    pub jobs: CacheJobQueue,
    background: Background,
}

#[derive(Debug)]
struct Background {
    shutdown: CancellationToken,
    workers: CacheWorkersHandle,
    scheduler: JoinHandle<()>,
}

impl<S, C> Engine<S, C>
where
    S: ProductStore + Clone + 'static,
    C: StockCache + Clone + 'static,
{
    /// Wire the engine and spawn its background tasks on the current runtime.
    ///
    /// Everything stops when `shutdown` is cancelled.
    pub fn start(store: S, cache: C, config: &EngineConfig, shutdown: CancellationToken) -> Self {
        let repairer = CacheRepairTask::new(
            store.clone(),
            cache.clone(),
            config.cache_ttl,
            config.store_timeout,
        );
        let (jobs, workers) = CacheWorkers::spawn(repairer.clone(), config.workers, shutdown.clone());

        let scheduler = ReloadScheduler::new(repairer.clone(), config.reload_interval)
            .with_reload_on_start(config.reload_on_start);
        let scheduler_task = tokio::spawn(scheduler.clone().run(shutdown.clone()));

        info!(
            cache_ttl_secs = config.cache_ttl.as_secs(),
            reload_interval_secs = config.reload_interval.as_secs(),
            store_timeout_ms = config.store_timeout.as_millis() as u64,
            "admission engine started"
        );

        Self {
            admission: OrderAdmission::new(store.clone(), cache.clone(), jobs.clone(), config.store_timeout),
            catalog: ProductCatalog::new(store, cache, jobs.clone(), config.store_timeout),
            scheduler,
            repairer,
            jobs,
            background: Background {
                shutdown,
                workers,
                scheduler: scheduler_task,
            },
        }
    }

    /// Stop the timer and drain queued cache jobs.
    ///
    /// A reload already in flight is left to finish or be abandoned with the runtime.
    pub async fn shutdown(self) {
        let Background {
            shutdown,
            workers,
            scheduler,
        } = self.background;
        shutdown.cancel();
        if let Err(err) = scheduler.await {
            warn!(error = %err, "reload scheduler ended abnormally");
        }
        workers.join().await;
        info!("admission engine stopped");
    }
}
