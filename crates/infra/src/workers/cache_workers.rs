use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stockgate_core::ProductId;
use stockgate_products::Product;

use crate::cache::StockCache;
use crate::store::ProductStore;

use super::repair::CacheRepairTask;

/// Sizing of the background cache pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub write_back_queue_capacity: usize,
    pub write_back_workers: usize,
    pub repair_queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            write_back_queue_capacity: 1024,
            write_back_workers: 4,
            repair_queue_capacity: 256,
        }
    }
}

/// Submission side of the background cache pipeline.
///
/// Submissions never block: when a queue is full the job is dropped (a full
/// write-back queue degrades into a repair request) and the periodic reload
/// restores the affected entries.
#[derive(Debug, Clone)]
pub struct CacheJobQueue {
    write_back: mpsc::Sender<Vec<Product>>,
    repair: mpsc::Sender<Vec<ProductId>>,
}

impl CacheJobQueue {
    /// Queue committed snapshots for a cache write. Returns `false` if dropped.
    pub fn submit_write_back(&self, products: Vec<Product>) -> bool {
        if products.is_empty() {
            return true;
        }
        match self.write_back.try_send(products) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(products)) => {
                warn!(count = products.len(), "write-back queue full; requesting repair instead");
                self.submit_repair(products.iter().map(|p| p.id).collect());
                false
            }
            Err(mpsc::error::TrySendError::Closed(products)) => {
                debug!(count = products.len(), "write-back queue closed; dropping snapshots");
                false
            }
        }
    }

    /// Queue a repair of `ids`. Returns `false` if dropped.
    pub fn submit_repair(&self, ids: Vec<ProductId>) -> bool {
        if ids.is_empty() {
            return true;
        }
        forward_repair(&self.repair, ids)
    }
}

fn forward_repair(tx: &mpsc::Sender<Vec<ProductId>>, ids: Vec<ProductId>) -> bool {
    match tx.try_send(ids) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(ids)) => {
            warn!(count = ids.len(), "repair queue full; leaving entries to the next reload");
            false
        }
        Err(mpsc::error::TrySendError::Closed(ids)) => {
            debug!(count = ids.len(), "repair queue closed; dropping request");
            false
        }
    }
}

/// Handle to the spawned write-back workers and repair loop.
#[derive(Debug)]
pub struct CacheWorkersHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl CacheWorkersHandle {
    /// Request shutdown and wait until already-queued jobs are drained.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Wait for every task to exit (after the shutdown token is cancelled).
    ///
    /// Write-back workers drain first; the repair loop stops only after them,
    /// so failures found while draining are still repaired.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "cache worker task ended abnormally");
            }
        }
    }
}

/// Bounded pool of cache write-back workers feeding a single repair loop.
#[derive(Debug)]
pub struct CacheWorkers;

impl CacheWorkers {
    /// Spawn the pool on the current tokio runtime.
    pub fn spawn<S, C>(
        repairer: CacheRepairTask<S, C>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> (CacheJobQueue, CacheWorkersHandle)
    where
        S: ProductStore + Clone + 'static,
        C: StockCache + Clone + 'static,
    {
        let (write_back_tx, write_back_rx) = mpsc::channel(config.write_back_queue_capacity.max(1));
        let (repair_tx, repair_rx) = mpsc::channel(config.repair_queue_capacity.max(1));
        let write_back_rx = Arc::new(Mutex::new(write_back_rx));

        let workers = config.write_back_workers.max(1);
        let write_back_tasks: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker| {
                tokio::spawn(write_back_worker(
                    worker,
                    write_back_rx.clone(),
                    repairer.clone(),
                    repair_tx.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        let repair_stop = CancellationToken::new();
        let repair = tokio::spawn(repair_loop(repair_rx, repairer, repair_stop.clone()));
        let supervisor = tokio::spawn(async move {
            for task in write_back_tasks {
                if let Err(err) = task.await {
                    warn!(error = %err, "cache write-back worker ended abnormally");
                }
            }
            repair_stop.cancel();
        });
        let tasks = vec![supervisor, repair];

        info!(workers, "cache workers started");
        (
            CacheJobQueue {
                write_back: write_back_tx,
                repair: repair_tx,
            },
            CacheWorkersHandle { shutdown, tasks },
        )
    }
}

async fn write_back_worker<S, C>(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Vec<Product>>>>,
    repairer: CacheRepairTask<S, C>,
    repair_tx: mpsc::Sender<Vec<ProductId>>,
    shutdown: CancellationToken,
) where
    S: ProductStore,
    C: StockCache,
{
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                job = rx.recv() => job,
                _ = shutdown.cancelled() => {
                    // Stop accepting new jobs; keep draining what is buffered.
                    rx.close();
                    rx.recv().await
                }
            }
        };
        let Some(products) = next else { break };

        let failed = repairer.write_snapshots(&products).await;
        if !failed.is_empty() {
            forward_repair(&repair_tx, failed);
        }
    }
    debug!(worker, "cache write-back worker stopped");
}

async fn repair_loop<S, C>(
    mut rx: mpsc::Receiver<Vec<ProductId>>,
    repairer: CacheRepairTask<S, C>,
    stop: CancellationToken,
) where
    S: ProductStore,
    C: StockCache,
{
    loop {
        let next = tokio::select! {
            biased;
            ids = rx.recv() => ids,
            _ = stop.cancelled() => {
                rx.close();
                rx.recv().await
            }
        };
        let Some(first) = next else { break };

        // Coalesce everything already queued into one pass.
        let mut pending: BTreeSet<ProductId> = first.into_iter().collect();
        while let Ok(more) = rx.try_recv() {
            pending.extend(more);
        }
        let ids: Vec<ProductId> = pending.into_iter().collect();

        let report = repairer.repair(&ids).await;
        if report.is_clean() {
            debug!(requested = report.requested, "cache repair applied");
        } else {
            warn!(
                requested = report.requested,
                failed = report.failed,
                "cache repair incomplete; next reload will retry"
            );
        }
    }
    debug!("cache repair loop stopped");
}
