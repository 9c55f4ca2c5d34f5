//! Periodic full cache reload.
//!
//! The reload is the backstop bounding cache staleness: even if every
//! write-back and repair fails, a full reload every `interval` brings the
//! cache back in line with the store.
//!
//! Only one reload runs at a time. A tick (or manual trigger) that arrives
//! while a reload is still running is skipped, not queued.
//!
//! # Example
//!
//! ```ignore
//! let scheduler = ReloadScheduler::new(repairer, Duration::from_secs(600));
//! tokio::spawn(scheduler.clone().run(shutdown_token));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::StockCache;
use crate::store::ProductStore;
use crate::workers::{CacheRepairTask, RepairReport};

/// Default interval between reloads (10 minutes).
pub const DEFAULT_RELOAD_INTERVAL_SECS: u64 = 600;

/// Clears the in-flight flag when the reload task ends, including by panic.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
pub struct ReloadScheduler<S, C> {
    repairer: CacheRepairTask<S, C>,
    interval: Duration,
    reload_on_start: bool,
    in_flight: Arc<AtomicBool>,
}

impl<S, C> ReloadScheduler<S, C>
where
    S: ProductStore + Clone + 'static,
    C: StockCache + Clone + 'static,
{
    pub fn new(repairer: CacheRepairTask<S, C>, interval: Duration) -> Self {
        Self {
            repairer,
            // tokio::time::interval panics on a zero period.
            interval: interval.max(Duration::from_millis(1)),
            reload_on_start: true,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the first reload fires immediately when `run` starts.
    pub fn with_reload_on_start(mut self, reload_on_start: bool) -> Self {
        self.reload_on_start = reload_on_start;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_reloading(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start a reload now unless one is already running.
    ///
    /// Returns `None` when skipped. The reload runs as its own task; dropping
    /// the handle detaches it.
    pub fn reload_now(&self) -> Option<JoinHandle<RepairReport>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let guard = InFlight(self.in_flight.clone());
        let repairer = self.repairer.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            repairer.reload_all().await
        }))
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            reload_on_start = self.reload_on_start,
            "cache reload scheduler starting"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.reload_on_start {
            // The first tick completes immediately.
            ticker.tick().await;
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("cache reload scheduler shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    match self.reload_now() {
                        Some(_) => debug!("scheduled cache reload started"),
                        None => warn!("previous cache reload still running; skipping tick"),
                    }
                }
            }
        }
    }
}
