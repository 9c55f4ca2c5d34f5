//! Background cache maintenance: write-back workers, the repair loop and
//! the repair pass they share.

pub mod cache_workers;
pub mod repair;

pub use cache_workers::{CacheJobQueue, CacheWorkers, CacheWorkersHandle, WorkerConfig};
pub use repair::{CacheRepairTask, RepairReport};
