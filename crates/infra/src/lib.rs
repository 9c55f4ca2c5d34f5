//! Infrastructure layer: authoritative store, stock cache, order admission
//! and background cache maintenance.

pub mod admission;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod scheduler;
pub mod store;
pub mod workers;

#[cfg(test)]
mod test_support;

pub use admission::{OrderAdmission, Reservation, ReservationEvaluator, ReservationSource};
pub use cache::{CacheError, InMemoryStockCache, StockCache};
pub use catalog::ProductCatalog;
pub use config::EngineConfig;
pub use engine::Engine;
pub use scheduler::ReloadScheduler;
pub use store::{CommittedOrder, InMemoryProductStore, PostgresProductStore, ProductStore, StoreError};
pub use workers::{CacheJobQueue, CacheRepairTask, RepairReport, WorkerConfig};
