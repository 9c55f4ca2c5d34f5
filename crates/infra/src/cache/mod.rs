//! Best-effort stock cache.
//!
//! The cache mirrors product rows for fast admission pre-checks. It is never
//! the source of truth: every decision it informs is re-checked against the
//! store at commit time.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod r#trait;

pub use in_memory::InMemoryStockCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisStockCache;
pub use r#trait::{CacheError, StockCache};
