//! Authoritative product/order store.
//!
//! Two implementations are provided:
//! - [`InMemoryProductStore`] for tests and local development
//! - [`PostgresProductStore`] for production

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryProductStore;
pub use postgres::PostgresProductStore;
pub use r#trait::{CommittedOrder, ProductStore, StoreError, with_timeout};
