//! Product catalog domain: the rows whose `stock` the admission path guards.

pub mod product;

pub use product::Product;
