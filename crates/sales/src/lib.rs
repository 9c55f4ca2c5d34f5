//! Sales domain: orders, their line items, and the stock demand they imply.

pub mod order;

pub use order::{NewOrder, Order, OrderItem, OrderStatus, StockDelta, aggregate_demand};
