//! Domain error model.

use thiserror::Error;

use crate::id::ProductId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// These are the reasons an order can be rejected. Every variant names a
/// specific cause so callers can tell "not found" from "out of stock" from
/// "try again later". Cache failures never appear here; they degrade
/// freshness, not availability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The order carried no line items.
    #[error("order has no items")]
    EmptyOrder,

    /// A line item requested zero units (or the aggregated quantity overflowed).
    #[error("invalid quantity for product {product_id}")]
    InvalidQuantity { product_id: ProductId },

    /// A referenced product does not exist in the authoritative store.
    #[error("product {product_id} not found")]
    ProductNotFound { product_id: ProductId },

    /// Fulfilling the order would drive the product's stock below zero.
    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: ProductId },

    /// The authoritative store failed or timed out; nothing was committed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn not_found(product_id: ProductId) -> Self {
        Self::ProductNotFound { product_id }
    }

    pub fn insufficient_stock(product_id: ProductId) -> Self {
        Self::InsufficientStock { product_id }
    }

    /// True for failures that may succeed on retry without any change to the order.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}
