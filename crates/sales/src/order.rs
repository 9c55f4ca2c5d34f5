use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockgate_core::{DomainError, DomainResult, OrderId, ProductId, UserId};

/// Order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown order status: {other}"))),
        }
    }
}

/// One line of an order. Immutable once the order is admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Unit price at time of order, in smallest currency unit.
    pub unit_price: i64,
}

impl OrderItem {
    pub fn new(product_id: ProductId, quantity: u32, unit_price: i64) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }
}

/// An order submitted for admission (not yet persisted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub owner: UserId,
    #[serde(default)]
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
}

impl NewOrder {
    pub fn new(owner: UserId, items: Vec<OrderItem>) -> Self {
        Self {
            owner,
            status: OrderStatus::Pending,
            items,
        }
    }

    /// Reject orders that must never reach a store: no items, or a zero-quantity line.
    pub fn validate(&self) -> DomainResult<()> {
        if self.items.is_empty() {
            return Err(DomainError::EmptyOrder);
        }
        if let Some(item) = self.items.iter().find(|i| i.quantity == 0) {
            return Err(DomainError::InvalidQuantity {
                product_id: item.product_id,
            });
        }
        Ok(())
    }

    /// Per-product demand of this order. See [`aggregate_demand`].
    pub fn demand(&self) -> DomainResult<Vec<StockDelta>> {
        aggregate_demand(&self.items)
    }
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: UserId,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Sum of `unit_price * quantity` over all lines.
    pub fn total(&self) -> i64 {
        self.items
            .iter()
            .map(|i| i.unit_price.saturating_mul(i64::from(i.quantity)))
            .fold(0i64, i64::saturating_add)
    }
}

/// Per-product signed stock adjustment computed during reservation.
///
/// Transient: never persisted. Reservations carry negative deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub product_id: ProductId,
    pub delta: i64,
}

impl StockDelta {
    /// A delta taking `quantity` units out of stock.
    pub fn reserve(product_id: ProductId, quantity: u64) -> DomainResult<Self> {
        let delta = i64::try_from(quantity)
            .ok()
            .and_then(i64::checked_neg)
            .ok_or(DomainError::InvalidQuantity { product_id })?;
        Ok(Self { product_id, delta })
    }

    /// Units this delta takes out of stock (zero for restocks).
    pub fn quantity(&self) -> u64 {
        if self.delta < 0 {
            self.delta.unsigned_abs()
        } else {
            0
        }
    }
}

/// Sum quantities per product, preserving the order in which each product first appears.
///
/// Lines referencing the same product combine, so an order cannot slip past
/// the stock check by splitting one demand over several lines. The output
/// order matters: the first offending product reported by an evaluation is
/// the one whose first line has the lowest index.
pub fn aggregate_demand(items: &[OrderItem]) -> DomainResult<Vec<StockDelta>> {
    if items.is_empty() {
        return Err(DomainError::EmptyOrder);
    }

    let mut totals: Vec<(ProductId, u64)> = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity == 0 {
            return Err(DomainError::InvalidQuantity {
                product_id: item.product_id,
            });
        }
        match totals.iter_mut().find(|(id, _)| *id == item.product_id) {
            Some((_, total)) => {
                *total = total
                    .checked_add(u64::from(item.quantity))
                    .ok_or(DomainError::InvalidQuantity {
                        product_id: item.product_id,
                    })?;
            }
            None => totals.push((item.product_id, u64::from(item.quantity))),
        }
    }

    totals
        .into_iter()
        .map(|(product_id, quantity)| StockDelta::reserve(product_id, quantity))
        .collect()
}
