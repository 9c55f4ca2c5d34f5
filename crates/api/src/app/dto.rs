use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockgate_core::{CategoryId, DomainError, OrderId, ProductId, UserId};
use stockgate_products::Product;
use stockgate_sales::{NewOrder, Order, OrderItem, OrderStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: ProductId,
    /// Signed so that negative input is reported as an invalid quantity.
    pub quantity: i64,
    /// Unit price in smallest currency unit.
    pub price: i64,
}

/// Body ids bypass `FromStr`, so the same lower bound is applied here.
fn require_positive<T: Copy + Into<i64>>(id: T, name: &str) -> Result<T, DomainError> {
    let value: i64 = id.into();
    if value <= 0 {
        return Err(DomainError::invalid_id(format!(
            "{name}: must be positive, got {value}"
        )));
    }
    Ok(id)
}

impl CreateOrderRequest {
    pub fn into_new_order(self) -> Result<NewOrder, DomainError> {
        let owner = require_positive(self.user_id, "user_id")?;
        let items = self
            .items
            .into_iter()
            .map(|item| {
                require_positive(item.product_id, "product_id")?;
                let quantity = u32::try_from(item.quantity).map_err(|_| {
                    DomainError::InvalidQuantity {
                        product_id: item.product_id,
                    }
                })?;
                Ok(OrderItem::new(item.product_id, quantity, item.price))
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        let mut order = NewOrder::new(owner, items);
        if let Some(status) = self.status {
            order.status = status;
        }
        Ok(order)
    }
}

#[derive(Debug, Deserialize)]
pub struct SaveProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: i64,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    pub stock: i64,
}

impl SaveProductRequest {
    pub fn into_product(self, id: ProductId) -> Result<Product, DomainError> {
        let category_id = self
            .category_id
            .map(|c| require_positive(c, "category_id"))
            .transpose()?;
        let mut product = Product::new(id, self.name, self.price, self.stock)
            .with_description(self.description);
        product.category_id = category_id;
        Ok(product)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct CreatedOrderResponse {
    pub id: OrderId,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub items: Vec<OrderItemResponse>,
    pub total: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            total: order.total(),
            id: order.id,
            user_id: order.owner,
            status: order.status,
            created_at: order.created_at,
            items: order
                .items
                .into_iter()
                .map(|i| OrderItemResponse {
                    product_id: i.product_id,
                    quantity: i.quantity,
                    price: i.unit_price,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReloadAcceptedResponse {
    pub status: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(quantity: i64) -> CreateOrderRequest {
        serde_json::from_value(serde_json::json!({
            "user_id": 3,
            "items": [{ "product_id": 1, "quantity": quantity, "price": 250 }]
        }))
        .unwrap()
    }

    #[test]
    fn request_maps_to_pending_order() {
        let order = request(2).into_new_order().unwrap();
        assert_eq!(order.owner, UserId::new(3));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.items[0].quantity, 2);
        assert_eq!(order.items[0].unit_price, 250);
    }

    #[test]
    fn non_positive_ids_are_rejected() {
        let zero_product: CreateOrderRequest = serde_json::from_value(serde_json::json!({
            "user_id": 3,
            "items": [{ "product_id": 0, "quantity": 1, "price": 250 }]
        }))
        .unwrap();
        assert!(matches!(
            zero_product.into_new_order(),
            Err(DomainError::InvalidId(_))
        ));

        let negative_user: CreateOrderRequest = serde_json::from_value(serde_json::json!({
            "user_id": -1,
            "items": [{ "product_id": 1, "quantity": 1, "price": 250 }]
        }))
        .unwrap();
        assert!(matches!(
            negative_user.into_new_order(),
            Err(DomainError::InvalidId(_))
        ));
    }

    #[test]
    fn non_positive_category_is_rejected() {
        let body: SaveProductRequest = serde_json::from_value(serde_json::json!({
            "name": "widget",
            "price": 100,
            "stock": 1,
            "category_id": 0
        }))
        .unwrap();
        assert!(matches!(
            body.into_product(ProductId::new(1)),
            Err(DomainError::InvalidId(_))
        ));
    }

    #[test]
    fn negative_quantity_is_invalid() {
        assert_eq!(
            request(-1).into_new_order().unwrap_err(),
            DomainError::InvalidQuantity {
                product_id: ProductId::new(1)
            }
        );
    }
}
