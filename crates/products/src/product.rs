use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockgate_core::{CategoryId, Entity, ProductId};

/// A product row.
///
/// The authoritative store owns the live instance. The stock cache only ever
/// holds a serialized *copy* of one, taken at some point in time; `stock` is
/// the only field the admission path mutates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Price in smallest currency unit (e.g., cents).
    pub price: i64,
    pub category_id: Option<CategoryId>,
    /// Units on hand. Never negative once committed.
    pub stock: i64,
    pub updated_at: DateTime<Utc>,
    /// Store-assigned revision. Every write to any row takes a value higher
    /// than all earlier ones, so two snapshots of one product order by it.
    #[serde(default)]
    pub version: i64,
}

impl Product {
    pub fn new(id: ProductId, name: impl Into<String>, price: i64, stock: i64) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            price,
            category_id: None,
            stock,
            updated_at: Utc::now(),
            version: 0,
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// True when `self` was written to the store before `other`.
    pub fn is_older_than(&self, other: &Product) -> bool {
        self.version < other.version
    }

    pub fn with_category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Stock left after taking `quantity` units, or `None` when that would go negative.
    pub fn stock_after(&self, quantity: u64) -> Option<i64> {
        let quantity = i64::try_from(quantity).ok()?;
        let remaining = self.stock.checked_sub(quantity)?;
        (remaining >= 0).then_some(remaining)
    }

    pub fn can_fulfil(&self, quantity: u64) -> bool {
        self.stock_after(quantity).is_some()
    }

    /// Copy of this row with `stock` replaced, stamped with `at`.
    pub fn with_stock(&self, stock: i64, at: DateTime<Utc>) -> Self {
        Self {
            stock,
            updated_at: at,
            ..self.clone()
        }
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> ProductId {
        self.id
    }
}
