//! Catalog rows as seen by the order engine.

use chrono::{DateTime, Utc};
use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

/// A sellable product.
///
/// `stock` is owned by the inventory ledger; the engine never edits it on
/// a `Product` value directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub unit_price: Money,
    pub stock: u32,
    /// Inactive products stay in the catalog for historical orders but cannot be ordered.
    pub active: bool,
}

impl Product {
    /// Creates an active product.
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, unit_price: Money, stock: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            unit_price,
            stock,
            active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    /// Captures the descriptive fields of this product at `captured_at`.
    pub fn snapshot(&self, captured_at: DateTime<Utc>) -> ProductSnapshot {
        ProductSnapshot {
            sku: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            captured_at,
        }
    }
}

/// Descriptive product data frozen into an order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub sku: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub captured_at: DateTime<Utc>,
}
