use chrono::{DateTime, Utc};
use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

use crate::catalog::{Product, ProductSnapshot};

/// An immutable line of a placed order.
///
/// The unit price and product description are copied from the catalog when
/// the order is placed, so later catalog edits never change the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    line_no: u32,
    product_id: ProductId,
    quantity: u32,
    unit_price: Money,
    line_total: Money,
    snapshot: ProductSnapshot,
}

impl OrderLine {
    /// Builds line `line_no` from the current catalog row.
    pub fn from_product(
        line_no: u32,
        product: &Product,
        quantity: u32,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            line_no,
            product_id: product.id.clone(),
            quantity,
            unit_price: product.unit_price,
            line_total: product.unit_price.multiply(quantity),
            snapshot: product.snapshot(captured_at),
        }
    }

    pub fn line_no(&self) -> u32 {
        self.line_no
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Unit price at the time the order was placed.
    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    /// `unit_price × quantity`.
    pub fn line_total(&self) -> Money {
        self.line_total
    }

    pub fn snapshot(&self) -> &ProductSnapshot {
        &self.snapshot
    }
}
