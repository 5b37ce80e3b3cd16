use async_trait::async_trait;
use common::ProductId;
use domain::Product;

use crate::Result;

/// A successful stock decrement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Stock left after the decrement.
    pub remaining: u32,
}

/// Per-product stock counters.
///
/// This is the only writer of `Product.stock`. Implementations must make
/// [`InventoryLedger::try_reserve`] a single indivisible check-and-decrement,
/// so concurrent callers can never drive stock below zero.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Decrements stock by `quantity` if at least that much is available.
    ///
    /// Fails with `InsufficientStock` and leaves stock untouched otherwise.
    async fn try_reserve(&self, product_id: &ProductId, quantity: u32) -> Result<Reservation>;

    /// Returns `quantity` units to stock.
    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<()>;

    /// Current stock for a product.
    async fn stock(&self, product_id: &ProductId) -> Result<u32>;
}

/// Read access to catalog rows, plus seeding.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Looks up a product, including its current stock.
    async fn product(&self, product_id: &ProductId) -> Result<Option<Product>>;

    /// Inserts or replaces a product row.
    async fn upsert_product(&self, product: &Product) -> Result<()>;
}
