use async_trait::async_trait;
use common::{OrderId, PaymentId};
use domain::{Order, Payment};

use crate::{Result, Version};

/// Durable store of payment records.
///
/// Implementations keep idempotency keys and gateway transaction ids unique,
/// and admit at most one captured record per order.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Stores a new record, failing with `DuplicateIdempotencyKey` if the key is taken.
    async fn insert_payment(&self, payment: &Payment) -> Result<()>;

    /// Replaces a stored record.
    async fn update_payment(&self, payment: &Payment) -> Result<()>;

    /// Replaces a record and the order it belongs to in one atomic step.
    ///
    /// Nothing is written if the order is no longer at `order.version()`.
    async fn update_payment_with_order(&self, payment: &Payment, order: &Order) -> Result<Version>;

    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>>;

    /// All records for an order, oldest first.
    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>>;
}
