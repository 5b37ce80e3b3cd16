use common::{OrderId, PaymentId, ProductId};
use thiserror::Error;

use crate::Version;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The conditional decrement found less stock than requested.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// An order with this id was already stored.
    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// The order number is taken by another order.
    #[error("Order number already in use: {0}")]
    DuplicateOrderNumber(String),

    /// The order was updated by someone else since it was loaded.
    #[error(
        "Concurrency conflict for order {order_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    /// A payment record with this idempotency key already exists.
    #[error("Duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    /// Another payment record already carries this gateway transaction id.
    #[error("Duplicate gateway transaction id: {0}")]
    DuplicateTransaction(String),

    /// The order already has a captured payment.
    #[error("Order {order_id} already has captured payment {existing}")]
    CaptureExists {
        order_id: OrderId,
        existing: PaymentId,
    },

    /// The backing store refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
