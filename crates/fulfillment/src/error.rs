//! Engine error types.

use common::{Money, OrderId, PaymentId, ProductId, UserId};
use domain::{OrderError, OrderStatus, PaymentError, PaymentStatus};
use store::StoreError;
use thiserror::Error;

/// How an error should be handled by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input or a request the current state does not allow. Never retried.
    Validation,
    /// Lost a race for a shared resource. The caller may retry with new input.
    Contention,
    /// A collaborator did not answer in time. Reconcile before retrying.
    Transient,
    /// The engine's own guarantees were violated.
    Invariant,
    /// Storage or another dependency failed.
    Infrastructure,
}

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Product is not available for ordering: {0}")]
    ProductUnavailable(ProductId),

    #[error("Account {0} cannot place orders")]
    AccountInactive(UserId),

    #[error("{actor} is not allowed to {action}")]
    Forbidden { actor: String, action: &'static str },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order is already cancelled")]
    AlreadyCancelled,

    /// Capture attempted while the order or its payment is not pending.
    #[error("Invalid state: order is {status}, payment is {payment_status}")]
    InvalidState {
        status: OrderStatus,
        payment_status: PaymentStatus,
    },

    #[error("Order is not refundable: payment is {payment_status}")]
    NotRefundable { payment_status: PaymentStatus },

    /// Documents are only produced for orders whose payment has settled.
    #[error("Order {0} is not finalized")]
    NotFinalized(OrderId),

    #[error(transparent)]
    Order(OrderError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Another writer kept winning the optimistic version check.
    #[error("Order {0} was modified concurrently")]
    ConcurrentModification(OrderId),

    #[error("Payment declined: {reason}")]
    PaymentDeclined { payment_id: PaymentId, reason: String },

    #[error("Refund declined: {reason}")]
    RefundDeclined { payment_id: PaymentId, reason: String },

    /// The gateway did not confirm the capture either way; reconcile first.
    #[error("Outcome of payment {payment_id} is unknown; reconcile before retrying")]
    PaymentOutcomeUnknown { payment_id: PaymentId },

    /// The gateway did not confirm the refund; nothing was recorded.
    #[error("Outcome of refund on payment {payment_id} is unknown")]
    RefundOutcomeUnknown { payment_id: PaymentId, amount: Money },

    #[error("Could not find a free order number after {attempts} attempts")]
    OrderNumberExhausted { attempts: u32 },

    /// Stock was not returned for some lines of a cancelled order.
    #[error("Cancelled order {order_id} did not release stock for {unreleased:?}")]
    ReleaseIncomplete {
        order_id: OrderId,
        unreleased: Vec<ProductId>,
    },

    /// The refund went through and is recorded, but cancelling the order
    /// afterwards did not.
    #[error("Refund on payment {payment_id} recorded; order cancellation failed: {cause}")]
    RefundedNotCancelled {
        payment_id: PaymentId,
        cause: Box<FulfillmentError>,
    },

    /// Rolling back reservations after a failed order creation failed too.
    #[error("Compensation failed for {unreleased:?} after: {cause}")]
    CompensationFailed {
        cause: Box<FulfillmentError>,
        unreleased: Vec<ProductId>,
    },

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Invoice rendering failed: {0}")]
    Invoice(String),

    #[error("Account lookup failed: {0}")]
    Accounts(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl FulfillmentError {
    /// Classifies the error.
    pub fn class(&self) -> ErrorClass {
        use FulfillmentError::*;

        match self {
            EmptyCart
            | InvalidQuantity { .. }
            | ProductNotFound(_)
            | ProductUnavailable(_)
            | AccountInactive(_)
            | Forbidden { .. }
            | OrderNotFound(_)
            | IllegalTransition { .. }
            | AlreadyCancelled
            | InvalidState { .. }
            | NotRefundable { .. }
            | NotFinalized(_)
            | PaymentDeclined { .. }
            | RefundDeclined { .. } => ErrorClass::Validation,
            Order(e) => match e {
                OrderError::TotalsMismatch { .. } | OrderError::LineSumMismatch { .. } => {
                    ErrorClass::Invariant
                }
                _ => ErrorClass::Validation,
            },
            Payment(e) => match e {
                PaymentError::AlreadyResolved { .. } => ErrorClass::Invariant,
                _ => ErrorClass::Validation,
            },
            InsufficientStock { .. } | ConcurrentModification(_) => ErrorClass::Contention,
            PaymentOutcomeUnknown { .. }
            | RefundOutcomeUnknown { .. }
            | OrderNumberExhausted { .. } => ErrorClass::Transient,
            ReleaseIncomplete { .. } | CompensationFailed { .. } | Invariant(_) => {
                ErrorClass::Invariant
            }
            RefundedNotCancelled { cause, .. } => cause.class(),
            Gateway(_) | Invoice(_) | Accounts(_) | Store(_) => ErrorClass::Infrastructure,
        }
    }

    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        use FulfillmentError::*;

        match self {
            EmptyCart => "empty_cart",
            InvalidQuantity { .. } => "invalid_quantity",
            ProductNotFound(_) => "product_not_found",
            ProductUnavailable(_) => "product_unavailable",
            AccountInactive(_) => "account_inactive",
            Forbidden { .. } => "forbidden",
            InsufficientStock { .. } => "insufficient_stock",
            OrderNumberExhausted { .. } => "order_number_exhausted",
            CompensationFailed { .. } => "compensation_failed",
            Store(_) => "store",
            _ => "other",
        }
    }

    pub(crate) fn forbidden(actor: &domain::Actor, action: &'static str) -> Self {
        FulfillmentError::Forbidden {
            actor: actor.to_string(),
            action,
        }
    }
}

impl From<OrderError> for FulfillmentError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::NoLines => FulfillmentError::EmptyCart,
            OrderError::InvalidQuantity {
                product_id,
                quantity,
            } => FulfillmentError::InvalidQuantity {
                product_id,
                quantity,
            },
            OrderError::IllegalTransition { from, to } => {
                FulfillmentError::IllegalTransition { from, to }
            }
            OrderError::AlreadyCancelled => FulfillmentError::AlreadyCancelled,
            OrderError::NotCapturable {
                status,
                payment_status,
            } => FulfillmentError::InvalidState {
                status,
                payment_status,
            },
            OrderError::NotRefundable { payment_status } => {
                FulfillmentError::NotRefundable { payment_status }
            }
            other => FulfillmentError::Order(other),
        }
    }
}

impl From<StoreError> for FulfillmentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientStock {
                product_id,
                requested,
                available,
            } => FulfillmentError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            StoreError::ProductNotFound(id) => FulfillmentError::ProductNotFound(id),
            StoreError::OrderNotFound(id) => FulfillmentError::OrderNotFound(id.to_string()),
            StoreError::ConcurrencyConflict { order_id, .. } => {
                FulfillmentError::ConcurrentModification(order_id)
            }
            other => FulfillmentError::Store(other),
        }
    }
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
