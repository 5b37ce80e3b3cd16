//! Domain error types.

use common::{Money, ProductId};
use thiserror::Error;

use crate::order::OrderStatus;
use crate::payment::{ChargeStatus, PaymentStatus};

/// Errors raised by commands on the [`Order`](crate::Order) aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// An order must contain at least one line.
    #[error("Order has no lines")]
    NoLines,

    /// A line quantity must be positive.
    #[error("Invalid quantity {quantity} for product {product_id} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// The requested status change is not in the transition table.
    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    /// The order has already been cancelled.
    #[error("Order is already cancelled")]
    AlreadyCancelled,

    /// Stock bookkeeping after cancellation needs a cancelled order.
    #[error("Order is {status}, not cancelled")]
    NotCancelled { status: OrderStatus },

    /// A paid order can only be cancelled with an explicit override.
    #[error("Order is paid; cancellation requires an admin override")]
    PaidCancellation,

    /// The stored total does not match the canonical formula.
    #[error("Order total {actual} does not match computed total {expected}")]
    TotalsMismatch { expected: Money, actual: Money },

    /// The subtotal does not match the sum of the line totals.
    #[error("Subtotal {subtotal} does not match line sum {line_sum}")]
    LineSumMismatch { subtotal: Money, line_sum: Money },

    /// Discounts must be non-negative and leave something to pay.
    #[error("Invalid discount {discount}")]
    InvalidDiscount { discount: Money },

    /// Orders must cost something; a zero total cannot be captured.
    #[error("Order total must be greater than 0")]
    ZeroTotal,

    /// Payment can only be captured while both order and payment are pending.
    #[error("Cannot capture payment: order is {status}, payment is {payment_status}")]
    NotCapturable {
        status: OrderStatus,
        payment_status: PaymentStatus,
    },

    /// Refunds need a captured payment.
    #[error("Order payment is {payment_status}; nothing to refund")]
    NotRefundable { payment_status: PaymentStatus },
}

/// Errors raised by transitions on a [`Payment`](crate::Payment) record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// Amounts must be strictly positive.
    #[error("Invalid amount {amount} (must be greater than 0)")]
    InvalidAmount { amount: Money },

    /// The refund would exceed what is left on the capture.
    #[error("Refund of {requested} exceeds refundable balance {remaining}")]
    ExceedsRefundable { requested: Money, remaining: Money },

    /// Only captured payments can be refunded.
    #[error("Payment is {status}; only captured payments can be refunded")]
    NotCaptured { status: ChargeStatus },

    /// The record has already left the pending state.
    #[error("Payment is already {status}")]
    AlreadyResolved { status: ChargeStatus },
}

/// Returned when parsing an unknown status, method or role name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {kind}: {value}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
