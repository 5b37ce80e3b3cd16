//! Order domain events.

use chrono::{DateTime, Utc};
use common::{Money, PaymentId, ProductId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::OrderStatus;

/// Changes recorded against a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Status moved along the shipping line, or to refunded.
    StatusChanged(StatusChangedData),

    /// Order was cancelled; its stock is due for release.
    OrderCancelled(OrderCancelledData),

    /// Payment for the order was captured.
    PaymentCaptured(PaymentCapturedData),

    /// Part or all of the captured payment was refunded.
    PaymentRefunded(PaymentRefundedData),

    /// Stock for these products could not be returned after cancellation.
    ReleaseFailed(StockReleaseData),

    /// Outstanding releases were taken up for another attempt.
    ReleaseRetried(StockReleaseData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::StatusChanged(_) => "StatusChanged",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
            OrderEvent::PaymentCaptured(_) => "PaymentCaptured",
            OrderEvent::PaymentRefunded(_) => "PaymentRefunded",
            OrderEvent::ReleaseFailed(_) => "ReleaseFailed",
            OrderEvent::ReleaseRetried(_) => "ReleaseRetried",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangedData {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub from: OrderStatus,
    pub reason: Option<String>,
    /// True when a paid order was cancelled by an admin override.
    pub overridden: bool,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCapturedData {
    pub payment_id: PaymentId,
    pub amount: Money,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRefundedData {
    pub payment_id: PaymentId,
    pub amount: Money,
    pub fully_refunded: bool,
    pub refunded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleaseData {
    pub product_ids: Vec<ProductId>,
    pub at: DateTime<Utc>,
}

// Factory methods
impl OrderEvent {
    pub fn status_changed(from: OrderStatus, to: OrderStatus) -> Self {
        OrderEvent::StatusChanged(StatusChangedData {
            from,
            to,
            changed_at: Utc::now(),
        })
    }

    pub fn order_cancelled(from: OrderStatus, reason: Option<String>, overridden: bool) -> Self {
        OrderEvent::OrderCancelled(OrderCancelledData {
            from,
            reason,
            overridden,
            cancelled_at: Utc::now(),
        })
    }

    pub fn payment_captured(payment_id: PaymentId, amount: Money) -> Self {
        OrderEvent::PaymentCaptured(PaymentCapturedData {
            payment_id,
            amount,
            captured_at: Utc::now(),
        })
    }

    pub fn payment_refunded(payment_id: PaymentId, amount: Money, fully_refunded: bool) -> Self {
        OrderEvent::PaymentRefunded(PaymentRefundedData {
            payment_id,
            amount,
            fully_refunded,
            refunded_at: Utc::now(),
        })
    }

    pub fn release_failed(product_ids: Vec<ProductId>) -> Self {
        OrderEvent::ReleaseFailed(StockReleaseData {
            product_ids,
            at: Utc::now(),
        })
    }

    pub fn release_retried(product_ids: Vec<ProductId>) -> Self {
        OrderEvent::ReleaseRetried(StockReleaseData {
            product_ids,
            at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        let event = OrderEvent::status_changed(OrderStatus::Pending, OrderStatus::Processing);
        assert_eq!(event.event_type(), "StatusChanged");

        let event = OrderEvent::order_cancelled(OrderStatus::Pending, None, false);
        assert_eq!(event.event_type(), "OrderCancelled");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = OrderEvent::payment_captured(PaymentId::new(), Money::from_cents(500));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "PaymentCaptured");
        assert_eq!(json["data"]["amount"], 500);

        let back: OrderEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
