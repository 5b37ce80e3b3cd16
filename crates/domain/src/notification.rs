use serde::{Deserialize, Serialize};

use crate::order::{OrderEvent, OrderStatus};

/// What a customer notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCreated,
    OrderStatusChanged { old: OrderStatus, new: OrderStatus },
    OrderCancelled,
    PaymentCaptured,
    PaymentRefunded,
}

impl NotificationKind {
    /// The notification announcing `event`, if customers hear about it.
    pub fn for_event(event: &OrderEvent) -> Option<Self> {
        let kind = match event {
            OrderEvent::StatusChanged(data) => NotificationKind::OrderStatusChanged {
                old: data.from,
                new: data.to,
            },
            OrderEvent::OrderCancelled(_) => NotificationKind::OrderCancelled,
            OrderEvent::PaymentCaptured(_) => NotificationKind::PaymentCaptured,
            OrderEvent::PaymentRefunded(_) => NotificationKind::PaymentRefunded,
            OrderEvent::ReleaseFailed(_) | OrderEvent::ReleaseRetried(_) => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderCreated => "order_created",
            NotificationKind::OrderStatusChanged { .. } => "order_status_changed",
            NotificationKind::OrderCancelled => "order_cancelled",
            NotificationKind::PaymentCaptured => "payment_captured",
            NotificationKind::PaymentRefunded => "payment_refunded",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
