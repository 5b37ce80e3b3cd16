//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, Version};
use crate::error::OrderError;
use crate::payment::{PaymentMethod, PaymentStatus};

use super::{
    OrderEvent, OrderLine, OrderStatus, OrderTotals, PricingPolicy, ShippingInfo,
    events::{
        OrderCancelledData, PaymentCapturedData, PaymentRefundedData, StatusChangedData,
        StockReleaseData,
    },
};

/// Everything needed to place an order once its stock is reserved.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
    pub discount: Money,
    pub pricing: PricingPolicy,
    pub placed_at: DateTime<Utc>,
}

/// Lifecycle timestamps. Each one is written at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTimestamps {
    pub created_at: DateTime<Utc>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl OrderTimestamps {
    fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
            refunded_at: None,
        }
    }

    /// Records entering `status` at `at`, keeping any earlier value.
    fn mark(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        let slot = match status {
            OrderStatus::Shipped => &mut self.shipped_at,
            OrderStatus::Delivered => &mut self.delivered_at,
            OrderStatus::Cancelled => &mut self.cancelled_at,
            OrderStatus::Refunded => &mut self.refunded_at,
            OrderStatus::Pending | OrderStatus::Processing | OrderStatus::Completed => return,
        };
        slot.get_or_insert(at);
    }
}

/// Order aggregate root.
///
/// Lines and totals are fixed when the order is placed. Afterwards only the
/// status, the payment status and the lifecycle timestamps change, and only
/// through the command methods below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    order_number: String,
    user_id: UserId,
    lines: Vec<OrderLine>,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_method: PaymentMethod,
    payment_id: Option<PaymentId>,
    totals: OrderTotals,
    shipping: ShippingInfo,
    cancellation_reason: Option<String>,
    /// Products whose stock has not gone back to the ledger since cancellation.
    #[serde(default)]
    unreleased_stock: Vec<ProductId>,
    timestamps: OrderTimestamps,
    updated_at: DateTime<Utc>,

    /// Current version for optimistic concurrency.
    #[serde(default)]
    version: Version,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::StatusChanged(data) => self.apply_status_changed(data),
            OrderEvent::OrderCancelled(data) => self.apply_order_cancelled(data),
            OrderEvent::PaymentCaptured(data) => self.apply_payment_captured(data),
            OrderEvent::PaymentRefunded(data) => self.apply_payment_refunded(data),
            OrderEvent::ReleaseFailed(data) => self.apply_release_failed(data),
            OrderEvent::ReleaseRetried(data) => self.apply_release_retried(data),
        }
    }
}

impl Order {
    /// Builds a pending order from a draft, computing and checking its totals.
    pub fn place(draft: OrderDraft) -> Result<Self, OrderError> {
        if draft.lines.is_empty() {
            return Err(OrderError::NoLines);
        }

        if let Some(line) = draft.lines.iter().find(|line| line.quantity() == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: line.product_id().clone(),
                quantity: 0,
            });
        }

        let totals = OrderTotals::compute(&draft.lines, &draft.pricing, draft.discount)?;
        totals.verify(&draft.lines)?;

        Ok(Self {
            id: draft.id,
            order_number: draft.order_number,
            user_id: draft.user_id,
            lines: draft.lines,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: draft.payment_method,
            payment_id: None,
            totals,
            shipping: draft.shipping,
            cancellation_reason: None,
            unreleased_stock: Vec::new(),
            timestamps: OrderTimestamps::new(draft.placed_at),
            updated_at: draft.placed_at,
            version: Version::initial(),
        })
    }

    /// Replaces the order number, used when the first choice collided.
    pub fn renumber(&mut self, order_number: impl Into<String>) {
        self.order_number = order_number.into();
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    /// The captured payment, if any.
    pub fn payment_id(&self) -> Option<PaymentId> {
        self.payment_id
    }

    pub fn totals(&self) -> &OrderTotals {
        &self.totals
    }

    pub fn total(&self) -> Money {
        self.totals.total
    }

    pub fn shipping(&self) -> &ShippingInfo {
        &self.shipping
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn timestamps(&self) -> &OrderTimestamps {
        &self.timestamps
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Quantity reserved per product, one entry per line.
    pub fn reserved_quantities(&self) -> impl Iterator<Item = (&ProductId, u32)> {
        self.lines
            .iter()
            .map(|line| (line.product_id(), line.quantity()))
    }

    /// Total quantity of `product_id` across the order's lines.
    pub fn reserved_quantity(&self, product_id: &ProductId) -> u32 {
        self.lines
            .iter()
            .filter(|line| line.product_id() == product_id)
            .map(OrderLine::quantity)
            .sum()
    }

    /// Products still owed back to the ledger after cancellation.
    pub fn unreleased_stock(&self) -> &[ProductId] {
        &self.unreleased_stock
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Re-checks the totals invariants, e.g. after loading from storage.
    pub fn verify_totals(&self) -> Result<(), OrderError> {
        self.totals.verify(&self.lines)
    }
}

// Command methods (return events)
impl Order {
    /// Moves the order to `to`.
    ///
    /// Cancellation is routed through [`Order::cancel`] without override.
    pub fn transition(&self, to: OrderStatus) -> Result<Vec<OrderEvent>, OrderError> {
        match to {
            OrderStatus::Cancelled => self.cancel(None, false),
            OrderStatus::Refunded => {
                if !self.status.can_refund() || self.payment_status != PaymentStatus::Paid {
                    return Err(self.illegal(to));
                }
                Ok(vec![OrderEvent::status_changed(self.status, to)])
            }
            _ => {
                if !self.status.can_progress_to(to) {
                    return Err(self.illegal(to));
                }
                Ok(vec![OrderEvent::status_changed(self.status, to)])
            }
        }
    }

    /// Cancels the order.
    ///
    /// A paid order can only be cancelled when `allow_paid` is set.
    pub fn cancel(
        &self,
        reason: Option<String>,
        allow_paid: bool,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.status == OrderStatus::Cancelled {
            return Err(OrderError::AlreadyCancelled);
        }

        if !self.status.can_cancel() {
            return Err(self.illegal(OrderStatus::Cancelled));
        }

        let paid = self.payment_status == PaymentStatus::Paid;
        if paid && !allow_paid {
            return Err(OrderError::PaidCancellation);
        }

        Ok(vec![OrderEvent::order_cancelled(self.status, reason, paid)])
    }

    /// Records products whose stock release failed after cancellation.
    ///
    /// Products not on the order, or already outstanding, are ignored.
    pub fn record_unreleased(
        &self,
        product_ids: &[ProductId],
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_cancelled()?;

        let mut fresh: Vec<ProductId> = Vec::new();
        for product_id in product_ids {
            let known = self.reserved_quantity(product_id) > 0;
            if known && !self.unreleased_stock.contains(product_id) && !fresh.contains(product_id) {
                fresh.push(product_id.clone());
            }
        }

        if fresh.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![OrderEvent::release_failed(fresh)])
    }

    /// Takes up every outstanding release for another attempt.
    ///
    /// Persisting the returned event is the claim: a concurrent retry that
    /// loses the version check finds nothing left and gets `AlreadyCancelled`.
    pub fn retry_releases(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_cancelled()?;
        if self.unreleased_stock.is_empty() {
            return Err(OrderError::AlreadyCancelled);
        }
        Ok(vec![OrderEvent::release_retried(
            self.unreleased_stock.clone(),
        )])
    }

    fn ensure_cancelled(&self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Cancelled {
            return Err(OrderError::NotCancelled {
                status: self.status,
            });
        }
        Ok(())
    }

    /// Records a successful capture.
    ///
    /// `capturable` lists the order statuses in which a capture is accepted.
    pub fn capture_payment(
        &self,
        payment_id: PaymentId,
        amount: Money,
        capturable: &[OrderStatus],
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_capturable(capturable)?;
        Ok(vec![OrderEvent::payment_captured(payment_id, amount)])
    }

    /// Fails unless a capture may start for this order.
    pub fn ensure_capturable(&self, capturable: &[OrderStatus]) -> Result<(), OrderError> {
        if !capturable.contains(&self.status) || !self.payment_status.can_capture() {
            return Err(OrderError::NotCapturable {
                status: self.status,
                payment_status: self.payment_status,
            });
        }
        Ok(())
    }

    /// Records a refund against the captured payment.
    pub fn record_refund(
        &self,
        payment_id: PaymentId,
        amount: Money,
        fully_refunded: bool,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_refundable()?;
        Ok(vec![OrderEvent::payment_refunded(
            payment_id,
            amount,
            fully_refunded,
        )])
    }

    /// Fails unless the order has a captured payment with money left on it.
    pub fn ensure_refundable(&self) -> Result<(), OrderError> {
        if !self.payment_status.can_refund() {
            return Err(OrderError::NotRefundable {
                payment_status: self.payment_status,
            });
        }
        Ok(())
    }

    fn illegal(&self, to: OrderStatus) -> OrderError {
        OrderError::IllegalTransition {
            from: self.status,
            to,
        }
    }
}

// Apply event helpers
impl Order {
    fn apply_status_changed(&mut self, data: StatusChangedData) {
        self.status = data.to;
        self.timestamps.mark(data.to, data.changed_at);
        self.updated_at = data.changed_at;
    }

    fn apply_order_cancelled(&mut self, data: OrderCancelledData) {
        self.status = OrderStatus::Cancelled;
        if self.cancellation_reason.is_none() {
            self.cancellation_reason = data.reason;
        }
        self.timestamps
            .mark(OrderStatus::Cancelled, data.cancelled_at);
        self.updated_at = data.cancelled_at;
    }

    fn apply_payment_captured(&mut self, data: PaymentCapturedData) {
        self.payment_status = PaymentStatus::Paid;
        self.payment_id = Some(data.payment_id);
        self.updated_at = data.captured_at;
    }

    fn apply_release_failed(&mut self, data: StockReleaseData) {
        for product_id in data.product_ids {
            if !self.unreleased_stock.contains(&product_id) {
                self.unreleased_stock.push(product_id);
            }
        }
        self.updated_at = data.at;
    }

    fn apply_release_retried(&mut self, data: StockReleaseData) {
        self.unreleased_stock
            .retain(|product_id| !data.product_ids.contains(product_id));
        self.updated_at = data.at;
    }

    fn apply_payment_refunded(&mut self, data: PaymentRefundedData) {
        if data.fully_refunded {
            self.payment_status = PaymentStatus::Refunded;
            self.timestamps.refunded_at.get_or_insert(data.refunded_at);
        } else {
            self.payment_status = PaymentStatus::PartiallyRefunded;
        }
        self.updated_at = data.refunded_at;
    }
}
