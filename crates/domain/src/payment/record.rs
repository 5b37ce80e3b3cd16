use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::error::PaymentError;

use super::{ChargeStatus, PaymentMethod};

/// A single charge attempt for an order.
///
/// Every capture attempt produces one record. A declined attempt stays as a
/// `Failed` record; a successful one moves to `Completed` and later through
/// the refund statuses. `refunded_amount` never exceeds `amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    id: PaymentId,
    order_id: OrderId,
    amount: Money,
    currency: String,
    method: PaymentMethod,
    idempotency_key: String,
    transaction_id: Option<String>,
    status: ChargeStatus,
    failure_reason: Option<String>,
    refunded_amount: Money,
    refund_reason: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
}

// Query methods
impl Payment {
    pub fn id(&self) -> PaymentId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    /// Gateway transaction id, known once the capture succeeded.
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn status(&self) -> ChargeStatus {
        self.status
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn refunded_amount(&self) -> Money {
        self.refunded_amount
    }

    pub fn refund_reason(&self) -> Option<&str> {
        self.refund_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        self.failed_at
    }

    pub fn refunded_at(&self) -> Option<DateTime<Utc>> {
        self.refunded_at
    }

    pub fn is_captured(&self) -> bool {
        self.status.is_captured()
    }

    pub fn is_pending(&self) -> bool {
        self.status == ChargeStatus::Pending
    }

    /// What can still be refunded; zero unless captured.
    pub fn refundable_balance(&self) -> Money {
        if self.is_captured() {
            self.amount - self.refunded_amount
        } else {
            Money::zero()
        }
    }
}

// Transitions
impl Payment {
    /// Opens a pending record before the gateway is called.
    pub fn pending(
        order_id: OrderId,
        amount: Money,
        currency: impl Into<String>,
        method: PaymentMethod,
        idempotency_key: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, PaymentError> {
        if !amount.is_positive() {
            return Err(PaymentError::InvalidAmount { amount });
        }

        Ok(Self {
            id: PaymentId::new(),
            order_id,
            amount,
            currency: currency.into(),
            method,
            idempotency_key: idempotency_key.into(),
            transaction_id: None,
            status: ChargeStatus::Pending,
            failure_reason: None,
            refunded_amount: Money::zero(),
            refund_reason: None,
            created_at: now,
            processed_at: None,
            failed_at: None,
            refunded_at: None,
        })
    }

    /// Marks the charge as captured by the gateway.
    pub fn complete(
        &mut self,
        transaction_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        self.ensure_pending()?;
        self.status = ChargeStatus::Completed;
        self.transaction_id = Some(transaction_id.into());
        self.processed_at = Some(now);
        Ok(())
    }

    /// Marks the charge as declined.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), PaymentError> {
        self.ensure_pending()?;
        self.status = ChargeStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.failed_at = Some(now);
        Ok(())
    }

    /// Checks a refund request against the remaining balance without changing anything.
    pub fn check_refund(&self, amount: Money) -> Result<(), PaymentError> {
        if !self.is_captured() {
            return Err(PaymentError::NotCaptured {
                status: self.status,
            });
        }
        if !amount.is_positive() {
            return Err(PaymentError::InvalidAmount { amount });
        }
        let remaining = self.refundable_balance();
        if amount > remaining {
            return Err(PaymentError::ExceedsRefundable {
                requested: amount,
                remaining,
            });
        }
        Ok(())
    }

    /// Records a refund confirmed by the gateway.
    ///
    /// Returns true if the payment is now fully refunded.
    pub fn refund(
        &mut self,
        amount: Money,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentError> {
        self.check_refund(amount)?;

        self.refunded_amount += amount;
        if reason.is_some() {
            self.refund_reason = reason;
        }
        self.refunded_at.get_or_insert(now);

        let fully_refunded = self.refunded_amount == self.amount;
        self.status = if fully_refunded {
            ChargeStatus::Refunded
        } else {
            ChargeStatus::PartiallyRefunded
        };
        Ok(fully_refunded)
    }

    fn ensure_pending(&self) -> Result<(), PaymentError> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(PaymentError::AlreadyResolved {
                status: self.status,
            })
        }
    }
}
