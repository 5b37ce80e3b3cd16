//! Payment capture, refund and reconciliation.

use std::sync::Arc;

use chrono::Utc;
use common::{Money, OrderId};
use domain::{Actor, Aggregate, ChargeStatus, NotificationKind, Order, OrderStatus, Payment};
use serde_json::json;
use store::{OrderRepository, OrderRepositoryExt, PaymentRepository, StoreError};

use crate::authorization::{Action, authorize_order};
use crate::config::EngineConfig;
use crate::error::{FulfillmentError, Result};
use crate::notifications::NotificationDispatcher;
use crate::services::{
    CaptureOutcome, ChargeRequest, GatewayError, GatewayStatus, PaymentGateway, RefundOutcome,
};
use crate::state_machine::OrderStateMachine;

/// What the gateway says about a pending record.
enum Resolution {
    Captured(Payment),
    Declined(Payment),
    /// The gateway has the charge but has not settled it, or did not answer.
    Unknown(Payment),
    /// The gateway never saw the key.
    NotFound(Payment),
}

/// Couples payment records to their order.
///
/// A capture opens a `Pending` record before calling the gateway, so an
/// unanswered call always leaves something to reconcile. The idempotency key
/// only changes after a decline, which means a retry after a timeout can
/// never charge twice.
#[derive(Clone)]
pub struct PaymentService {
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    state_machine: OrderStateMachine,
    notifications: NotificationDispatcher,
    config: Arc<EngineConfig>,
}

impl PaymentService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        state_machine: OrderStateMachine,
        notifications: NotificationDispatcher,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            orders,
            payments,
            gateway,
            state_machine,
            notifications,
            config,
        }
    }

    /// Captures the order total.
    ///
    /// Calling this again for an order that is already captured returns the
    /// existing record without contacting the gateway.
    #[tracing::instrument(skip(self, details), fields(order_id = %order_id))]
    pub async fn capture(
        &self,
        actor: &Actor,
        order_id: OrderId,
        details: serde_json::Value,
    ) -> Result<Payment> {
        let order = self.orders.load_order(order_id).await?;
        authorize_order(actor, Action::Capture, &order)?;

        let records = self.payments.payments_for_order(order_id).await?;
        if let Some(captured) = records.iter().find(|p| p.is_captured()) {
            tracing::info!(payment_id = %captured.id(), "order already captured");
            return Ok(captured.clone());
        }

        order.ensure_capturable(&self.config.capturable_statuses)?;

        if let Some(pending) = records.into_iter().find(Payment::is_pending) {
            match self.resolve(&order, pending).await? {
                Resolution::Captured(payment) => return Ok(payment),
                Resolution::Unknown(payment) => {
                    return Err(FulfillmentError::PaymentOutcomeUnknown {
                        payment_id: payment.id(),
                    });
                }
                Resolution::NotFound(payment) => {
                    tracing::info!(payment_id = %payment.id(), "re-sending unseen charge");
                    return self.charge(order, payment, details).await;
                }
                Resolution::Declined(_) => {}
            }
        }

        let payment = self.open_attempt(&order).await?;
        self.charge(order, payment, details).await
    }

    /// Refunds part or all of the captured payment. Admin only.
    ///
    /// `amount` defaults to the remaining balance. If the order has not left
    /// the warehouse yet, it is cancelled and its stock returned.
    #[tracing::instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn refund(
        &self,
        actor: &Actor,
        order_id: OrderId,
        amount: Option<Money>,
        reason: Option<String>,
    ) -> Result<Payment> {
        let order = self.orders.load_order(order_id).await?;
        authorize_order(actor, Action::Refund, &order)?;
        order.ensure_refundable()?;

        let mut payment = self.captured_payment(&order).await?;
        let amount = amount.unwrap_or_else(|| payment.refundable_balance());
        payment.check_refund(amount)?;

        let transaction_id = payment
            .transaction_id()
            .map(str::to_string)
            .ok_or_else(|| {
                FulfillmentError::Invariant(format!(
                    "captured payment {} has no transaction id",
                    payment.id()
                ))
            })?;

        match self.call_refund(&transaction_id, amount).await {
            Ok(RefundOutcome::Refunded) => {}
            Ok(RefundOutcome::Declined { reason }) => {
                metrics::counter!("payment_refunds_total", "outcome" => "declined").increment(1);
                tracing::warn!(%reason, "refund declined");
                return Err(FulfillmentError::RefundDeclined {
                    payment_id: payment.id(),
                    reason,
                });
            }
            Err(e) => {
                metrics::counter!("payment_refunds_total", "outcome" => "unknown").increment(1);
                tracing::warn!(error = %e, "refund outcome unknown");
                return Err(FulfillmentError::RefundOutcomeUnknown {
                    payment_id: payment.id(),
                    amount,
                });
            }
        }

        let now = Utc::now();
        let mut order = order;
        let mut attempt = 1;
        let fully_refunded = loop {
            let fully_refunded = payment.refund(amount, reason.clone(), now)?;
            order.handle(|o| o.record_refund(payment.id(), amount, fully_refunded))?;

            match self.payments.update_payment_with_order(&payment, &order).await {
                Ok(version) => {
                    order.set_version(version);
                    break fully_refunded;
                }
                Err(StoreError::ConcurrencyConflict { .. })
                    if attempt < self.config.update_attempts =>
                {
                    tracing::debug!(attempt, "order changed during refund, retrying");
                    attempt += 1;
                    order = self.orders.load_order(order_id).await?;
                    payment = self.captured_payment(&order).await?;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        %transaction_id,
                        %amount,
                        "gateway refunded but the refund could not be recorded"
                    );
                    return Err(e.into());
                }
            }
        };

        metrics::counter!("payment_refunds_total", "outcome" => "refunded").increment(1);
        tracing::info!(
            payment_id = %payment.id(),
            %amount,
            fully_refunded,
            "refund processed"
        );

        self.notifications
            .dispatch(
                NotificationKind::PaymentRefunded,
                &order,
                json!({
                    "payment_id": payment.id(),
                    "amount_cents": amount.cents(),
                    "fully_refunded": fully_refunded,
                }),
            )
            .await;

        if matches!(order.status(), OrderStatus::Pending | OrderStatus::Processing) {
            self.cancel_after_refund(&payment, order_id, reason).await?;
        }

        Ok(payment)
    }

    /// Cancels an order whose refund is already recorded.
    ///
    /// Someone else cancelling or shipping it in the meantime is fine; the
    /// refund stands either way.
    async fn cancel_after_refund(
        &self,
        payment: &Payment,
        order_id: OrderId,
        reason: Option<String>,
    ) -> Result<()> {
        let reason = reason.unwrap_or_else(|| "payment refunded".to_string());
        match self
            .state_machine
            .cancel(&Actor::System, order_id, Some(reason), true)
            .await
        {
            Ok(_) => Ok(()),
            Err(
                e @ (FulfillmentError::AlreadyCancelled
                | FulfillmentError::IllegalTransition { .. }),
            ) => {
                tracing::info!(error = %e, "order moved on during refund, not cancelling");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    payment_id = %payment.id(),
                    "refund recorded but order not cancelled"
                );
                Err(FulfillmentError::RefundedNotCancelled {
                    payment_id: payment.id(),
                    cause: Box::new(e),
                })
            }
        }
    }

    /// Resolves a pending capture by asking the gateway. Admin only.
    ///
    /// Returns the record after reconciliation, or `None` if nothing was
    /// pending.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn reconcile(&self, actor: &Actor, order_id: OrderId) -> Result<Option<Payment>> {
        let order = self.orders.load_order(order_id).await?;
        authorize_order(actor, Action::Reconcile, &order)?;

        let pending = self
            .payments
            .payments_for_order(order_id)
            .await?
            .into_iter()
            .find(Payment::is_pending);

        let Some(pending) = pending else {
            return Ok(None);
        };

        let payment = match self.resolve(&order, pending).await? {
            Resolution::Captured(p)
            | Resolution::Declined(p)
            | Resolution::Unknown(p)
            | Resolution::NotFound(p) => p,
        };
        Ok(Some(payment))
    }

    /// All payment records of an order, oldest first.
    pub async fn payments_for_order(
        &self,
        actor: &Actor,
        order_id: OrderId,
    ) -> Result<Vec<Payment>> {
        let order = self.orders.load_order(order_id).await?;
        authorize_order(actor, Action::ViewOrder, &order)?;
        Ok(self.payments.payments_for_order(order_id).await?)
    }

    /// Stores a fresh pending record for the next capture attempt.
    ///
    /// If a concurrent capture already claimed the key, its record decides
    /// the result.
    async fn open_attempt(&self, order: &Order) -> Result<Payment> {
        let failed = self
            .payments
            .payments_for_order(order.id())
            .await?
            .iter()
            .filter(|p| p.status() == ChargeStatus::Failed)
            .count();
        let key = format!("{}:capture:{}", order.id(), failed + 1);

        let payment = Payment::pending(
            order.id(),
            order.total(),
            self.config.currency.clone(),
            order.payment_method(),
            key.clone(),
            Utc::now(),
        )?;

        match self.payments.insert_payment(&payment).await {
            Ok(()) => Ok(payment),
            Err(StoreError::DuplicateIdempotencyKey(_)) => {
                let existing = self.payments.find_by_idempotency_key(&key).await?;
                match existing {
                    Some(existing) if existing.is_captured() => Ok(existing),
                    Some(existing) => Err(FulfillmentError::PaymentOutcomeUnknown {
                        payment_id: existing.id(),
                    }),
                    None => Err(FulfillmentError::Invariant(format!(
                        "idempotency key {key} reported taken but not found"
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sends `payment` to the gateway and records the outcome.
    async fn charge(
        &self,
        order: Order,
        payment: Payment,
        details: serde_json::Value,
    ) -> Result<Payment> {
        if !payment.is_pending() {
            return Ok(payment);
        }

        let request = ChargeRequest {
            idempotency_key: payment.idempotency_key().to_string(),
            order_id: order.id(),
            amount: payment.amount(),
            currency: payment.currency().to_string(),
            method: payment.method(),
            details,
        };

        let outcome = match self.call_capture(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    key = %request.idempotency_key,
                    "capture unanswered, querying status"
                );
                match self.call_query(&request.idempotency_key).await {
                    Ok(GatewayStatus::Succeeded { transaction_id }) => {
                        CaptureOutcome::Captured { transaction_id }
                    }
                    Ok(GatewayStatus::Failed { reason }) => CaptureOutcome::Declined { reason },
                    Ok(GatewayStatus::Pending | GatewayStatus::NotFound) | Err(_) => {
                        metrics::counter!("payment_captures_total", "outcome" => "unknown")
                            .increment(1);
                        tracing::warn!(payment_id = %payment.id(), "capture outcome unknown");
                        return Err(FulfillmentError::PaymentOutcomeUnknown {
                            payment_id: payment.id(),
                        });
                    }
                }
            }
        };

        match outcome {
            CaptureOutcome::Captured { transaction_id } => {
                self.record_capture(order, payment, transaction_id).await
            }
            CaptureOutcome::Declined { reason } => {
                let payment = self.record_decline(payment, &reason).await?;
                Err(FulfillmentError::PaymentDeclined {
                    payment_id: payment.id(),
                    reason,
                })
            }
        }
    }

    async fn resolve(&self, order: &Order, payment: Payment) -> Result<Resolution> {
        let status = self.call_query(payment.idempotency_key()).await;
        tracing::debug!(payment_id = %payment.id(), ?status, "reconciling pending payment");

        match status {
            Ok(GatewayStatus::Succeeded { transaction_id }) => {
                let payment = self
                    .record_capture(order.clone(), payment, transaction_id)
                    .await?;
                Ok(Resolution::Captured(payment))
            }
            Ok(GatewayStatus::Failed { reason }) => {
                let payment = self.record_decline(payment, &reason).await?;
                Ok(Resolution::Declined(payment))
            }
            Ok(GatewayStatus::NotFound) => Ok(Resolution::NotFound(payment)),
            Ok(GatewayStatus::Pending) | Err(_) => Ok(Resolution::Unknown(payment)),
        }
    }

    /// Persists a successful charge together with the order's new payment status.
    ///
    /// If the order can no longer take the payment (it was cancelled while the
    /// gateway call was in flight) or another record won the capture, the
    /// charge is refunded and the record closed as failed.
    async fn record_capture(
        &self,
        mut order: Order,
        pending: Payment,
        transaction_id: String,
    ) -> Result<Payment> {
        let mut payment = pending.clone();
        payment.complete(transaction_id.clone(), Utc::now())?;

        let mut attempt = 1;
        loop {
            if order.payment_id() == Some(payment.id()) {
                return self.recorded_elsewhere(&payment).await;
            }

            if let Err(e) = order.handle(|o| {
                o.capture_payment(payment.id(), payment.amount(), &self.config.capturable_statuses)
            }) {
                let err = FulfillmentError::from(e);
                self.reverse_charge(pending, &transaction_id, "order no longer capturable")
                    .await?;
                return Err(err);
            }

            match self.payments.update_payment_with_order(&payment, &order).await {
                Ok(version) => {
                    order.set_version(version);
                    break;
                }
                Err(StoreError::ConcurrencyConflict { .. })
                    if attempt < self.config.update_attempts =>
                {
                    tracing::debug!(attempt, "order changed during capture, retrying");
                    attempt += 1;
                    order = self.orders.load_order(order.id()).await?;
                }
                Err(StoreError::CaptureExists { existing, .. }) => {
                    self.reverse_charge(pending, &transaction_id, "duplicate capture")
                        .await?;
                    return self
                        .payments
                        .get_payment(existing)
                        .await?
                        .ok_or_else(|| {
                            FulfillmentError::Invariant(format!(
                                "captured payment {existing} disappeared"
                            ))
                        });
                }
                Err(e) => return Err(e.into()),
            }
        }

        metrics::counter!("payment_captures_total", "outcome" => "captured").increment(1);
        tracing::info!(
            payment_id = %payment.id(),
            %transaction_id,
            amount = %payment.amount(),
            "payment captured"
        );

        self.notifications
            .dispatch(
                NotificationKind::PaymentCaptured,
                &order,
                json!({
                    "payment_id": payment.id(),
                    "amount_cents": payment.amount().cents(),
                    "transaction_id": transaction_id,
                }),
            )
            .await;

        Ok(payment)
    }

    /// Another caller resolved the same record first; its stored copy wins.
    async fn recorded_elsewhere(&self, payment: &Payment) -> Result<Payment> {
        tracing::debug!(payment_id = %payment.id(), "capture already recorded");
        self.payments
            .get_payment(payment.id())
            .await?
            .ok_or_else(|| {
                FulfillmentError::Invariant(format!("payment {} disappeared", payment.id()))
            })
    }

    async fn record_decline(&self, mut payment: Payment, reason: &str) -> Result<Payment> {
        payment.fail(reason, Utc::now())?;
        self.payments.update_payment(&payment).await?;

        metrics::counter!("payment_captures_total", "outcome" => "declined").increment(1);
        tracing::warn!(payment_id = %payment.id(), %reason, "payment declined");
        Ok(payment)
    }

    /// Refunds a charge that must not stand and closes its record as failed.
    async fn reverse_charge(
        &self,
        mut pending: Payment,
        transaction_id: &str,
        why: &str,
    ) -> Result<()> {
        let amount = pending.amount();
        match self.call_refund(transaction_id, amount).await {
            Ok(RefundOutcome::Refunded) => {
                tracing::warn!(%transaction_id, %amount, why, "charge reversed");
            }
            other => {
                tracing::error!(
                    %transaction_id,
                    %amount,
                    why,
                    ?other,
                    "charge could not be reversed"
                );
                return Err(FulfillmentError::Invariant(format!(
                    "charge {transaction_id} could not be reversed after {why}"
                )));
            }
        }

        metrics::counter!("payment_captures_total", "outcome" => "reversed").increment(1);
        pending.fail(format!("{why}; charge {transaction_id} reversed"), Utc::now())?;
        self.payments.update_payment(&pending).await?;
        Ok(())
    }

    async fn captured_payment(&self, order: &Order) -> Result<Payment> {
        let payment_id = order.payment_id().ok_or_else(|| {
            FulfillmentError::Invariant(format!("paid order {} has no payment", order.id()))
        })?;

        self.payments.get_payment(payment_id).await?.ok_or_else(|| {
            FulfillmentError::Invariant(format!("payment {payment_id} not found"))
        })
    }

    async fn call_capture(
        &self,
        request: &ChargeRequest,
    ) -> std::result::Result<CaptureOutcome, GatewayError> {
        tokio::time::timeout(self.config.gateway_timeout, self.gateway.capture(request))
            .await
            .unwrap_or(Err(GatewayError::Timeout))
    }

    async fn call_refund(
        &self,
        transaction_id: &str,
        amount: Money,
    ) -> std::result::Result<RefundOutcome, GatewayError> {
        tokio::time::timeout(
            self.config.gateway_timeout,
            self.gateway.refund(transaction_id, amount),
        )
        .await
        .unwrap_or(Err(GatewayError::Timeout))
    }

    async fn call_query(&self, key: &str) -> std::result::Result<GatewayStatus, GatewayError> {
        tokio::time::timeout(self.config.gateway_timeout, self.gateway.query_status(key))
            .await
            .unwrap_or(Err(GatewayError::Timeout))
    }
}
