//! Order status transitions and their side effects.

use std::sync::Arc;

use common::{OrderId, ProductId};
use domain::{Actor, Aggregate, NotificationKind, Order, OrderError, OrderEvent, OrderStatus};
use serde_json::json;
use store::{InventoryLedger, OrderRepository, OrderRepositoryExt, StoreError};

use crate::authorization::{Action, authorize_order};
use crate::config::EngineConfig;
use crate::error::{FulfillmentError, Result};
use crate::notifications::NotificationDispatcher;

/// The only entry point for order status changes.
///
/// Every change is persisted under the order's optimistic version before any
/// side effect runs. Cancellation is the only transition that touches the
/// ledger, and because only one canceller can win the version check, stock
/// is released exactly once per line. Lines whose release fails stay on the
/// order as unreleased stock; cancelling again retries just those.
#[derive(Clone)]
pub struct OrderStateMachine {
    orders: Arc<dyn OrderRepository>,
    ledger: Arc<dyn InventoryLedger>,
    notifications: NotificationDispatcher,
    config: Arc<EngineConfig>,
}

impl OrderStateMachine {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        ledger: Arc<dyn InventoryLedger>,
        notifications: NotificationDispatcher,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            orders,
            ledger,
            notifications,
            config,
        }
    }

    /// Moves an order to `to`. Admin only.
    ///
    /// A transition to `Cancelled` takes the cancellation path without
    /// override.
    #[tracing::instrument(skip(self), fields(order_id = %order_id, to = %to))]
    pub async fn transition(
        &self,
        actor: &Actor,
        order_id: OrderId,
        to: OrderStatus,
    ) -> Result<Order> {
        let order = self.orders.load_order(order_id).await?;
        authorize_order(actor, Action::Transition, &order)?;

        if to == OrderStatus::Cancelled {
            return self.cancel_loaded(order, None, false).await;
        }

        let (order, events) = self
            .update_with_retry(order, |o| o.transition(to))
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "transition rejected"))?;

        metrics::counter!("order_transitions_total", "to" => to.as_str()).increment(1);
        tracing::info!(status = %order.status(), "order status changed");

        self.notify_events(&order, &events, json!({})).await;
        Ok(order)
    }

    /// Cancels an order and returns its stock.
    ///
    /// Customers may cancel their own unpaid orders; `override_paid` lets an
    /// admin cancel a paid one.
    #[tracing::instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn cancel(
        &self,
        actor: &Actor,
        order_id: OrderId,
        reason: Option<String>,
        override_paid: bool,
    ) -> Result<Order> {
        let order = self.orders.load_order(order_id).await?;
        authorize_order(actor, Action::Cancel, &order)?;
        if override_paid {
            authorize_order(actor, Action::OverrideCancel, &order)?;
        }

        self.cancel_loaded(order, reason, override_paid).await
    }

    async fn cancel_loaded(
        &self,
        order: Order,
        reason: Option<String>,
        override_paid: bool,
    ) -> Result<Order> {
        if order.status() == OrderStatus::Cancelled && !order.unreleased_stock().is_empty() {
            return self.retry_releases(order).await;
        }

        let (order, events) = self
            .update_with_retry(order, |o| o.cancel(reason.clone(), override_paid))
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "cancellation rejected"))?;

        metrics::counter!("order_transitions_total", "to" => OrderStatus::Cancelled.as_str())
            .increment(1);
        tracing::info!(order_number = order.order_number(), "order cancelled");

        let claimed: Vec<ProductId> = order
            .reserved_quantities()
            .map(|(product_id, _)| product_id.clone())
            .collect();
        let unreleased = self.release_lines(&order, &claimed).await;
        let order = self.settle_releases(order, unreleased).await?;

        self.notify_events(
            &order,
            &events,
            json!({
                "reason": order.cancellation_reason(),
                "overridden": override_paid,
            }),
        )
        .await;

        Self::ensure_released(order)
    }

    /// Releases the stock a cancelled order still owes the ledger.
    ///
    /// The claim is persisted before any release, so concurrent retries
    /// never return the same line twice.
    async fn retry_releases(&self, order: Order) -> Result<Order> {
        let (order, events) = self
            .update_with_retry(order, |o| o.retry_releases())
            .await?;

        let claimed: Vec<ProductId> = events
            .iter()
            .flat_map(|event| match event {
                OrderEvent::ReleaseRetried(data) => data.product_ids.clone(),
                _ => Vec::new(),
            })
            .collect();
        tracing::info!(?claimed, "retrying stock release for cancelled order");

        let unreleased = self.release_lines(&order, &claimed).await;
        let order = self.settle_releases(order, unreleased).await?;
        Self::ensure_released(order)
    }

    /// Returns the claimed lines' quantities to stock. Returns the products
    /// that failed.
    async fn release_lines(&self, order: &Order, claimed: &[ProductId]) -> Vec<ProductId> {
        let mut unreleased = Vec::new();

        for product_id in claimed {
            let quantity = order.reserved_quantity(product_id);
            match self.ledger.release(product_id, quantity).await {
                Ok(()) => {
                    metrics::counter!("stock_releases_total").increment(1);
                }
                Err(e) => {
                    tracing::error!(%product_id, quantity, error = %e, "stock release failed");
                    unreleased.push(product_id.clone());
                }
            }
        }

        unreleased
    }

    /// Writes failed releases back onto the order so a later cancel can
    /// retry them.
    async fn settle_releases(&self, order: Order, unreleased: Vec<ProductId>) -> Result<Order> {
        if unreleased.is_empty() {
            return Ok(order);
        }

        let (order, _) = self
            .update_with_retry(order, |o| o.record_unreleased(&unreleased))
            .await
            .inspect_err(|e| {
                tracing::error!(?unreleased, error = %e, "could not record unreleased stock");
            })?;
        Ok(order)
    }

    fn ensure_released(order: Order) -> Result<Order> {
        if order.unreleased_stock().is_empty() {
            return Ok(order);
        }

        let unreleased = order.unreleased_stock().to_vec();
        tracing::error!(?unreleased, "stock not released for cancelled order");
        Err(FulfillmentError::ReleaseIncomplete {
            order_id: order.id(),
            unreleased,
        })
    }

    /// Applies `command` and persists the result, reloading and retrying
    /// when another writer got there first.
    ///
    /// The command is re-evaluated against each fresh copy, so a retry sees
    /// the winner's state (for example, an order that is now cancelled).
    async fn update_with_retry<F>(
        &self,
        order: Order,
        command: F,
    ) -> Result<(Order, Vec<OrderEvent>)>
    where
        F: Fn(&Order) -> std::result::Result<Vec<OrderEvent>, OrderError>,
    {
        let order_id = order.id();
        let mut current = Some(order);

        for attempt in 1..=self.config.update_attempts.max(1) {
            let mut order = match current.take() {
                Some(order) => order,
                None => self.orders.load_order(order_id).await?,
            };

            let events = order.handle(|o| command(o))?;

            match self.orders.update_order(&order).await {
                Ok(version) => {
                    order.set_version(version);
                    return Ok((order, events));
                }
                Err(StoreError::ConcurrencyConflict { .. }) => {
                    tracing::debug!(attempt, "order changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(FulfillmentError::ConcurrentModification(order_id))
    }

    pub(crate) async fn notify_events(
        &self,
        order: &Order,
        events: &[OrderEvent],
        extra: serde_json::Value,
    ) {
        for kind in events.iter().filter_map(NotificationKind::for_event) {
            self.notifications.dispatch(kind, order, extra.clone()).await;
        }
    }
}
