//! Cart to order conversion.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::{Money, OrderId, ProductId, UserId};
use domain::{
    Actor, Aggregate, NotificationKind, Order, OrderDraft, OrderLine, PaymentMethod,
    PaymentStatus, Product, ShippingInfo,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use store::{InventoryLedger, OrderRepository, OrderRepositoryExt, ProductCatalog, StoreError};

use crate::authorization::{Action, authorize, authorize_order};
use crate::config::EngineConfig;
use crate::error::{FulfillmentError, Result};
use crate::notifications::NotificationDispatcher;
use crate::order_number::OrderNumberGenerator;
use crate::services::{AccountDirectory, InvoiceRenderer};

/// One cart entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl CartLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Input for [`OrderFulfillmentService::create_order`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: UserId,
    pub lines: Vec<CartLine>,
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
    /// Discount computed upstream, e.g. from a coupon.
    #[serde(default)]
    pub discount: Money,
}

/// Turns carts into durable orders.
///
/// Creation reserves stock for every line before the order becomes visible,
/// and any failure after the first reservation releases everything reserved
/// in that attempt.
#[derive(Clone)]
pub struct OrderFulfillmentService {
    ledger: Arc<dyn InventoryLedger>,
    catalog: Arc<dyn ProductCatalog>,
    orders: Arc<dyn OrderRepository>,
    accounts: Arc<dyn AccountDirectory>,
    invoices: Arc<dyn InvoiceRenderer>,
    order_numbers: Arc<dyn OrderNumberGenerator>,
    notifications: NotificationDispatcher,
    config: Arc<EngineConfig>,
}

impl OrderFulfillmentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn InventoryLedger>,
        catalog: Arc<dyn ProductCatalog>,
        orders: Arc<dyn OrderRepository>,
        accounts: Arc<dyn AccountDirectory>,
        invoices: Arc<dyn InvoiceRenderer>,
        order_numbers: Arc<dyn OrderNumberGenerator>,
        notifications: NotificationDispatcher,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            ledger,
            catalog,
            orders,
            accounts,
            invoices,
            order_numbers,
            notifications,
            config,
        }
    }

    /// Creates a pending order from a cart.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id, lines = request.lines.len()))]
    pub async fn create_order(&self, actor: &Actor, request: CreateOrderRequest) -> Result<Order> {
        let started = Instant::now();
        let result = self.try_create_order(actor, request).await;
        metrics::histogram!("order_create_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(
                    order_id = %order.id(),
                    order_number = order.order_number(),
                    total = %order.total(),
                    "order created"
                );
            }
            Err(e) => {
                metrics::counter!("order_create_failures_total", "reason" => e.reason())
                    .increment(1);
                tracing::warn!(error = %e, "order creation failed");
            }
        }

        let order = result?;
        self.notifications
            .dispatch(
                NotificationKind::OrderCreated,
                &order,
                json!({
                    "order_number": order.order_number(),
                    "total_cents": order.total().cents(),
                }),
            )
            .await;
        Ok(order)
    }

    async fn try_create_order(&self, actor: &Actor, request: CreateOrderRequest) -> Result<Order> {
        authorize(actor, Action::PlaceOrder, request.user_id)?;

        let cart = merge_cart(&request.lines)?;

        let active = self
            .accounts
            .account_status(request.user_id)
            .await?
            .is_some_and(|status| status.can_place_orders());
        if !active {
            return Err(FulfillmentError::AccountInactive(request.user_id));
        }

        let mut products = Vec::with_capacity(cart.len());
        for (product_id, quantity) in &cart {
            let product = self.orderable_product(product_id).await?;
            products.push((product, *quantity));
        }

        let reserved = self.reserve_all(&cart).await?;

        let placed_at = Utc::now();
        let lines = products
            .iter()
            .zip(1..)
            .map(|((product, quantity), line_no)| {
                OrderLine::from_product(line_no, product, *quantity, placed_at)
            })
            .collect();

        let draft = OrderDraft {
            id: OrderId::new(),
            order_number: self.order_numbers.next_number(),
            user_id: request.user_id,
            lines,
            shipping: request.shipping,
            payment_method: request.payment_method,
            discount: request.discount,
            pricing: self.config.pricing,
            placed_at,
        };

        let order = match Order::place(draft) {
            Ok(order) => order,
            Err(e) => return Err(self.compensate(&reserved, e.into()).await),
        };

        match self.insert_with_fresh_number(order).await {
            Ok(order) => Ok(order),
            Err(e) => Err(self.compensate(&reserved, e).await),
        }
    }

    async fn orderable_product(&self, product_id: &ProductId) -> Result<Product> {
        let product = self
            .catalog
            .product(product_id)
            .await?
            .ok_or_else(|| FulfillmentError::ProductNotFound(product_id.clone()))?;

        if !product.active {
            return Err(FulfillmentError::ProductUnavailable(product_id.clone()));
        }
        Ok(product)
    }

    /// Reserves every cart line, releasing what was taken if any line fails.
    async fn reserve_all(&self, cart: &[(ProductId, u32)]) -> Result<Vec<(ProductId, u32)>> {
        let mut reserved = Vec::with_capacity(cart.len());

        for (product_id, quantity) in cart {
            match self.ledger.try_reserve(product_id, *quantity).await {
                Ok(reservation) => {
                    metrics::counter!("stock_reservations_total").increment(1);
                    tracing::debug!(
                        %product_id,
                        quantity,
                        remaining = reservation.remaining,
                        "stock reserved"
                    );
                    reserved.push((product_id.clone(), *quantity));
                }
                Err(e) => {
                    if let StoreError::InsufficientStock { available, .. } = &e {
                        tracing::warn!(%product_id, quantity, available, "insufficient stock");
                    }
                    return Err(self.compensate(&reserved, e.into()).await);
                }
            }
        }

        Ok(reserved)
    }

    /// Inserts the order, drawing a new number whenever the current one is taken.
    async fn insert_with_fresh_number(&self, mut order: Order) -> Result<Order> {
        let attempts = self.config.order_number_attempts;

        for attempt in 1..=attempts {
            match self.orders.insert_order(&order).await {
                Ok(version) => {
                    order.set_version(version);
                    return Ok(order);
                }
                Err(StoreError::DuplicateOrderNumber(number)) => {
                    tracing::debug!(attempt, %number, "order number taken");
                    order.renumber(self.order_numbers.next_number());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(FulfillmentError::OrderNumberExhausted { attempts })
    }

    /// Releases `reserved` in reverse order and returns the error to report.
    async fn compensate(
        &self,
        reserved: &[(ProductId, u32)],
        cause: FulfillmentError,
    ) -> FulfillmentError {
        let mut unreleased = Vec::new();

        for (product_id, quantity) in reserved.iter().rev() {
            match self.ledger.release(product_id, *quantity).await {
                Ok(()) => {
                    metrics::counter!("stock_releases_total").increment(1);
                }
                Err(e) => {
                    tracing::error!(%product_id, quantity, error = %e, "compensating release failed");
                    unreleased.push(product_id.clone());
                }
            }
        }

        if unreleased.is_empty() {
            if !reserved.is_empty() {
                tracing::info!(lines = reserved.len(), "reservations rolled back");
            }
            cause
        } else {
            FulfillmentError::CompensationFailed {
                cause: Box::new(cause),
                unreleased,
            }
        }
    }

    /// Loads an order the actor may see.
    pub async fn get_order(&self, actor: &Actor, order_id: OrderId) -> Result<Order> {
        let order = self.orders.load_order(order_id).await?;
        authorize_order(actor, Action::ViewOrder, &order)?;
        Ok(order)
    }

    pub async fn find_by_number(&self, actor: &Actor, order_number: &str) -> Result<Order> {
        let order = self
            .orders
            .find_by_number(order_number)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(order_number.to_string()))?;
        authorize_order(actor, Action::ViewOrder, &order)?;
        Ok(order)
    }

    /// Orders placed by `user_id`, newest first.
    pub async fn orders_for_user(&self, actor: &Actor, user_id: UserId) -> Result<Vec<Order>> {
        authorize(actor, Action::ViewOrder, user_id)?;
        Ok(self.orders.orders_for_user(user_id).await?)
    }

    /// Renders the invoice of an order whose payment has settled.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn render_invoice(&self, actor: &Actor, order_id: OrderId) -> Result<Vec<u8>> {
        let order = self.get_order(actor, order_id).await?;
        if order.payment_status() == PaymentStatus::Pending {
            return Err(FulfillmentError::NotFinalized(order_id));
        }
        self.invoices.render(&order).await
    }
}

/// Rejects empty carts and zero quantities, and sums duplicate products in
/// first-seen order.
fn merge_cart(lines: &[CartLine]) -> Result<Vec<(ProductId, u32)>> {
    if lines.is_empty() {
        return Err(FulfillmentError::EmptyCart);
    }

    let mut merged: Vec<(ProductId, u32)> = Vec::with_capacity(lines.len());
    for line in lines {
        let invalid = || FulfillmentError::InvalidQuantity {
            product_id: line.product_id.clone(),
            quantity: line.quantity,
        };

        if line.quantity == 0 {
            return Err(invalid());
        }

        match merged.iter_mut().find(|(id, _)| *id == line.product_id) {
            Some((_, quantity)) => {
                *quantity = quantity.checked_add(line.quantity).ok_or_else(invalid)?;
            }
            None => merged.push((line.product_id.clone(), line.quantity)),
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_cart_sums_duplicates_in_order() {
        let merged = merge_cart(&[
            CartLine::new("B", 1),
            CartLine::new("A", 2),
            CartLine::new("B", 3),
        ])
        .unwrap();

        assert_eq!(
            merged,
            vec![(ProductId::new("B"), 4), (ProductId::new("A"), 2)]
        );
    }

    #[test]
    fn test_merge_cart_rejects_empty_and_zero() {
        assert!(matches!(merge_cart(&[]), Err(FulfillmentError::EmptyCart)));
        assert!(matches!(
            merge_cart(&[CartLine::new("A", 1), CartLine::new("B", 0)]),
            Err(FulfillmentError::InvalidQuantity { quantity: 0, .. })
        ));
    }

    #[test]
    fn test_merge_cart_rejects_overflow() {
        let result = merge_cart(&[CartLine::new("A", u32::MAX), CartLine::new("A", 1)]);
        assert!(matches!(result, Err(FulfillmentError::InvalidQuantity { .. })));
    }
}
