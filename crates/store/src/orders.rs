use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::Order;

use crate::{Result, StoreError, Version};

/// Durable store of orders and their lines.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Stores a new order together with its lines.
    ///
    /// Fails with `DuplicateOrderNumber` if the order number is taken.
    /// Returns the stored version, [`Version::first`].
    async fn insert_order(&self, order: &Order) -> Result<Version>;

    /// Replaces the stored order if it is still at `order.version()`.
    ///
    /// Returns the new version, or `ConcurrencyConflict` if someone else
    /// updated the order first. Lines are never rewritten.
    async fn update_order(&self, order: &Order) -> Result<Version>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    async fn find_by_number(&self, order_number: &str) -> Result<Option<Order>>;

    /// Orders placed by `user_id`, newest first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;
}

/// Convenience methods on top of [`OrderRepository`].
#[async_trait]
pub trait OrderRepositoryExt: OrderRepository {
    /// Loads an order, failing with `OrderNotFound` if it does not exist.
    async fn load_order(&self, order_id: OrderId) -> Result<Order> {
        self.get_order(order_id)
            .await?
            .ok_or(StoreError::OrderNotFound(order_id))
    }
}

impl<T: OrderRepository + ?Sized> OrderRepositoryExt for T {}
