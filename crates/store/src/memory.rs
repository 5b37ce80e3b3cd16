use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, PaymentId, ProductId, UserId};
use domain::{Aggregate, Order, Payment, Product};
use tokio::sync::RwLock;

use crate::{
    InventoryLedger, OrderRepository, PaymentRepository, ProductCatalog, Reservation, Result,
    StoreError, Version,
};

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
    order_numbers: HashMap<String, OrderId>,
    payments: Vec<Payment>,
    fail_order_writes: bool,
    fail_releases: bool,
}

impl Tables {
    fn check_order_version(&self, order: &Order) -> Result<Version> {
        let stored = self
            .orders
            .get(&order.id())
            .ok_or(StoreError::OrderNotFound(order.id()))?;

        if stored.version() != order.version() {
            return Err(StoreError::ConcurrencyConflict {
                order_id: order.id(),
                expected: order.version(),
                actual: stored.version(),
            });
        }
        Ok(order.version().next())
    }

    fn check_payment_constraints(&self, payment: &Payment) -> Result<usize> {
        let index = self
            .payments
            .iter()
            .position(|p| p.id() == payment.id())
            .ok_or(StoreError::PaymentNotFound(payment.id()))?;

        if let Some(txn) = payment.transaction_id()
            && self
                .payments
                .iter()
                .any(|p| p.id() != payment.id() && p.transaction_id() == Some(txn))
        {
            return Err(StoreError::DuplicateTransaction(txn.to_string()));
        }

        if payment.is_captured()
            && let Some(existing) = self.payments.iter().find(|p| {
                p.id() != payment.id() && p.order_id() == payment.order_id() && p.is_captured()
            })
        {
            return Err(StoreError::CaptureExists {
                order_id: payment.order_id(),
                existing: existing.id(),
            });
        }

        Ok(index)
    }

    fn store_order(&mut self, order: &Order, version: Version) {
        let mut stored = order.clone();
        stored.set_version(version);
        self.orders.insert(order.id(), stored);
    }
}

/// In-memory store implementing every storage contract.
///
/// All tables sit behind one lock, so each operation is atomic with respect
/// to every other, including the conditional stock decrement.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `products`.
    pub async fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.write().await;
            for product in products {
                tables.products.insert(product.id.clone(), product);
            }
        }
        store
    }

    /// Makes order inserts and updates fail with `Unavailable`.
    pub async fn set_fail_order_writes(&self, fail: bool) {
        self.tables.write().await.fail_order_writes = fail;
    }

    /// Makes stock releases fail with `Unavailable`.
    pub async fn set_fail_releases(&self, fail: bool) {
        self.tables.write().await.fail_releases = fail;
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Returns the number of stored payment records.
    pub async fn payment_count(&self) -> usize {
        self.tables.read().await.payments.len()
    }
}

#[async_trait]
impl InventoryLedger for InMemoryStore {
    async fn try_reserve(&self, product_id: &ProductId, quantity: u32) -> Result<Reservation> {
        let mut tables = self.tables.write().await;
        let product = tables
            .products
            .get_mut(product_id)
            .ok_or_else(|| StoreError::ProductNotFound(product_id.clone()))?;

        if product.stock < quantity {
            return Err(StoreError::InsufficientStock {
                product_id: product_id.clone(),
                requested: quantity,
                available: product.stock,
            });
        }

        product.stock -= quantity;
        Ok(Reservation {
            product_id: product_id.clone(),
            quantity,
            remaining: product.stock,
        })
    }

    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.fail_releases {
            return Err(StoreError::Unavailable("release refused".to_string()));
        }

        let product = tables
            .products
            .get_mut(product_id)
            .ok_or_else(|| StoreError::ProductNotFound(product_id.clone()))?;
        product.stock = product.stock.saturating_add(quantity);
        Ok(())
    }

    async fn stock(&self, product_id: &ProductId) -> Result<u32> {
        self.tables
            .read()
            .await
            .products
            .get(product_id)
            .map(|p| p.stock)
            .ok_or_else(|| StoreError::ProductNotFound(product_id.clone()))
    }
}

#[async_trait]
impl ProductCatalog for InMemoryStore {
    async fn product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.get(product_id).cloned())
    }

    async fn upsert_product(&self, product: &Product) -> Result<()> {
        self.tables
            .write()
            .await
            .products
            .insert(product.id.clone(), product.clone());
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<Version> {
        let mut tables = self.tables.write().await;
        if tables.fail_order_writes {
            return Err(StoreError::Unavailable("order insert refused".to_string()));
        }
        if tables.orders.contains_key(&order.id()) {
            return Err(StoreError::DuplicateOrder(order.id()));
        }
        if tables.order_numbers.contains_key(order.order_number()) {
            return Err(StoreError::DuplicateOrderNumber(
                order.order_number().to_string(),
            ));
        }

        tables
            .order_numbers
            .insert(order.order_number().to_string(), order.id());
        tables.store_order(order, Version::first());
        Ok(Version::first())
    }

    async fn update_order(&self, order: &Order) -> Result<Version> {
        let mut tables = self.tables.write().await;
        if tables.fail_order_writes {
            return Err(StoreError::Unavailable("order update refused".to_string()));
        }
        let version = tables.check_order_version(order)?;
        tables.store_order(order, version);
        Ok(version)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&order_id).cloned())
    }

    async fn find_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .order_numbers
            .get(order_number)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|o| o.user_id() == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.timestamps().created_at.cmp(&a.timestamps().created_at));
        Ok(orders)
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.payments.iter().any(|p| p.id() == payment.id()) {
            return Err(StoreError::Corrupt(format!(
                "payment {} inserted twice",
                payment.id()
            )));
        }
        if tables
            .payments
            .iter()
            .any(|p| p.idempotency_key() == payment.idempotency_key())
        {
            return Err(StoreError::DuplicateIdempotencyKey(
                payment.idempotency_key().to_string(),
            ));
        }
        tables.payments.push(payment.clone());
        Ok(())
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        let mut tables = self.tables.write().await;
        let index = tables.check_payment_constraints(payment)?;
        tables.payments[index] = payment.clone();
        Ok(())
    }

    async fn update_payment_with_order(&self, payment: &Payment, order: &Order) -> Result<Version> {
        let mut tables = self.tables.write().await;
        if tables.fail_order_writes {
            return Err(StoreError::Unavailable("order update refused".to_string()));
        }
        let index = tables.check_payment_constraints(payment)?;
        let version = tables.check_order_version(order)?;

        tables.payments[index] = payment.clone();
        tables.store_order(order, version);
        Ok(version)
    }

    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>> {
        Ok(self
            .tables
            .read()
            .await
            .payments
            .iter()
            .find(|p| p.id() == payment_id)
            .cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>> {
        Ok(self
            .tables
            .read()
            .await
            .payments
            .iter()
            .find(|p| p.idempotency_key() == key)
            .cloned())
    }

    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        Ok(self
            .tables
            .read()
            .await
            .payments
            .iter()
            .filter(|p| p.order_id() == order_id)
            .cloned()
            .collect())
    }
}
