//! Wiring of stores, collaborators and services.

use std::sync::Arc;

use store::{InventoryLedger, OrderRepository, PaymentRepository, ProductCatalog};

use crate::config::EngineConfig;
use crate::fulfillment::OrderFulfillmentService;
use crate::notifications::{LoggingNotifier, NotificationDispatcher, Notifier};
use crate::order_number::{OrderNumberGenerator, RandomOrderNumbers};
use crate::payments::PaymentService;
use crate::services::{
    AccountDirectory, InMemoryAccountDirectory, InMemoryPaymentGateway, InvoiceRenderer,
    PaymentGateway, PlainTextInvoiceRenderer,
};
use crate::state_machine::OrderStateMachine;

/// Storage handles used by the engine.
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn InventoryLedger>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub orders: Arc<dyn OrderRepository>,
    pub payments: Arc<dyn PaymentRepository>,
}

impl Stores {
    /// Uses one store for every contract.
    pub fn from_store<S>(store: S) -> Self
    where
        S: InventoryLedger + ProductCatalog + OrderRepository + PaymentRepository + Clone + 'static,
    {
        Self {
            ledger: Arc::new(store.clone()),
            catalog: Arc::new(store.clone()),
            orders: Arc::new(store.clone()),
            payments: Arc::new(store),
        }
    }
}

/// External collaborators used by the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub invoices: Arc<dyn InvoiceRenderer>,
    pub order_numbers: Arc<dyn OrderNumberGenerator>,
}

impl Default for Collaborators {
    /// In-memory gateway, log-only notifications, every account active.
    fn default() -> Self {
        Self {
            gateway: Arc::new(InMemoryPaymentGateway::new()),
            notifier: Arc::new(LoggingNotifier),
            accounts: Arc::new(InMemoryAccountDirectory::permissive()),
            invoices: Arc::new(PlainTextInvoiceRenderer),
            order_numbers: Arc::new(RandomOrderNumbers),
        }
    }
}

/// The three engine services, sharing stores and configuration.
#[derive(Clone)]
pub struct FulfillmentEngine {
    pub orders: OrderFulfillmentService,
    pub state_machine: OrderStateMachine,
    pub payments: PaymentService,
    config: Arc<EngineConfig>,
}

impl FulfillmentEngine {
    pub fn new(stores: Stores, collaborators: Collaborators, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let notifications =
            NotificationDispatcher::new(collaborators.notifier, config.notification_timeout);

        let state_machine = OrderStateMachine::new(
            stores.orders.clone(),
            stores.ledger.clone(),
            notifications.clone(),
            config.clone(),
        );

        let orders = OrderFulfillmentService::new(
            stores.ledger,
            stores.catalog,
            stores.orders.clone(),
            collaborators.accounts,
            collaborators.invoices,
            collaborators.order_numbers,
            notifications.clone(),
            config.clone(),
        );

        let payments = PaymentService::new(
            stores.orders,
            stores.payments,
            collaborators.gateway,
            state_machine.clone(),
            notifications,
            config.clone(),
        );

        Self {
            orders,
            state_machine,
            payments,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
