//! Integration tests for the fulfillment engine on the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use common::{Money, ProductId, UserId};
use domain::{
    AccountStatus, Actor, Address, ChargeStatus, NotificationKind, OrderError, OrderStatus,
    PaymentError, PaymentMethod, PaymentStatus, Product, ShippingInfo,
};
use fulfillment::{
    CartLine, Collaborators, CreateOrderRequest, EngineConfig, ErrorClass, FulfillmentEngine,
    FulfillmentError, InMemoryAccountDirectory, InMemoryNotifier, InMemoryPaymentGateway,
    OrderNumberGenerator, PlainTextInvoiceRenderer, RandomOrderNumbers, SequenceOrderNumbers,
    Stores,
};
use store::{InMemoryStore, InventoryLedger, PaymentRepository};

struct TestHarness {
    engine: FulfillmentEngine,
    store: InMemoryStore,
    gateway: InMemoryPaymentGateway,
    notifier: InMemoryNotifier,
    accounts: InMemoryAccountDirectory,
    user: UserId,
}

impl TestHarness {
    async fn new() -> Self {
        Self::with(EngineConfig::default(), Arc::new(RandomOrderNumbers)).await
    }

    async fn with(config: EngineConfig, order_numbers: Arc<dyn OrderNumberGenerator>) -> Self {
        let store = InMemoryStore::with_products([
            Product::new("SKU-001", "Widget", Money::from_cents(1000), 5),
            Product::new("SKU-002", "Gadget", Money::from_cents(2500), 3),
            Product::new("SKU-003", "Retired", Money::from_cents(500), 10).deactivated(),
        ])
        .await;
        let gateway = InMemoryPaymentGateway::new();
        let notifier = InMemoryNotifier::new();
        let accounts = InMemoryAccountDirectory::strict();
        let user = UserId::new();
        accounts.set_status(user, AccountStatus::Active).await;

        let engine = FulfillmentEngine::new(
            Stores::from_store(store.clone()),
            Collaborators {
                gateway: Arc::new(gateway.clone()),
                notifier: Arc::new(notifier.clone()),
                accounts: Arc::new(accounts.clone()),
                invoices: Arc::new(PlainTextInvoiceRenderer),
                order_numbers,
            },
            config,
        );

        Self {
            engine,
            store,
            gateway,
            notifier,
            accounts,
            user,
        }
    }

    fn customer(&self) -> Actor {
        Actor::Customer(self.user)
    }

    fn request(&self, lines: Vec<CartLine>) -> CreateOrderRequest {
        CreateOrderRequest {
            user_id: self.user,
            lines,
            shipping: ShippingInfo::new(Address {
                recipient: "Ada Lovelace".to_string(),
                street: "1 Analytical Way".to_string(),
                city: "London".to_string(),
                postal_code: "N1 9GU".to_string(),
                country: "GB".to_string(),
                phone: None,
            }),
            payment_method: PaymentMethod::CreditCard,
            discount: Money::zero(),
        }
    }

    async fn place(&self, sku: &str, quantity: u32) -> Result<domain::Order, FulfillmentError> {
        self.engine
            .orders
            .create_order(&self.customer(), self.request(vec![CartLine::new(sku, quantity)]))
            .await
    }

    async fn stock(&self, sku: &str) -> u32 {
        self.store.stock(&ProductId::new(sku)).await.unwrap()
    }
}

fn fast_gateway_config() -> EngineConfig {
    EngineConfig {
        gateway_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    }
}

// Order creation

#[tokio::test]
async fn test_create_order_reserves_stock_and_notifies() {
    let h = TestHarness::new().await;

    let order = h
        .engine
        .orders
        .create_order(
            &h.customer(),
            h.request(vec![CartLine::new("SKU-001", 2), CartLine::new("SKU-002", 1)]),
        )
        .await
        .unwrap();

    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.payment_status(), PaymentStatus::Pending);
    assert_eq!(order.lines().len(), 2);
    assert_eq!(order.totals().subtotal.cents(), 4500);
    assert_eq!(order.total().cents(), 4500);
    assert!(order.order_number().starts_with("ORD-"));

    assert_eq!(h.stock("SKU-001").await, 3);
    assert_eq!(h.stock("SKU-002").await, 2);
    assert_eq!(
        h.notifier.kinds_for(order.id()).await,
        vec![NotificationKind::OrderCreated]
    );

    let loaded = h.engine.orders.get_order(&h.customer(), order.id()).await.unwrap();
    assert_eq!(loaded.order_number(), order.order_number());
}

#[tokio::test]
async fn test_duplicate_cart_lines_are_merged() {
    let h = TestHarness::new().await;

    let order = h
        .engine
        .orders
        .create_order(
            &h.customer(),
            h.request(vec![CartLine::new("SKU-001", 1), CartLine::new("SKU-001", 2)]),
        )
        .await
        .unwrap();

    assert_eq!(order.lines().len(), 1);
    assert_eq!(order.lines()[0].quantity(), 3);
    assert_eq!(h.stock("SKU-001").await, 2);
}

#[tokio::test]
async fn test_pricing_policy_applies_tax_and_shipping() {
    let config = EngineConfig {
        pricing: domain::PricingPolicy {
            tax_rate_bps: 2000,
            shipping_fee: Money::from_cents(499),
            free_shipping_threshold: Some(Money::from_cents(5000)),
        },
        ..EngineConfig::default()
    };
    let h = TestHarness::with(config, Arc::new(RandomOrderNumbers)).await;

    let mut request = h.request(vec![CartLine::new("SKU-001", 2)]);
    request.discount = Money::from_cents(100);
    let order = h
        .engine
        .orders
        .create_order(&h.customer(), request)
        .await
        .unwrap();

    let totals = order.totals();
    assert_eq!(totals.subtotal.cents(), 2000);
    assert_eq!(totals.tax.cents(), 400);
    assert_eq!(totals.shipping.cents(), 499);
    assert_eq!(totals.discount.cents(), 100);
    assert_eq!(totals.total.cents(), 2799);
}

#[tokio::test]
async fn test_discount_covering_the_whole_order_is_rejected() {
    let h = TestHarness::new().await;

    let mut request = h.request(vec![CartLine::new("SKU-001", 2)]);
    request.discount = Money::from_cents(2000);
    let result = h.engine.orders.create_order(&h.customer(), request).await;
    assert!(matches!(
        result,
        Err(FulfillmentError::Order(OrderError::InvalidDiscount { .. }))
    ));
    assert_eq!(h.stock("SKU-001").await, 5);
    assert_eq!(h.store.order_count().await, 0);

    // One cent left to pay is a capturable order.
    let mut request = h.request(vec![CartLine::new("SKU-001", 2)]);
    request.discount = Money::from_cents(1999);
    let order = h
        .engine
        .orders
        .create_order(&h.customer(), request)
        .await
        .unwrap();
    let payment = h
        .engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(payment.amount().cents(), 1);
}

#[tokio::test]
async fn test_empty_cart_is_rejected() {
    let h = TestHarness::new().await;

    let result = h
        .engine
        .orders
        .create_order(&h.customer(), h.request(vec![]))
        .await;
    assert!(matches!(result, Err(FulfillmentError::EmptyCart)));
}

#[tokio::test]
async fn test_unknown_and_inactive_products_are_rejected() {
    let h = TestHarness::new().await;

    assert!(matches!(
        h.place("SKU-404", 1).await,
        Err(FulfillmentError::ProductNotFound(_))
    ));
    assert!(matches!(
        h.place("SKU-003", 1).await,
        Err(FulfillmentError::ProductUnavailable(_))
    ));
    assert_eq!(h.stock("SKU-003").await, 10);
}

#[tokio::test]
async fn test_inactive_accounts_cannot_order() {
    let h = TestHarness::new().await;
    h.accounts.set_status(h.user, AccountStatus::Deactivated).await;

    let result = h.place("SKU-001", 1).await;
    assert!(matches!(result, Err(FulfillmentError::AccountInactive(_))));
    assert_eq!(h.stock("SKU-001").await, 5);

    let stranger = UserId::new();
    let mut request = h.request(vec![CartLine::new("SKU-001", 1)]);
    request.user_id = stranger;
    let result = h
        .engine
        .orders
        .create_order(&Actor::Customer(stranger), request)
        .await;
    assert!(matches!(result, Err(FulfillmentError::AccountInactive(_))));
}

#[tokio::test]
async fn test_customer_cannot_order_for_someone_else() {
    let h = TestHarness::new().await;
    let other = Actor::Customer(UserId::new());

    let result = h
        .engine
        .orders
        .create_order(&other, h.request(vec![CartLine::new("SKU-001", 1)]))
        .await;
    assert!(matches!(result, Err(FulfillmentError::Forbidden { .. })));
}

#[tokio::test]
async fn test_failed_line_releases_earlier_reservations() {
    let h = TestHarness::new().await;

    let result = h
        .engine
        .orders
        .create_order(
            &h.customer(),
            h.request(vec![CartLine::new("SKU-001", 2), CartLine::new("SKU-002", 4)]),
        )
        .await;

    match result {
        Err(FulfillmentError::InsufficientStock {
            product_id,
            requested,
            available,
        }) => {
            assert_eq!(product_id, ProductId::new("SKU-002"));
            assert_eq!(requested, 4);
            assert_eq!(available, 3);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    assert_eq!(h.stock("SKU-001").await, 5);
    assert_eq!(h.stock("SKU-002").await, 3);
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn test_persistence_failure_releases_reservations() {
    let h = TestHarness::new().await;
    h.store.set_fail_order_writes(true).await;

    let result = h.place("SKU-001", 2).await;
    let err = result.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Infrastructure);

    assert_eq!(h.stock("SKU-001").await, 5);
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn test_failed_compensation_is_reported() {
    let h = TestHarness::new().await;
    h.store.set_fail_order_writes(true).await;
    h.store.set_fail_releases(true).await;

    let result = h.place("SKU-001", 2).await;
    match result {
        Err(e @ FulfillmentError::CompensationFailed { .. }) => {
            assert_eq!(e.class(), ErrorClass::Invariant);
        }
        other => panic!("expected CompensationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_order_number_collision_draws_a_new_number() {
    let numbers = SequenceOrderNumbers::new(["ORD-1", "ORD-1", "ORD-2"]);
    let h = TestHarness::with(EngineConfig::default(), Arc::new(numbers)).await;

    let first = h.place("SKU-001", 1).await.unwrap();
    let second = h.place("SKU-001", 1).await.unwrap();

    assert_eq!(first.order_number(), "ORD-1");
    assert_eq!(second.order_number(), "ORD-2");
    assert_eq!(
        h.engine
            .orders
            .find_by_number(&h.customer(), "ORD-2")
            .await
            .unwrap()
            .id(),
        second.id()
    );
}

#[tokio::test]
async fn test_exhausted_order_numbers_release_stock() {
    let config = EngineConfig {
        order_number_attempts: 2,
        ..EngineConfig::default()
    };
    let h = TestHarness::with(config, Arc::new(SequenceOrderNumbers::new(["ORD-1"]))).await;

    h.place("SKU-001", 1).await.unwrap();
    let result = h.place("SKU-001", 2).await;

    assert!(matches!(
        result,
        Err(FulfillmentError::OrderNumberExhausted { attempts: 2 })
    ));
    assert_eq!(h.stock("SKU-001").await, 4);
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_the_order() {
    let h = TestHarness::new().await;
    h.notifier.set_fail(true).await;

    let order = h.place("SKU-001", 1).await.unwrap();
    assert_eq!(h.store.order_count().await, 1);
    assert!(h.notifier.kinds_for(order.id()).await.is_empty());
}

#[tokio::test]
async fn test_slow_notifier_is_bounded() {
    let config = EngineConfig {
        notification_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let h = TestHarness::with(config, Arc::new(RandomOrderNumbers)).await;
    h.notifier.set_delay(Some(Duration::from_secs(5))).await;

    let started = std::time::Instant::now();
    let order = h.place("SKU-001", 1).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    // The order is committed even though its notification was dropped.
    assert!(h.notifier.kinds_for(order.id()).await.is_empty());
    let stored = h.engine.orders.get_order(&Actor::Admin, order.id()).await.unwrap();
    assert_eq!(stored.status(), OrderStatus::Pending);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_orders_never_oversell() {
    let h = TestHarness::new().await;

    let attempts = (0..20).map(|_| {
        let engine = h.engine.clone();
        let actor = h.customer();
        let request = h.request(vec![CartLine::new("SKU-001", 1)]);
        tokio::spawn(async move { engine.orders.create_order(&actor, request).await })
    });
    let results = futures_util::future::join_all(attempts).await;

    let succeeded = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    let out_of_stock = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(FulfillmentError::InsufficientStock { .. }))))
        .count();

    assert_eq!(succeeded, 5);
    assert_eq!(out_of_stock, 15);
    assert_eq!(h.stock("SKU-001").await, 0);
    assert_eq!(h.store.order_count().await, 5);
}

// State machine

#[tokio::test]
async fn test_cancel_restores_stock_exactly_once() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 3).await.unwrap();
    assert_eq!(h.stock("SKU-001").await, 2);

    let cancelled = h
        .engine
        .state_machine
        .cancel(&h.customer(), order.id(), Some("changed my mind".into()), false)
        .await
        .unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason(), Some("changed my mind"));
    assert!(cancelled.timestamps().cancelled_at.is_some());
    assert_eq!(h.stock("SKU-001").await, 5);

    let again = h
        .engine
        .state_machine
        .cancel(&Actor::Admin, order.id(), None, true)
        .await;
    assert!(matches!(again, Err(FulfillmentError::AlreadyCancelled)));
    assert_eq!(h.stock("SKU-001").await, 5);

    assert_eq!(
        h.notifier.kinds_for(order.id()).await,
        vec![NotificationKind::OrderCreated, NotificationKind::OrderCancelled]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cancels_release_once() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 3).await.unwrap();

    let attempts = (0..4).map(|_| {
        let engine = h.engine.clone();
        let order_id = order.id();
        tokio::spawn(async move {
            engine
                .state_machine
                .cancel(&Actor::Admin, order_id, None, false)
                .await
        })
    });
    let results = futures_util::future::join_all(attempts).await;

    let succeeded = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    assert_eq!(succeeded, 1);
    assert_eq!(h.stock("SKU-001").await, 5);
}

#[tokio::test]
async fn test_admin_walks_the_shipping_lifecycle() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 1).await.unwrap();

    for status in [
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Completed,
    ] {
        let updated = h
            .engine
            .state_machine
            .transition(&Actor::Admin, order.id(), status)
            .await
            .unwrap();
        assert_eq!(updated.status(), status);
    }

    let order = h.engine.orders.get_order(&Actor::Admin, order.id()).await.unwrap();
    assert!(order.timestamps().shipped_at.is_some());
    assert!(order.timestamps().delivered_at.is_some());
    assert_eq!(h.stock("SKU-001").await, 4);

    let kinds = h.notifier.kinds_for(order.id()).await;
    assert_eq!(kinds.len(), 5);
    assert_eq!(
        kinds[1],
        NotificationKind::OrderStatusChanged {
            old: OrderStatus::Pending,
            new: OrderStatus::Processing,
        }
    );
}

#[tokio::test]
async fn test_illegal_transitions_leave_status_unchanged() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 1).await.unwrap();
    let sm = &h.engine.state_machine;

    sm.transition(&Actor::Admin, order.id(), OrderStatus::Shipped)
        .await
        .unwrap();
    let result = sm
        .transition(&Actor::Admin, order.id(), OrderStatus::Pending)
        .await;
    assert!(matches!(
        result,
        Err(FulfillmentError::IllegalTransition {
            from: OrderStatus::Shipped,
            to: OrderStatus::Pending,
        })
    ));

    sm.transition(&Actor::Admin, order.id(), OrderStatus::Delivered)
        .await
        .unwrap();
    let result = sm.cancel(&Actor::Admin, order.id(), None, true).await;
    assert!(matches!(result, Err(FulfillmentError::IllegalTransition { .. })));

    let order = h.engine.orders.get_order(&Actor::Admin, order.id()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Delivered);
    assert_eq!(h.stock("SKU-001").await, 4);
}

#[tokio::test]
async fn test_customers_cannot_drive_transitions() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 1).await.unwrap();

    let result = h
        .engine
        .state_machine
        .transition(&h.customer(), order.id(), OrderStatus::Shipped)
        .await;
    assert!(matches!(result, Err(FulfillmentError::Forbidden { .. })));

    let result = h
        .engine
        .state_machine
        .cancel(&Actor::Customer(UserId::new()), order.id(), None, false)
        .await;
    assert!(matches!(result, Err(FulfillmentError::Forbidden { .. })));
    assert_eq!(h.stock("SKU-001").await, 4);
}

#[tokio::test]
async fn test_paid_order_cancellation_needs_admin_override() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 2).await.unwrap();
    h.engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();

    let result = h
        .engine
        .state_machine
        .cancel(&h.customer(), order.id(), None, false)
        .await;
    assert!(matches!(
        result,
        Err(FulfillmentError::Order(OrderError::PaidCancellation))
    ));

    let result = h
        .engine
        .state_machine
        .cancel(&h.customer(), order.id(), None, true)
        .await;
    assert!(matches!(result, Err(FulfillmentError::Forbidden { .. })));

    let cancelled = h
        .engine
        .state_machine
        .cancel(&Actor::Admin, order.id(), Some("fraud".into()), true)
        .await
        .unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    assert_eq!(h.stock("SKU-001").await, 5);
}

#[tokio::test]
async fn test_release_failure_is_an_invariant_violation() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 2).await.unwrap();
    h.store.set_fail_releases(true).await;

    let result = h
        .engine
        .state_machine
        .cancel(&h.customer(), order.id(), None, false)
        .await;
    match result {
        Err(e @ FulfillmentError::ReleaseIncomplete { .. }) => {
            assert_eq!(e.class(), ErrorClass::Invariant);
        }
        other => panic!("expected ReleaseIncomplete, got {other:?}"),
    }

    let order = h.engine.orders.get_order(&Actor::Admin, order.id()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(order.unreleased_stock(), &[ProductId::new("SKU-001")]);
}

#[tokio::test]
async fn test_cancel_again_retries_unreleased_stock() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 2).await.unwrap();
    assert_eq!(h.stock("SKU-001").await, 3);
    h.store.set_fail_releases(true).await;

    let first = h
        .engine
        .state_machine
        .cancel(&h.customer(), order.id(), None, false)
        .await;
    assert!(matches!(first, Err(FulfillmentError::ReleaseIncomplete { .. })));
    assert_eq!(h.stock("SKU-001").await, 3);

    // Still failing: the line stays outstanding.
    let again = h
        .engine
        .state_machine
        .cancel(&Actor::Admin, order.id(), None, false)
        .await;
    assert!(matches!(again, Err(FulfillmentError::ReleaseIncomplete { .. })));

    h.store.set_fail_releases(false).await;
    let retried = h
        .engine
        .state_machine
        .cancel(&Actor::Admin, order.id(), None, false)
        .await
        .unwrap();
    assert!(retried.unreleased_stock().is_empty());
    assert_eq!(h.stock("SKU-001").await, 5);

    // Nothing left to return, so the next cancel is a plain duplicate.
    let result = h
        .engine
        .state_machine
        .cancel(&Actor::Admin, order.id(), None, false)
        .await;
    assert!(matches!(result, Err(FulfillmentError::AlreadyCancelled)));
    assert_eq!(h.stock("SKU-001").await, 5);
}

#[tokio::test]
async fn test_concurrent_release_retries_return_stock_once() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 2).await.unwrap();
    h.store.set_fail_releases(true).await;
    let _ = h
        .engine
        .state_machine
        .cancel(&h.customer(), order.id(), None, false)
        .await;
    h.store.set_fail_releases(false).await;

    let attempts = (0..8).map(|_| {
        let state_machine = h.engine.state_machine.clone();
        let order_id = order.id();
        tokio::spawn(async move {
            state_machine
                .cancel(&Actor::Admin, order_id, None, false)
                .await
        })
    });
    let results = futures_util::future::join_all(attempts).await;

    let succeeded = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(h.stock("SKU-001").await, 5);
}

// Payments

#[tokio::test]
async fn test_capture_is_idempotent() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 2).await.unwrap();

    let first = h
        .engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();
    let second = h
        .engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(first.status(), ChargeStatus::Completed);
    assert_eq!(first.amount().cents(), 2000);
    assert_eq!(h.gateway.charge_count().await, 1);

    let records = h.store.payments_for_order(order.id()).await.unwrap();
    assert_eq!(records.len(), 1);

    let order = h.engine.orders.get_order(&h.customer(), order.id()).await.unwrap();
    assert_eq!(order.payment_status(), PaymentStatus::Paid);
    assert_eq!(order.payment_id(), Some(first.id()));
    assert!(
        h.notifier
            .kinds_for(order.id())
            .await
            .contains(&NotificationKind::PaymentCaptured)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_captures_charge_once() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 2).await.unwrap();

    let attempts = (0..4).map(|_| {
        let engine = h.engine.clone();
        let actor = h.customer();
        let order_id = order.id();
        tokio::spawn(async move {
            engine
                .payments
                .capture(&actor, order_id, serde_json::Value::Null)
                .await
        })
    });
    let results = futures_util::future::join_all(attempts).await;

    assert!(results.iter().any(|r| matches!(r, Ok(Ok(_)))));
    for result in &results {
        assert!(matches!(
            result,
            Ok(Ok(_)) | Ok(Err(FulfillmentError::PaymentOutcomeUnknown { .. }))
        ));
    }

    let completed = h
        .store
        .payments_for_order(order.id())
        .await
        .unwrap()
        .into_iter()
        .filter(|p| p.status() == ChargeStatus::Completed)
        .count();
    assert_eq!(completed, 1);
    assert_eq!(h.gateway.charge_count().await, 1);
}

#[tokio::test]
async fn test_declined_capture_allows_retry_with_new_key() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 1).await.unwrap();
    h.gateway.set_decline(Some("insufficient funds")).await;

    let result = h
        .engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await;
    match result {
        Err(e @ FulfillmentError::PaymentDeclined { .. }) => {
            assert_eq!(e.class(), ErrorClass::Validation);
        }
        other => panic!("expected PaymentDeclined, got {other:?}"),
    }

    let order_after = h.engine.orders.get_order(&h.customer(), order.id()).await.unwrap();
    assert_eq!(order_after.payment_status(), PaymentStatus::Pending);

    h.gateway.set_decline(None).await;
    let payment = h
        .engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();
    assert!(payment.idempotency_key().ends_with(":capture:2"));

    let records = h
        .engine
        .payments
        .payments_for_order(&h.customer(), order.id())
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status(), ChargeStatus::Failed);
    assert_eq!(records[0].failure_reason(), Some("insufficient funds"));
    assert_eq!(records[1].status(), ChargeStatus::Completed);
}

#[tokio::test]
async fn test_lost_capture_response_is_recovered_by_status_query() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 1).await.unwrap();
    h.gateway.set_lose_capture_responses(true).await;

    let payment = h
        .engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();

    assert_eq!(payment.status(), ChargeStatus::Completed);
    assert!(payment.transaction_id().is_some());
    assert_eq!(h.gateway.charge_count().await, 1);
}

#[tokio::test]
async fn test_capture_timeout_is_unknown_until_reconciled() {
    let h = TestHarness::with(fast_gateway_config(), Arc::new(RandomOrderNumbers)).await;
    let order = h.place("SKU-001", 1).await.unwrap();
    h.gateway
        .set_capture_delay(Some(Duration::from_millis(500)))
        .await;

    let result = h
        .engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, FulfillmentError::PaymentOutcomeUnknown { .. }));
    assert_eq!(err.class(), ErrorClass::Transient);

    let records = h.store.payments_for_order(order.id()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status(), ChargeStatus::Pending);

    h.gateway.set_capture_delay(None).await;
    let payment = h
        .engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();

    assert_eq!(payment.id(), records[0].id());
    assert_eq!(payment.idempotency_key(), records[0].idempotency_key());
    assert_eq!(h.gateway.charge_count().await, 1);
    assert_eq!(h.store.payment_count().await, 1);
}

#[tokio::test]
async fn test_reconcile_reports_pending_record() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 1).await.unwrap();

    assert!(
        h.engine
            .payments
            .reconcile(&Actor::Admin, order.id())
            .await
            .unwrap()
            .is_none()
    );

    h.gateway.set_unavailable(true).await;
    let result = h
        .engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await;
    assert!(matches!(
        result,
        Err(FulfillmentError::PaymentOutcomeUnknown { .. })
    ));

    h.gateway.set_unavailable(false).await;
    let pending = h
        .engine
        .payments
        .reconcile(&Actor::Admin, order.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.status(), ChargeStatus::Pending);

    let result = h.engine.payments.reconcile(&h.customer(), order.id()).await;
    assert!(matches!(result, Err(FulfillmentError::Forbidden { .. })));
}

#[tokio::test]
async fn test_refunds_are_bounded_by_captured_amount() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 2).await.unwrap();
    let payment = h
        .engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();
    h.engine
        .state_machine
        .transition(&Actor::Admin, order.id(), OrderStatus::Delivered)
        .await
        .unwrap();

    let partial = h
        .engine
        .payments
        .refund(&Actor::Admin, order.id(), Some(Money::from_cents(500)), None)
        .await
        .unwrap();
    assert_eq!(partial.status(), ChargeStatus::PartiallyRefunded);
    assert_eq!(partial.refunded_amount().cents(), 500);

    let result = h
        .engine
        .payments
        .refund(&Actor::Admin, order.id(), Some(Money::from_cents(1600)), None)
        .await;
    assert!(matches!(
        result,
        Err(FulfillmentError::Payment(PaymentError::ExceedsRefundable { .. }))
    ));

    let rest = h
        .engine
        .payments
        .refund(&Actor::Admin, order.id(), None, Some("returned".into()))
        .await
        .unwrap();
    assert_eq!(rest.status(), ChargeStatus::Refunded);
    assert_eq!(rest.refunded_amount(), payment.amount());

    let result = h
        .engine
        .payments
        .refund(&Actor::Admin, order.id(), Some(Money::from_cents(1)), None)
        .await;
    assert!(matches!(result, Err(FulfillmentError::NotRefundable { .. })));

    let order = h.engine.orders.get_order(&Actor::Admin, order.id()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Delivered);
    assert_eq!(order.payment_status(), PaymentStatus::Refunded);
    assert!(order.timestamps().refunded_at.is_some());
    assert_eq!(
        h.gateway
            .refunded(payment.transaction_id().unwrap())
            .await
            .cents(),
        2000
    );
}

#[tokio::test]
async fn test_refund_requires_admin_and_capture() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 1).await.unwrap();

    let result = h
        .engine
        .payments
        .refund(&Actor::Admin, order.id(), None, None)
        .await;
    assert!(matches!(result, Err(FulfillmentError::NotRefundable { .. })));

    h.engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();
    let result = h
        .engine
        .payments
        .refund(&h.customer(), order.id(), None, None)
        .await;
    assert!(matches!(result, Err(FulfillmentError::Forbidden { .. })));
}

#[tokio::test]
async fn test_refund_before_shipping_cancels_and_restocks() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 3).await.unwrap();
    h.engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(h.stock("SKU-001").await, 2);

    h.engine
        .payments
        .refund(&Actor::Admin, order.id(), None, Some("out of area".into()))
        .await
        .unwrap();

    let order = h.engine.orders.get_order(&Actor::Admin, order.id()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(order.payment_status(), PaymentStatus::Refunded);
    assert_eq!(order.cancellation_reason(), Some("out of area"));
    assert_eq!(h.stock("SKU-001").await, 5);
}

#[tokio::test]
async fn test_customer_cancel_during_refund_keeps_the_refund() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 2).await.unwrap();
    h.engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();
    h.notifier.set_delay(Some(Duration::from_millis(300))).await;

    let payments = h.engine.payments.clone();
    let order_id = order.id();
    let refund = tokio::spawn(async move {
        payments
            .refund(&Actor::Admin, order_id, Some(Money::from_cents(500)), None)
            .await
    });

    // The refund is recorded and waiting on its notification by now.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let cancelled = h
        .engine
        .state_machine
        .cancel(&h.customer(), order_id, Some("changed my mind".into()), false)
        .await
        .unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);

    let payment = refund.await.unwrap().unwrap();
    assert_eq!(payment.refunded_amount().cents(), 500);
    assert_eq!(payment.status(), ChargeStatus::PartiallyRefunded);

    let order = h.engine.orders.get_order(&Actor::Admin, order_id).await.unwrap();
    assert_eq!(order.payment_status(), PaymentStatus::PartiallyRefunded);
    assert_eq!(order.cancellation_reason(), Some("changed my mind"));
    assert_eq!(h.stock("SKU-001").await, 5);
}

#[tokio::test]
async fn test_refund_reports_failed_follow_up_cancellation() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 2).await.unwrap();
    h.engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();
    h.store.set_fail_releases(true).await;

    let result = h
        .engine
        .payments
        .refund(&Actor::Admin, order.id(), Some(Money::from_cents(500)), None)
        .await;
    match result {
        Err(e @ FulfillmentError::RefundedNotCancelled { .. }) => {
            assert_eq!(e.class(), ErrorClass::Invariant);
        }
        other => panic!("expected RefundedNotCancelled, got {other:?}"),
    }

    // The refund itself is on record and must not be repeated.
    let payments = h.store.payments_for_order(order.id()).await.unwrap();
    assert_eq!(payments[0].refunded_amount().cents(), 500);
    let order = h.engine.orders.get_order(&Actor::Admin, order.id()).await.unwrap();
    assert_eq!(order.payment_status(), PaymentStatus::PartiallyRefunded);
    assert_eq!(order.status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_refund_timeout_leaves_state_unchanged() {
    let h = TestHarness::with(fast_gateway_config(), Arc::new(RandomOrderNumbers)).await;
    let order = h.place("SKU-001", 1).await.unwrap();
    h.engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();
    h.gateway
        .set_refund_delay(Some(Duration::from_millis(500)))
        .await;

    let result = h
        .engine
        .payments
        .refund(&Actor::Admin, order.id(), None, None)
        .await;
    assert!(matches!(
        result,
        Err(FulfillmentError::RefundOutcomeUnknown { .. })
    ));

    let order = h.engine.orders.get_order(&Actor::Admin, order.id()).await.unwrap();
    assert_eq!(order.payment_status(), PaymentStatus::Paid);
    assert_eq!(order.status(), OrderStatus::Pending);
}

#[tokio::test]
async fn test_declined_refund_is_reported() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 1).await.unwrap();
    h.engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();
    h.gateway.set_decline_refunds(true).await;

    let result = h
        .engine
        .payments
        .refund(&Actor::Admin, order.id(), None, None)
        .await;
    assert!(matches!(result, Err(FulfillmentError::RefundDeclined { .. })));
}

// Invoices

#[tokio::test]
async fn test_invoice_requires_settled_payment() {
    let h = TestHarness::new().await;
    let order = h.place("SKU-001", 2).await.unwrap();

    let result = h.engine.orders.render_invoice(&h.customer(), order.id()).await;
    assert!(matches!(result, Err(FulfillmentError::NotFinalized(_))));

    h.engine
        .payments
        .capture(&h.customer(), order.id(), serde_json::Value::Null)
        .await
        .unwrap();
    let invoice = h
        .engine
        .orders
        .render_invoice(&h.customer(), order.id())
        .await
        .unwrap();
    let text = String::from_utf8(invoice).unwrap();

    assert!(text.contains(order.order_number()));
    assert!(text.contains("Widget"));
    assert!(text.contains("20.00"));
}

// End to end

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_buyers_one_wins_then_cancel_blocks_capture() {
    let h = TestHarness::new().await;

    let attempts = (0..2).map(|_| {
        let engine = h.engine.clone();
        let actor = h.customer();
        let request = h.request(vec![CartLine::new("SKU-001", 3)]);
        tokio::spawn(async move { engine.orders.create_order(&actor, request).await })
    });
    let results: Vec<_> = futures_util::future::join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(FulfillmentError::InsufficientStock { .. })
    )));
    assert_eq!(h.stock("SKU-001").await, 2);

    let order_id = winners[0].id();
    h.engine
        .state_machine
        .cancel(&h.customer(), order_id, None, false)
        .await
        .unwrap();
    assert_eq!(h.stock("SKU-001").await, 5);

    let result = h
        .engine
        .payments
        .capture(&h.customer(), order_id, serde_json::Value::Null)
        .await;
    assert!(matches!(
        result,
        Err(FulfillmentError::InvalidState {
            status: OrderStatus::Cancelled,
            ..
        })
    ));
    assert_eq!(h.gateway.charge_count().await, 0);
}
