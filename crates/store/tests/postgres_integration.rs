//! PostgreSQL integration tests
//!
//! These tests start a shared PostgreSQL container and need Docker.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{Money, OrderId, ProductId, UserId};
use domain::{
    Address, Aggregate, Order, OrderDraft, OrderLine, OrderStatus, Payment, PaymentMethod,
    PricingPolicy, Product, ShippingInfo,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    InventoryLedger, OrderRepository, PaymentRepository, PostgresStore, ProductCatalog,
    StoreError, Version,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_fulfillment_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;
    let store = PostgresStore::connect(&info.connection_string, 10)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE payments, order_lines, orders, products")
        .execute(store.pool())
        .await
        .unwrap();

    store
}

fn widget(stock: u32) -> Product {
    Product::new("SKU-001", "Widget", Money::from_cents(1000), stock)
}

fn order(number: &str, user_id: UserId) -> Order {
    let line = OrderLine::from_product(1, &widget(10), 2, Utc::now());
    Order::place(OrderDraft {
        id: OrderId::new(),
        order_number: number.to_string(),
        user_id,
        lines: vec![line],
        shipping: ShippingInfo::new(Address {
            recipient: "Ada".to_string(),
            street: "1 Main St".to_string(),
            city: "Springfield".to_string(),
            postal_code: "12345".to_string(),
            country: "US".to_string(),
            phone: None,
        }),
        payment_method: PaymentMethod::CreditCard,
        discount: Money::zero(),
        pricing: PricingPolicy::default(),
        placed_at: Utc::now(),
    })
    .unwrap()
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn reserve_is_a_conditional_decrement() {
    let store = get_test_store().await;
    store.upsert_product(&widget(5)).await.unwrap();
    let sku = ProductId::new("SKU-001");

    let reservation = store.try_reserve(&sku, 3).await.unwrap();
    assert_eq!(reservation.remaining, 2);

    let result = store.try_reserve(&sku, 3).await;
    assert!(matches!(
        result,
        Err(StoreError::InsufficientStock { available: 2, .. })
    ));

    store.release(&sku, 3).await.unwrap();
    assert_eq!(store.stock(&sku).await.unwrap(), 5);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn concurrent_reservations_never_oversell() {
    let store = get_test_store().await;
    store.upsert_product(&widget(10)).await.unwrap();
    let sku = ProductId::new("SKU-001");

    let attempts = (0..25).map(|_| {
        let store = store.clone();
        let sku = sku.clone();
        tokio::spawn(async move { store.try_reserve(&sku, 1).await })
    });
    let results = futures_util::future::join_all(attempts).await;

    let succeeded = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    assert_eq!(succeeded, 10);
    assert_eq!(store.stock(&sku).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn order_numbers_are_unique() {
    let store = get_test_store().await;
    let user = UserId::new();

    assert_eq!(
        store.insert_order(&order("ORD-1", user)).await.unwrap(),
        Version::first()
    );
    let result = store.insert_order(&order("ORD-1", user)).await;
    assert!(matches!(result, Err(StoreError::DuplicateOrderNumber(_))));

    let lines: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_lines")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(lines, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn update_uses_optimistic_version() {
    let store = get_test_store().await;
    let mut placed = order("ORD-1", UserId::new());
    placed.set_version(store.insert_order(&placed).await.unwrap());
    let stale = placed.clone();

    placed
        .handle(|o| o.transition(OrderStatus::Processing))
        .unwrap();
    assert_eq!(store.update_order(&placed).await.unwrap(), Version::new(2));

    let result = store.update_order(&stale).await;
    assert!(matches!(result, Err(StoreError::ConcurrencyConflict { .. })));

    let loaded = store.find_by_number("ORD-1").await.unwrap().unwrap();
    assert_eq!(loaded.status(), OrderStatus::Processing);
    assert_eq!(loaded.version(), Version::new(2));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn one_captured_payment_per_order() {
    let store = get_test_store().await;
    let placed = order("ORD-1", UserId::new());
    store.insert_order(&placed).await.unwrap();

    let new_payment = |key: &str| {
        Payment::pending(
            placed.id(),
            placed.total(),
            "EUR",
            PaymentMethod::CreditCard,
            key,
            Utc::now(),
        )
        .unwrap()
    };

    let mut first = new_payment("k1");
    let mut second = new_payment("k2");
    store.insert_payment(&first).await.unwrap();
    store.insert_payment(&second).await.unwrap();
    assert!(matches!(
        store.insert_payment(&new_payment("k1")).await,
        Err(StoreError::DuplicateIdempotencyKey(_))
    ));

    first.complete("txn_1", Utc::now()).unwrap();
    store.update_payment(&first).await.unwrap();

    second.complete("txn_2", Utc::now()).unwrap();
    let result = store.update_payment(&second).await;
    assert!(matches!(
        result,
        Err(StoreError::CaptureExists { existing, .. }) if existing == first.id()
    ));

    assert_eq!(store.payments_for_order(placed.id()).await.unwrap().len(), 2);
}
