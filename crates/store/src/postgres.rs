use async_trait::async_trait;
use common::{Money, OrderId, PaymentId, ProductId, UserId};
use domain::{Aggregate, Order, Payment, Product};
use sqlx::{PgConnection, PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use uuid::Uuid;

use crate::{
    InventoryLedger, OrderRepository, PaymentRepository, ProductCatalog, Reservation, Result,
    StoreError, Version,
};

const CAPTURED_STATUSES: &str = "('completed', 'partially_refunded', 'refunded')";

/// PostgreSQL-backed store implementing every storage contract.
///
/// Stock reservation is a single conditional `UPDATE`, so the database row
/// lock serializes concurrent reservations for the same product.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` with a pool of at most `max_connections`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let document: serde_json::Value = row.try_get("document")?;
        let mut order: Order = serde_json::from_value(document)?;
        order.set_version(Version::new(row.try_get("version")?));
        Ok(order)
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let record: serde_json::Value = row.try_get("record")?;
        Ok(serde_json::from_value(record)?)
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::new(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            stock: to_u32(row.try_get("stock")?)?,
            active: row.try_get("active")?,
        })
    }

    async fn write_order_update(conn: &mut PgConnection, order: &Order) -> Result<Version> {
        let next = order.version().next();
        let mut stored = order.clone();
        stored.set_version(next);
        let document = serde_json::to_value(&stored)?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, payment_status = $2, version = $3, document = $4, updated_at = $5
            WHERE id = $6 AND version = $7
            "#,
        )
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(next.as_i64())
        .bind(document)
        .bind(order.updated_at())
        .bind(order.id().as_uuid())
        .bind(order.version().as_i64())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                    .bind(order.id().as_uuid())
                    .fetch_optional(&mut *conn)
                    .await?;

            return Err(match actual {
                None => StoreError::OrderNotFound(order.id()),
                Some(actual) => StoreError::ConcurrencyConflict {
                    order_id: order.id(),
                    expected: order.version(),
                    actual: Version::new(actual),
                },
            });
        }

        Ok(next)
    }

    async fn write_payment_update(
        conn: &mut PgConnection,
        payment: &Payment,
    ) -> std::result::Result<u64, sqlx::Error> {
        let record = serde_json::to_value(payment).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let result = sqlx::query(
            "UPDATE payments SET transaction_id = $1, status = $2, record = $3 WHERE id = $4",
        )
        .bind(payment.transaction_id())
        .bind(payment.status().as_str())
        .bind(record)
        .bind(payment.id().as_uuid())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Translates a failed payment write into a store error.
    ///
    /// Runs on the pool, outside any aborted transaction.
    async fn payment_write_error(&self, error: sqlx::Error, payment: &Payment) -> StoreError {
        match constraint(&error) {
            Some("payments_idempotency_key_key") => {
                StoreError::DuplicateIdempotencyKey(payment.idempotency_key().to_string())
            }
            Some("payments_transaction_id_key") => StoreError::DuplicateTransaction(
                payment.transaction_id().unwrap_or_default().to_string(),
            ),
            Some("one_captured_payment_per_order") => {
                let existing: std::result::Result<Option<Uuid>, sqlx::Error> =
                    sqlx::query_scalar(&format!(
                        "SELECT id FROM payments WHERE order_id = $1 AND id <> $2 AND status IN {CAPTURED_STATUSES}"
                    ))
                    .bind(payment.order_id().as_uuid())
                    .bind(payment.id().as_uuid())
                    .fetch_optional(&self.pool)
                    .await;

                match existing {
                    Ok(Some(existing)) => StoreError::CaptureExists {
                        order_id: payment.order_id(),
                        existing: PaymentId::from_uuid(existing),
                    },
                    Ok(None) => StoreError::Database(error),
                    Err(lookup) => StoreError::Database(lookup),
                }
            }
            _ => StoreError::Database(error),
        }
    }
}

fn constraint(error: &sqlx::Error) -> Option<&str> {
    match error {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

fn to_i32(quantity: u32) -> Result<i32> {
    i32::try_from(quantity).map_err(|_| StoreError::Corrupt(format!("quantity {quantity} out of range")))
}

fn to_u32(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative stock {value}")))
}

#[async_trait]
impl InventoryLedger for PostgresStore {
    async fn try_reserve(&self, product_id: &ProductId, quantity: u32) -> Result<Reservation> {
        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock = stock - $1, updated_at = NOW()
            WHERE id = $2 AND stock >= $1
            RETURNING stock
            "#,
        )
        .bind(to_i32(quantity)?)
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(remaining) = remaining {
            return Ok(Reservation {
                product_id: product_id.clone(),
                quantity,
                remaining: to_u32(remaining)?,
            });
        }

        // Nothing was decremented; report why.
        match self.stock(product_id).await {
            Ok(available) => Err(StoreError::InsufficientStock {
                product_id: product_id.clone(),
                requested: quantity,
                available,
            }),
            Err(e) => Err(e),
        }
    }

    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<()> {
        let result =
            sqlx::query("UPDATE products SET stock = stock + $1, updated_at = NOW() WHERE id = $2")
                .bind(to_i32(quantity)?)
                .bind(product_id.as_str())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ProductNotFound(product_id.clone()));
        }
        Ok(())
    }

    async fn stock(&self, product_id: &ProductId) -> Result<u32> {
        let stock: Option<i32> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(product_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        to_u32(stock.ok_or_else(|| StoreError::ProductNotFound(product_id.clone()))?)
    }
}

#[async_trait]
impl ProductCatalog for PostgresStore {
    async fn product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, name, description, unit_price_cents, stock, active FROM products WHERE id = $1",
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn upsert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, unit_price_cents, stock, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                description = EXCLUDED.description,
                unit_price_cents = EXCLUDED.unit_price_cents,
                stock = EXCLUDED.stock,
                active = EXCLUDED.active,
                updated_at = NOW()
            "#,
        )
        .bind(product.id.as_str())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.unit_price.cents())
        .bind(to_i32(product.stock)?)
        .bind(product.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<Version> {
        let mut stored = order.clone();
        stored.set_version(Version::first());
        let document = serde_json::to_value(&stored)?;

        // Order and lines become visible together or not at all.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, user_id, status, payment_status, total_cents, version, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.order_number())
        .bind(order.user_id().as_uuid())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.total().cents())
        .bind(Version::first().as_i64())
        .bind(document)
        .bind(order.timestamps().created_at)
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| match constraint(&e) {
            Some("orders_order_number_key") => {
                StoreError::DuplicateOrderNumber(order.order_number().to_string())
            }
            Some("orders_pkey") => StoreError::DuplicateOrder(order.id()),
            _ => StoreError::Database(e),
        })?;

        for line in order.lines() {
            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, line_no, product_id, quantity, unit_price_cents, line_total_cents, snapshot)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(order.id().as_uuid())
            .bind(to_i32(line.line_no())?)
            .bind(line.product_id().as_str())
            .bind(to_i32(line.quantity())?)
            .bind(line.unit_price().cents())
            .bind(line.line_total().cents())
            .bind(serde_json::to_value(line.snapshot())?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(order_id = %order.id(), order_number = order.order_number(), "Order row inserted");
        Ok(Version::first())
    }

    async fn update_order(&self, order: &Order) -> Result<Version> {
        let mut conn = self.pool.acquire().await?;
        Self::write_order_update(&mut conn, order).await
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT document, version FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn find_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT document, version FROM orders WHERE order_number = $1")
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT document, version FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }
}

#[async_trait]
impl PaymentRepository for PostgresStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, idempotency_key, transaction_id, status, record, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(payment.id().as_uuid())
        .bind(payment.order_id().as_uuid())
        .bind(payment.idempotency_key())
        .bind(payment.transaction_id())
        .bind(payment.status().as_str())
        .bind(serde_json::to_value(payment)?)
        .bind(payment.created_at())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(e) => Err(self.payment_write_error(e, payment).await),
        }
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let written = Self::write_payment_update(&mut conn, payment).await;
        drop(conn);

        match written {
            Ok(0) => Err(StoreError::PaymentNotFound(payment.id())),
            Ok(_) => Ok(()),
            Err(e) => Err(self.payment_write_error(e, payment).await),
        }
    }

    async fn update_payment_with_order(&self, payment: &Payment, order: &Order) -> Result<Version> {
        let mut tx = self.pool.begin().await?;

        match Self::write_payment_update(&mut tx, payment).await {
            Ok(0) => return Err(StoreError::PaymentNotFound(payment.id())),
            Ok(_) => {}
            Err(e) => {
                tx.rollback().await?;
                return Err(self.payment_write_error(e, payment).await);
            }
        }

        let version = Self::write_order_update(&mut tx, order).await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>> {
        let row = sqlx::query("SELECT record FROM payments WHERE id = $1")
            .bind(payment_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>> {
        let row = sqlx::query("SELECT record FROM payments WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let rows = sqlx::query("SELECT record FROM payments WHERE order_id = $1 ORDER BY created_at ASC")
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }
}
