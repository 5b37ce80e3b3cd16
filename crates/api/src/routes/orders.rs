//! Order endpoints: creation, reads, status transitions and cancellation.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use common::{Money, UserId};
use domain::{Order, OrderStatus, PaymentMethod, ShippingInfo};
use fulfillment::{CartLine, CreateOrderRequest};
use serde::{Deserialize, Serialize};

use super::actor::Caller;
use super::parse_order_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderBody {
    /// Defaults to the calling customer.
    pub user_id: Option<UserId>,
    pub lines: Vec<CartLine>,
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub discount_cents: i64,
}

#[derive(Deserialize)]
pub struct TransitionBody {
    pub status: OrderStatus,
}

#[derive(Deserialize, Default)]
pub struct CancelBody {
    pub reason: Option<String>,
    #[serde(default)]
    pub override_paid: bool,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub order_number: String,
    pub user_id: String,
    pub status: OrderStatus,
    pub payment_status: String,
    pub payment_method: PaymentMethod,
    pub payment_id: Option<String>,
    pub lines: Vec<OrderLineResponse>,
    pub totals: TotalsResponse,
    pub shipping: ShippingInfo,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub version: i64,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub line_no: u32,
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
}

#[derive(Serialize)]
pub struct TotalsResponse {
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub shipping_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        use domain::Aggregate;

        let totals = order.totals();
        let timestamps = order.timestamps();
        Self {
            id: order.id().to_string(),
            order_number: order.order_number().to_string(),
            user_id: order.user_id().to_string(),
            status: order.status(),
            payment_status: order.payment_status().to_string(),
            payment_method: order.payment_method(),
            payment_id: order.payment_id().map(|id| id.to_string()),
            lines: order
                .lines()
                .iter()
                .map(|line| OrderLineResponse {
                    line_no: line.line_no(),
                    product_id: line.product_id().to_string(),
                    name: line.snapshot().name.clone(),
                    quantity: line.quantity(),
                    unit_price_cents: line.unit_price().cents(),
                    line_total_cents: line.line_total().cents(),
                })
                .collect(),
            totals: TotalsResponse {
                subtotal_cents: totals.subtotal.cents(),
                tax_cents: totals.tax.cents(),
                shipping_cents: totals.shipping.cents(),
                discount_cents: totals.discount.cents(),
                total_cents: totals.total.cents(),
            },
            shipping: order.shipping().clone(),
            cancellation_reason: order.cancellation_reason().map(str::to_string),
            created_at: timestamps.created_at,
            shipped_at: timestamps.shipped_at,
            delivered_at: timestamps.delivered_at,
            cancelled_at: timestamps.cancelled_at,
            refunded_at: timestamps.refunded_at,
            version: order.version().as_i64(),
        }
    }
}

// -- Handlers --

/// POST /orders — create an order from a cart.
#[tracing::instrument(skip(state, body))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Json(body): Json<CreateOrderBody>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let user_id = body
        .user_id
        .or_else(|| actor.user_id())
        .ok_or_else(|| ApiError::BadRequest("user_id is required".to_string()))?;

    let request = CreateOrderRequest {
        user_id,
        lines: body.lines,
        shipping: body.shipping,
        payment_method: body.payment_method,
        discount: Money::from_cents(body.discount_cents),
    };

    let order = state.engine.orders.create_order(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders/{id} — load an order.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.engine.orders.get_order(&actor, order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/by-number/{number} — load an order by its order number.
#[tracing::instrument(skip(state))]
pub async fn get_by_number(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(number): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state.engine.orders.find_by_number(&actor, &number).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /users/{id}/orders — a user's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list_for_user(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let user_id = uuid::Uuid::parse_str(&id)
        .map(UserId::from_uuid)
        .map_err(|e| ApiError::BadRequest(format!("Invalid user ID: {e}")))?;

    let orders = state.engine.orders.orders_for_user(&actor, user_id).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// POST /orders/{id}/status — move an order to a new status.
#[tracing::instrument(skip(state, body))]
pub async fn transition(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .engine
        .state_machine
        .transition(&actor, order_id, body.status)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/cancel — cancel an order and return its stock.
#[tracing::instrument(skip(state, body))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let CancelBody {
        reason,
        override_paid,
    } = body.map(|Json(b)| b).unwrap_or_default();

    let order = state
        .engine
        .state_machine
        .cancel(&actor, order_id, reason, override_paid)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/{id}/invoice — plain-text invoice of a settled order.
#[tracing::instrument(skip(state))]
pub async fn invoice(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order_id = parse_order_id(&id)?;
    let document = state.engine.orders.render_invoice(&actor, order_id).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        document,
    ))
}

