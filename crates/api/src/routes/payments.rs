//! Payment endpoints: capture, refund, reconciliation and listing.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::Money;
use domain::{ChargeStatus, Payment, PaymentMethod};
use serde::{Deserialize, Serialize};

use super::actor::Caller;
use super::parse_order_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize, Default)]
pub struct CaptureBody {
    /// Opaque payment details forwarded to the gateway.
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Deserialize, Default)]
pub struct RefundBody {
    /// Defaults to the remaining refundable balance.
    pub amount_cents: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub order_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: ChargeStatus,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub refunded_amount_cents: i64,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl From<&Payment> for PaymentResponse {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id().to_string(),
            order_id: payment.order_id().to_string(),
            amount_cents: payment.amount().cents(),
            currency: payment.currency().to_string(),
            method: payment.method(),
            status: payment.status(),
            transaction_id: payment.transaction_id().map(str::to_string),
            failure_reason: payment.failure_reason().map(str::to_string),
            refunded_amount_cents: payment.refunded_amount().cents(),
            refund_reason: payment.refund_reason().map(str::to_string),
            created_at: payment.created_at(),
            processed_at: payment.processed_at(),
            failed_at: payment.failed_at(),
            refunded_at: payment.refunded_at(),
        }
    }
}

/// POST /orders/{id}/payments — capture the order total.
#[tracing::instrument(skip(state, body))]
pub async fn capture(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    body: Option<Json<CaptureBody>>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let CaptureBody { details } = body.map(|Json(b)| b).unwrap_or_default();

    let payment = state
        .engine
        .payments
        .capture(&actor, order_id, details)
        .await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

/// POST /orders/{id}/refunds — refund part or all of the captured payment.
#[tracing::instrument(skip(state, body))]
pub async fn refund(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    body: Option<Json<RefundBody>>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let RefundBody {
        amount_cents,
        reason,
    } = body.map(|Json(b)| b).unwrap_or_default();

    let payment = state
        .engine
        .payments
        .refund(&actor, order_id, amount_cents.map(Money::from_cents), reason)
        .await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

/// POST /orders/{id}/payments/reconcile — resolve a capture whose outcome is unknown.
#[tracing::instrument(skip(state))]
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<Option<PaymentResponse>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let payment = state.engine.payments.reconcile(&actor, order_id).await?;
    Ok(Json(payment.as_ref().map(PaymentResponse::from)))
}

/// GET /orders/{id}/payments — list payment records, oldest first.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<Vec<PaymentResponse>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let payments = state
        .engine
        .payments
        .payments_for_order(&actor, order_id)
        .await?;
    Ok(Json(payments.iter().map(PaymentResponse::from).collect()))
}
