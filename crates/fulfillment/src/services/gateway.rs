//! Payment gateway contract and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Money, OrderId};
use domain::PaymentMethod;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// A capture request. The idempotency key identifies the charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub idempotency_key: String,
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: String,
    pub method: PaymentMethod,
    /// Opaque payment details, passed through to the gateway.
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaptureOutcome {
    Captured { transaction_id: String },
    Declined { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefundOutcome {
    Refunded,
    Declined { reason: String },
}

/// What the gateway knows about an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GatewayStatus {
    Succeeded { transaction_id: String },
    Failed { reason: String },
    /// Accepted but not settled yet.
    Pending,
    NotFound,
}

/// The gateway could not be reached or did not answer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Gateway timed out")]
    Timeout,

    #[error("Gateway transport error: {0}")]
    Transport(String),
}

/// External payment processor.
///
/// `capture` must be idempotent per key: repeating a key returns the first
/// outcome and never charges twice.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn capture(&self, request: &ChargeRequest) -> Result<CaptureOutcome, GatewayError>;

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Money,
    ) -> Result<RefundOutcome, GatewayError>;

    async fn query_status(&self, idempotency_key: &str) -> Result<GatewayStatus, GatewayError>;
}

#[derive(Debug)]
struct Charge {
    outcome: CaptureOutcome,
    amount: Money,
    refunded: Money,
}

#[derive(Debug, Default)]
struct GatewayState {
    charges: HashMap<String, Charge>,
    transactions: HashMap<String, String>,
    next_txn: u32,
    charge_count: usize,
    decline_reason: Option<String>,
    decline_refunds: bool,
    capture_delay: Option<Duration>,
    refund_delay: Option<Duration>,
    lose_capture_responses: bool,
    unavailable: bool,
}

/// In-memory gateway for testing.
///
/// Charges are keyed by idempotency key. The toggles simulate declines,
/// slow calls, outages and charges whose response is lost in transit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines new charges with `reason`, or accepts them again on `None`.
    pub async fn set_decline(&self, reason: Option<&str>) {
        self.state.lock().await.decline_reason = reason.map(str::to_string);
    }

    pub async fn set_decline_refunds(&self, decline: bool) {
        self.state.lock().await.decline_refunds = decline;
    }

    /// Sleeps before handling a capture.
    pub async fn set_capture_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.capture_delay = delay;
    }

    /// Sleeps before handling a refund.
    pub async fn set_refund_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.refund_delay = delay;
    }

    /// Records captures but answers with a timeout.
    pub async fn set_lose_capture_responses(&self, lose: bool) {
        self.state.lock().await.lose_capture_responses = lose;
    }

    /// Fails every call with a transport error.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Number of successful charges actually taken.
    pub async fn charge_count(&self) -> usize {
        self.state.lock().await.charge_count
    }

    /// Total refunded against a transaction.
    pub async fn refunded(&self, transaction_id: &str) -> Money {
        let state = self.state.lock().await;
        state
            .transactions
            .get(transaction_id)
            .and_then(|key| state.charges.get(key))
            .map(|charge| charge.refunded)
            .unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn capture(&self, request: &ChargeRequest) -> Result<CaptureOutcome, GatewayError> {
        let delay = self.state.lock().await.capture_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(GatewayError::Transport("connection refused".to_string()));
        }

        if let Some(charge) = state.charges.get(&request.idempotency_key) {
            return Ok(charge.outcome.clone());
        }

        let outcome = match state.decline_reason.clone() {
            Some(reason) => CaptureOutcome::Declined { reason },
            None => {
                state.next_txn += 1;
                state.charge_count += 1;
                let transaction_id = format!("txn_{:06}", state.next_txn);
                state
                    .transactions
                    .insert(transaction_id.clone(), request.idempotency_key.clone());
                CaptureOutcome::Captured { transaction_id }
            }
        };

        state.charges.insert(
            request.idempotency_key.clone(),
            Charge {
                outcome: outcome.clone(),
                amount: request.amount,
                refunded: Money::zero(),
            },
        );

        if state.lose_capture_responses {
            return Err(GatewayError::Timeout);
        }
        Ok(outcome)
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Money,
    ) -> Result<RefundOutcome, GatewayError> {
        let delay = self.state.lock().await.refund_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(GatewayError::Transport("connection refused".to_string()));
        }
        if state.decline_refunds {
            return Ok(RefundOutcome::Declined {
                reason: "refunds disabled".to_string(),
            });
        }

        let Some(key) = state.transactions.get(transaction_id).cloned() else {
            return Ok(RefundOutcome::Declined {
                reason: format!("unknown transaction {transaction_id}"),
            });
        };
        let Some(charge) = state.charges.get_mut(&key) else {
            return Ok(RefundOutcome::Declined {
                reason: format!("unknown transaction {transaction_id}"),
            });
        };

        if charge.refunded + amount > charge.amount {
            return Ok(RefundOutcome::Declined {
                reason: "amount exceeds captured balance".to_string(),
            });
        }
        charge.refunded += amount;
        Ok(RefundOutcome::Refunded)
    }

    async fn query_status(&self, idempotency_key: &str) -> Result<GatewayStatus, GatewayError> {
        let state = self.state.lock().await;
        if state.unavailable {
            return Err(GatewayError::Transport("connection refused".to_string()));
        }

        Ok(match state.charges.get(idempotency_key) {
            Some(Charge {
                outcome: CaptureOutcome::Captured { transaction_id },
                ..
            }) => GatewayStatus::Succeeded {
                transaction_id: transaction_id.clone(),
            },
            Some(Charge {
                outcome: CaptureOutcome::Declined { reason },
                ..
            }) => GatewayStatus::Failed {
                reason: reason.clone(),
            },
            None => GatewayStatus::NotFound,
        })
    }
}
