//! Customer notifications.
//!
//! Delivery is best effort: the engine persists state first, then notifies,
//! and a failed or slow notifier never fails the operation that triggered it.
//! Dispatch is awaited inline, so a caller may wait up to the notification
//! timeout after its change is already committed. Notifications for one
//! operation therefore go out in order, and none are lost to a task that
//! outlives shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use domain::{NotificationKind, Order};
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors a notifier may report.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Notification timed out after {0:?}")]
    Timeout(Duration),
}

/// Outbound notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        kind: NotificationKind,
        order: &Order,
        extra: serde_json::Value,
    ) -> Result<(), NotifyError>;
}

/// Wraps a [`Notifier`] with a timeout and swallows its failures.
///
/// `dispatch` returns once the notifier finishes or `timeout` elapses,
/// whichever is first; an unfinished delivery is dropped.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }

    /// Sends one notification. Failures are logged and counted, never returned.
    pub async fn dispatch(&self, kind: NotificationKind, order: &Order, extra: serde_json::Value) {
        let result = match tokio::time::timeout(
            self.timeout,
            self.notifier.notify(kind, order, extra),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(self.timeout)),
        };

        if let Err(e) = result {
            metrics::counter!("notifications_failed_total").increment(1);
            tracing::warn!(
                order_id = %order.id(),
                kind = kind.as_str(),
                error = %e,
                "notification failed"
            );
        }
    }
}

/// Notifier that only writes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        order: &Order,
        extra: serde_json::Value,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            order_id = %order.id(),
            order_number = order.order_number(),
            user_id = %order.user_id(),
            kind = kind.as_str(),
            %extra,
            "notification"
        );
        Ok(())
    }
}

/// A delivered notification, as seen by [`InMemoryNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub kind: NotificationKind,
    pub order_id: OrderId,
    pub extra: serde_json::Value,
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<SentNotification>,
    fail: bool,
    delay: Option<Duration>,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every delivery fail.
    pub async fn set_fail(&self, fail: bool) {
        self.state.write().await.fail = fail;
    }

    /// Makes every delivery sleep for `delay` first.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        self.state.write().await.delay = delay;
    }

    /// Notifications delivered so far.
    pub async fn sent(&self) -> Vec<SentNotification> {
        self.state.read().await.sent.clone()
    }

    /// Kinds of the notifications delivered for `order_id`, in order.
    pub async fn kinds_for(&self, order_id: OrderId) -> Vec<NotificationKind> {
        self.state
            .read()
            .await
            .sent
            .iter()
            .filter(|n| n.order_id == order_id)
            .map(|n| n.kind)
            .collect()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        order: &Order,
        extra: serde_json::Value,
    ) -> Result<(), NotifyError> {
        let (fail, delay) = {
            let state = self.state.read().await;
            (state.fail, state.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(NotifyError::Delivery("mail server unavailable".to_string()));
        }

        self.state.write().await.sent.push(SentNotification {
            kind,
            order_id: order.id(),
            extra,
        });
        Ok(())
    }
}
