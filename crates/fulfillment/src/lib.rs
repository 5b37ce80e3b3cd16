//! Order fulfillment engine.
//!
//! Three services share the stores and collaborators:
//! - [`OrderFulfillmentService`]: cart to order, with stock reservation and
//!   compensating release on failure
//! - [`OrderStateMachine`]: status transitions, cancellation and stock release
//! - [`PaymentService`]: idempotent capture, bounded refunds and
//!   reconciliation of captures whose outcome is unknown
//!
//! Notifications are best effort and never fail the operation that sent them.

pub mod authorization;
pub mod config;
pub mod engine;
pub mod error;
pub mod fulfillment;
pub mod notifications;
pub mod order_number;
pub mod payments;
pub mod services;
pub mod state_machine;

pub use authorization::Action;
pub use config::EngineConfig;
pub use engine::{Collaborators, FulfillmentEngine, Stores};
pub use error::{ErrorClass, FulfillmentError, Result};
pub use fulfillment::{CartLine, CreateOrderRequest, OrderFulfillmentService};
pub use notifications::{
    InMemoryNotifier, LoggingNotifier, NotificationDispatcher, Notifier, NotifyError,
    SentNotification,
};
pub use order_number::{OrderNumberGenerator, RandomOrderNumbers, SequenceOrderNumbers};
pub use payments::PaymentService;
pub use services::{
    AccountDirectory, CaptureOutcome, ChargeRequest, GatewayError, GatewayStatus,
    InMemoryAccountDirectory, InMemoryPaymentGateway, InvoiceRenderer, PaymentGateway,
    PlainTextInvoiceRenderer, RefundOutcome,
};
pub use state_machine::OrderStateMachine;
