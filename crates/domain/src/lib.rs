//! Domain layer for the order fulfillment engine.
//!
//! This crate provides the pure, I/O-free model:
//! - Aggregate trait and the Order aggregate with its status state machine
//! - Order lines with price snapshots and canonical totals
//! - Payment records and payment-plane statuses
//! - Catalog rows, account status, actors and notification kinds

pub mod account;
pub mod actor;
pub mod aggregate;
pub mod catalog;
pub mod error;
pub mod notification;
pub mod order;
pub mod payment;

pub use account::AccountStatus;
pub use actor::Actor;
pub use aggregate::{Aggregate, DomainEvent, Version};
pub use catalog::{Product, ProductSnapshot};
pub use error::{OrderError, ParseError, PaymentError};
pub use notification::NotificationKind;
pub use order::{
    Address, Order, OrderDraft, OrderEvent, OrderLine, OrderStatus, OrderTimestamps, OrderTotals,
    PricingPolicy, ShippingInfo,
};
pub use payment::{ChargeStatus, Payment, PaymentMethod, PaymentStatus};
