//! Shared types for the order fulfillment engine.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{OrderId, PaymentId, ProductId, UserId};
