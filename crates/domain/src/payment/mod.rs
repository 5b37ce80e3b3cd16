//! Payment records and payment-plane statuses.

mod method;
mod record;
mod status;

pub use method::PaymentMethod;
pub use record::Payment;
pub use status::{ChargeStatus, PaymentStatus};
