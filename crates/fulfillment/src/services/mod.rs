//! External collaborators the engine calls out to.

pub mod accounts;
pub mod gateway;
pub mod invoice;

pub use accounts::{AccountDirectory, InMemoryAccountDirectory};
pub use gateway::{
    CaptureOutcome, ChargeRequest, GatewayError, GatewayStatus, InMemoryPaymentGateway,
    PaymentGateway, RefundOutcome,
};
pub use invoice::{InvoiceRenderer, PlainTextInvoiceRenderer};
