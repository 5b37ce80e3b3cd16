//! Order aggregate and related types.

mod address;
mod aggregate;
mod events;
mod line;
mod status;
mod totals;

pub use address::{Address, ShippingInfo};
pub use aggregate::{Order, OrderDraft, OrderTimestamps};
pub use events::{
    OrderCancelledData, OrderEvent, PaymentCapturedData, PaymentRefundedData, StatusChangedData,
    StockReleaseData,
};
pub use line::OrderLine;
pub use status::OrderStatus;
pub use totals::{OrderTotals, PricingPolicy, TOTAL_TOLERANCE};
