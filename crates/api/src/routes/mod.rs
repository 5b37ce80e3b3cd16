pub mod actor;
pub mod ops;
pub mod orders;
pub mod payments;

use common::OrderId;

use crate::error::ApiError;

/// Parses an order ID from a path segment.
pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    uuid::Uuid::parse_str(id)
        .map(OrderId::from_uuid)
        .map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))
}
