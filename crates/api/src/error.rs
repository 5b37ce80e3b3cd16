//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::OrderError;
use fulfillment::{ErrorClass, FulfillmentError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    /// Engine error.
    #[error(transparent)]
    Fulfillment(#[from] FulfillmentError),
    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Fulfillment(err) => {
                let status = fulfillment_status(&err);
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                }
                (status, class_name(err.class()), err.to_string())
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
            }
        };

        let body = serde_json::json!({ "error": message, "kind": kind });
        (status, axum::Json(body)).into_response()
    }
}

fn fulfillment_status(err: &FulfillmentError) -> StatusCode {
    use FulfillmentError::*;

    match err {
        EmptyCart | InvalidQuantity { .. } | Payment(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Order(OrderError::InvalidDiscount { .. } | OrderError::ZeroTotal) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Forbidden { .. } | AccountInactive(_) => StatusCode::FORBIDDEN,
        OrderNotFound(_) | ProductNotFound(_) => StatusCode::NOT_FOUND,
        ProductUnavailable(_)
        | IllegalTransition { .. }
        | AlreadyCancelled
        | InvalidState { .. }
        | NotRefundable { .. }
        | NotFinalized(_)
        | InsufficientStock { .. }
        | ConcurrentModification(_)
        | Order(OrderError::PaidCancellation) => StatusCode::CONFLICT,
        PaymentDeclined { .. } | RefundDeclined { .. } => StatusCode::PAYMENT_REQUIRED,
        PaymentOutcomeUnknown { .. } | RefundOutcomeUnknown { .. } => StatusCode::ACCEPTED,
        OrderNumberExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn class_name(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::Validation => "validation",
        ErrorClass::Contention => "contention",
        ErrorClass::Transient => "transient",
        ErrorClass::Invariant => "invariant",
        ErrorClass::Infrastructure => "infrastructure",
    }
}
