//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use booking::{BookingError, PaymentError};
use domain::{InventoryError, OrderError, RefundError};
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The caller's role may not use this route.
    Forbidden(String),
    /// Error raised by the booking services.
    Booking(BookingError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Booking(err) => {
                let status = booking_status(&err);
                if status.is_server_error() {
                    tracing::error!(error = %err, %status, "request failed");
                }
                (status, err.to_string())
            }
        };

        metrics::counter!("api_errors_total", "status" => status.as_u16().to_string()).increment(1);
        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn booking_status(err: &BookingError) -> StatusCode {
    match err {
        BookingError::Order(e) => match e {
            OrderError::InvalidOrderData(_) | OrderError::InvalidPassengerCount(_) => {
                StatusCode::BAD_REQUEST
            }
            OrderError::OrderNotCancellable { .. }
            | OrderError::InvalidOrderTransition { .. }
            | OrderError::OrderNotRefundable { .. } => StatusCode::CONFLICT,
            OrderError::RefundExceedsCollected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        },
        BookingError::Inventory(e) => match e {
            InventoryError::CabinNotAvailable { .. }
            | InventoryError::HoldExpired(_)
            | InventoryError::CapacityBelowCommitted { .. } => StatusCode::CONFLICT,
            InventoryError::SlotNotFound(_) | InventoryError::HoldNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            InventoryError::InvalidQuantity(_) => StatusCode::BAD_REQUEST,
        },
        BookingError::Refund(e) => match e {
            RefundError::RefundNotReviewable { .. }
            | RefundError::RefundNotProcessable { .. }
            | RefundError::RefundNotSettling { .. } => StatusCode::CONFLICT,
            RefundError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        },
        BookingError::Payment(e) => match e {
            PaymentError::VerificationFailed(_) => StatusCode::BAD_REQUEST,
            PaymentError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            PaymentError::RefundAmountInvalid { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PaymentError::ProviderRejected { .. } => StatusCode::BAD_GATEWAY,
            PaymentError::ProviderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        },
        BookingError::OrderNotFound(_)
        | BookingError::RefundNotFound(_)
        | BookingError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
        BookingError::NoRefundablePayment(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BookingError::Contention(_) => StatusCode::CONFLICT,
        BookingError::Store(e) => match e {
            StoreError::ConcurrencyConflict { .. } | StoreError::Duplicate { .. } => {
                StatusCode::CONFLICT
            }
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Inventory(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        ApiError::Booking(err)
    }
}
