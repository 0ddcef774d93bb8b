//! Booking service error types.

use common::{OrderId, PaymentId, RefundId};
use domain::{InventoryError, OrderError, RefundError};
use store::StoreError;
use thiserror::Error;

use crate::payment::PaymentError;

/// Errors returned by the booking services.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Refund(#[from] RefundError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Refund not found: {0}")]
    RefundNotFound(RefundId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// The refund has no settled payment left that could carry it.
    #[error("No refundable payment for order {0}")]
    NoRefundablePayment(OrderId),

    /// A versioned record kept changing underneath repeated retries.
    #[error("Gave up after repeated concurrent updates to {0}")]
    Contention(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Inventory(e) => BookingError::Inventory(e),
            other => BookingError::Store(other),
        }
    }
}

impl BookingError {
    pub fn order_not_found(id: OrderId) -> Self {
        BookingError::OrderNotFound(id.to_string())
    }

    pub fn payment_not_found(id: PaymentId) -> Self {
        BookingError::PaymentNotFound(id.to_string())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BookingError::Store(e) if e.is_conflict())
    }
}

/// Convenience type alias for booking results.
pub type Result<T> = std::result::Result<T, BookingError>;
