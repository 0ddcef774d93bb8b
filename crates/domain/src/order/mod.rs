//! Orders and their lifecycle.

mod model;
mod status;

pub use model::{
    CancellationReason, Contact, ContactUpdate, NewOrder, Order, OrderItem, Passenger,
    PassengerType,
};
pub use status::{OrderStatus, PaymentStatus};

use thiserror::Error;

use crate::money::Money;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("Invalid order data: {0}")]
    InvalidOrderData(String),

    #[error("Invalid passenger count: {0}")]
    InvalidPassengerCount(String),

    #[error("Order cannot be cancelled in {status} status")]
    OrderNotCancellable { status: OrderStatus },

    #[error("Invalid order transition: cannot {action} from {from} status")]
    InvalidOrderTransition {
        from: OrderStatus,
        action: &'static str,
    },

    #[error("Order in {status} status has no collected payment to refund")]
    OrderNotRefundable { status: OrderStatus },

    #[error("Refund of {requested} exceeds refundable amount {available}")]
    RefundExceedsCollected { requested: Money, available: Money },
}
