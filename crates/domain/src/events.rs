//! Events published after each order or refund state change.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, RefundId, UserId};
use serde::{Deserialize, Serialize};

use crate::inventory::SlotKey;
use crate::money::Money;
use crate::order::CancellationReason;
use crate::payment::PaymentMethod;

/// Notification-worthy facts about bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BookingEvent {
    OrderCreated(OrderEventData),
    OrderPaid(OrderEventData),
    OrderConfirmed(OrderEventData),
    OrderCompleted(OrderEventData),
    OrderCancelled {
        order: OrderEventData,
        reason: CancellationReason,
    },
    OrderRefunded(OrderEventData),
    RefundRequested(RefundEventData),
    RefundApproved(RefundEventData),
    RefundRejected(RefundEventData),
    RefundCompleted(RefundEventData),
    RefundFailed(RefundEventData),
    /// A provider settlement that could not be applied automatically.
    PaymentNeedsReconciliation {
        order_id: OrderId,
        payment_id: PaymentId,
        transaction_id: String,
        note: String,
        occurred_at: DateTime<Utc>,
    },
    /// A verified settlement naming a payment this system never opened.
    UnmatchedSettlement {
        provider: PaymentMethod,
        payment_no: String,
        transaction_id: Option<String>,
        amount: Money,
        occurred_at: DateTime<Utc>,
    },
    /// Few cabins left on a voyage for one cabin type.
    InventoryLow {
        slot: SlotKey,
        available: u32,
        threshold: u32,
        occurred_at: DateTime<Utc>,
    },
}

impl BookingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            BookingEvent::OrderCreated(_) => "order.created",
            BookingEvent::OrderPaid(_) => "order.paid",
            BookingEvent::OrderConfirmed(_) => "order.confirmed",
            BookingEvent::OrderCompleted(_) => "order.completed",
            BookingEvent::OrderCancelled { .. } => "order.cancelled",
            BookingEvent::OrderRefunded(_) => "order.refunded",
            BookingEvent::RefundRequested(_) => "refund.requested",
            BookingEvent::RefundApproved(_) => "refund.approved",
            BookingEvent::RefundRejected(_) => "refund.rejected",
            BookingEvent::RefundCompleted(_) => "refund.completed",
            BookingEvent::RefundFailed(_) => "refund.failed",
            BookingEvent::PaymentNeedsReconciliation { .. } => "payment.reconciliation",
            BookingEvent::UnmatchedSettlement { .. } => "payment.unmatched",
            BookingEvent::InventoryLow { .. } => "inventory.low",
        }
    }

    /// The order the event concerns, if it concerns one.
    pub fn order_id(&self) -> Option<OrderId> {
        let id = match self {
            BookingEvent::OrderCreated(data)
            | BookingEvent::OrderPaid(data)
            | BookingEvent::OrderConfirmed(data)
            | BookingEvent::OrderCompleted(data)
            | BookingEvent::OrderRefunded(data)
            | BookingEvent::OrderCancelled { order: data, .. } => data.order_id,
            BookingEvent::RefundRequested(data)
            | BookingEvent::RefundApproved(data)
            | BookingEvent::RefundRejected(data)
            | BookingEvent::RefundCompleted(data)
            | BookingEvent::RefundFailed(data) => data.order_id,
            BookingEvent::PaymentNeedsReconciliation { order_id, .. } => *order_id,
            BookingEvent::UnmatchedSettlement { .. } | BookingEvent::InventoryLow { .. } => {
                return None;
            }
        };
        Some(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEventData {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: Option<UserId>,
    pub total_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

impl OrderEventData {
    pub fn from_order(order: &crate::order::Order, occurred_at: DateTime<Utc>) -> Self {
        Self {
            order_id: order.id(),
            order_number: order.order_number().to_string(),
            user_id: order.user_id().cloned(),
            total_amount: order.total_amount(),
            occurred_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundEventData {
    pub refund_id: RefundId,
    pub order_id: OrderId,
    pub user_id: Option<UserId>,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

impl RefundEventData {
    pub fn from_refund(refund: &crate::refund::RefundRequest, occurred_at: DateTime<Utc>) -> Self {
        Self {
            refund_id: refund.id,
            order_id: refund.order_id,
            user_id: refund.user_id.clone(),
            amount: refund.amount,
            occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = BookingEvent::RefundApproved(RefundEventData {
            refund_id: RefundId::new(),
            order_id: OrderId::new(),
            user_id: None,
            amount: Money::from_cents(500),
            occurred_at: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RefundApproved");
        assert_eq!(json["data"]["amount"], 500);
        assert_eq!(event.event_type(), "refund.approved");
        assert!(event.order_id().is_some());
    }

    #[test]
    fn inventory_events_carry_no_order() {
        let event = BookingEvent::InventoryLow {
            slot: SlotKey::new(common::VoyageId::new(), common::CabinTypeId::new()),
            available: 3,
            threshold: 5,
            occurred_at: Utc::now(),
        };
        assert_eq!(event.order_id(), None);
        assert_eq!(event.event_type(), "inventory.low");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "InventoryLow");
        assert_eq!(json["data"]["available"], 3);
    }
}
