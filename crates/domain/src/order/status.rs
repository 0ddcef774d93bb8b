//! Order and payment status machines.

use serde::{Deserialize, Serialize};

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Paid ──► Confirmed ──► Completed
///    │         │  │        │             │
///    │         │  └────────┴─────────────┴──► Refunded   (refund workflow only)
///    └─────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Cabins held, awaiting payment.
    #[default]
    Pending,

    /// Payment settled, awaiting operator confirmation.
    Paid,

    /// Cabins booked.
    Confirmed,

    /// Voyage sailed (terminal apart from refunds).
    Completed,

    /// Cancelled by the customer, an operator or hold expiry (terminal).
    Cancelled,

    /// Money returned through the refund workflow (terminal).
    Refunded,
}

impl OrderStatus {
    pub fn can_pay(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    pub fn can_confirm(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::Confirmed)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Paid)
    }

    /// Contact details may only change before payment.
    pub fn can_update(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    pub fn can_delete(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Cancelled)
    }

    /// States a refund may be requested from. A cancelled order also needs
    /// collected money, which the order itself checks.
    pub fn can_refund(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid
                | OrderStatus::Confirmed
                | OrderStatus::Completed
                | OrderStatus::Cancelled
        )
    }

    /// States the refund workflow may move to [`OrderStatus::Refunded`].
    pub fn can_mark_refunded(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Confirmed | OrderStatus::Completed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "confirmed" => Some(OrderStatus::Confirmed),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" => Some(OrderStatus::Cancelled),
            "refunded" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of an order's total has been collected or returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Partial,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unpaid" => Some(PaymentStatus::Unpaid),
            "partial" => Some(PaymentStatus::Partial),
            "paid" => Some(PaymentStatus::Paid),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Confirmed,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    fn allowed(check: fn(&OrderStatus) -> bool) -> Vec<OrderStatus> {
        ALL.into_iter().filter(|s| check(s)).collect()
    }

    #[test]
    fn default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
        assert_eq!(PaymentStatus::default(), PaymentStatus::Unpaid);
    }

    #[test]
    fn only_pending_can_pay_or_update() {
        assert_eq!(allowed(OrderStatus::can_pay), vec![OrderStatus::Pending]);
        assert_eq!(allowed(OrderStatus::can_update), vec![OrderStatus::Pending]);
    }

    #[test]
    fn forward_path_is_single_step() {
        assert_eq!(allowed(OrderStatus::can_confirm), vec![OrderStatus::Paid]);
        assert_eq!(
            allowed(OrderStatus::can_complete),
            vec![OrderStatus::Confirmed]
        );
    }

    #[test]
    fn cancel_only_before_confirmation() {
        assert_eq!(
            allowed(OrderStatus::can_cancel),
            vec![OrderStatus::Pending, OrderStatus::Paid]
        );
    }

    #[test]
    fn delete_only_pending_or_cancelled() {
        assert_eq!(
            allowed(OrderStatus::can_delete),
            vec![OrderStatus::Pending, OrderStatus::Cancelled]
        );
    }

    #[test]
    fn refunds_never_requested_on_pending_or_refunded() {
        assert_eq!(
            allowed(OrderStatus::can_refund),
            vec![
                OrderStatus::Paid,
                OrderStatus::Confirmed,
                OrderStatus::Completed,
                OrderStatus::Cancelled
            ]
        );
    }

    #[test]
    fn refunded_reachable_from_settled_states() {
        assert_eq!(
            allowed(OrderStatus::can_mark_refunded),
            vec![
                OrderStatus::Paid,
                OrderStatus::Confirmed,
                OrderStatus::Completed
            ]
        );
    }

    #[test]
    fn terminal_states() {
        assert_eq!(
            allowed(OrderStatus::is_terminal),
            vec![OrderStatus::Cancelled, OrderStatus::Refunded]
        );
    }

    #[test]
    fn statuses_round_trip_through_str() {
        for status in ALL {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{status}\"")
            );
        }
        for status in [
            PaymentStatus::Unpaid,
            PaymentStatus::Partial,
            PaymentStatus::Paid,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(PaymentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("shipped"), None);
    }
}
