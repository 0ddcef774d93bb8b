//! Payment attempts against an order.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, Version};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::numbering;

/// The provider a payment goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// In-app wallet payment.
    Wallet,
    /// Card network payment.
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Card => "card",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "wallet" => Some(PaymentMethod::Wallet),
            "card" => Some(PaymentMethod::Card),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a single payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    /// Intent opened, waiting on the provider.
    #[default]
    Pending,
    /// Settled by the provider.
    Paid,
    /// Provider reported the payment failed.
    Failed,
    /// Closed by the provider before settlement.
    Closed,
    /// Everything settled has been refunded.
    Refunded,
    /// Settled, but it disagrees with the order; needs a human.
    Reconciliation,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::Paid => "paid",
            PaymentState::Failed => "failed",
            PaymentState::Closed => "closed",
            PaymentState::Refunded => "refunded",
            PaymentState::Reconciliation => "reconciliation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentState::Pending),
            "paid" => Some(PaymentState::Paid),
            "failed" => Some(PaymentState::Failed),
            "closed" => Some(PaymentState::Closed),
            "refunded" => Some(PaymentState::Refunded),
            "reconciliation" => Some(PaymentState::Reconciliation),
            _ => None,
        }
    }

    /// Whether the provider already told us about this payment's outcome.
    pub fn is_final(&self) -> bool {
        !matches!(self, PaymentState::Pending)
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt to collect money for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    /// Reference handed to the provider and echoed back in callbacks.
    pub payment_no: String,
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub amount: Money,
    pub refunded_amount: Money,
    pub state: PaymentState,
    pub description: String,
    /// Provider-side intent id, known once the intent is opened.
    pub provider_reference: Option<String>,
    /// Provider settlement id, the idempotency key for callbacks.
    pub provider_transaction_id: Option<String>,
    pub note: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: Version,
}

impl Payment {
    pub fn new(
        order_id: OrderId,
        method: PaymentMethod,
        amount: Money,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            payment_no: numbering::payment_number(now),
            order_id,
            method,
            amount,
            refunded_amount: Money::zero(),
            state: PaymentState::Pending,
            description: description.into(),
            provider_reference: None,
            provider_transaction_id: None,
            note: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
            version: Version::UNSAVED,
        }
    }

    /// Money actually collected by this attempt.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.state,
            PaymentState::Paid | PaymentState::Refunded | PaymentState::Reconciliation
        )
    }

    /// Whether `transaction_id` is the settlement already recorded here.
    pub fn is_settled_by(&self, transaction_id: &str) -> bool {
        self.is_settled() && self.provider_transaction_id.as_deref() == Some(transaction_id)
    }

    pub fn settle(&mut self, transaction_id: impl Into<String>, now: DateTime<Utc>) {
        self.state = PaymentState::Paid;
        self.provider_transaction_id = Some(transaction_id.into());
        self.paid_at = Some(now);
        self.updated_at = now;
    }

    /// Records a settlement for less than the payment was opened for. The
    /// payment keeps only what was actually collected.
    pub fn settle_short(
        &mut self,
        transaction_id: impl Into<String>,
        collected: Money,
        now: DateTime<Utc>,
    ) {
        self.note = Some(format!("provider settled {collected} of {}", self.amount));
        self.amount = collected;
        self.settle(transaction_id, now);
    }

    /// Parks a settled payment that the order could not accept.
    pub fn hold_for_reconciliation(
        &mut self,
        transaction_id: impl Into<String>,
        note: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.state = PaymentState::Reconciliation;
        self.provider_transaction_id = Some(transaction_id.into());
        self.note = Some(note.into());
        self.paid_at = Some(now);
        self.updated_at = now;
    }

    pub fn fail(&mut self, state: PaymentState, note: impl Into<String>, now: DateTime<Utc>) {
        self.state = state;
        self.note = Some(note.into());
        self.updated_at = now;
    }

    /// Settled money not yet refunded.
    pub fn refundable_amount(&self) -> Money {
        if self.is_settled() {
            self.amount.saturating_sub(self.refunded_amount)
        } else {
            Money::zero()
        }
    }

    pub fn record_refund(&mut self, amount: Money, now: DateTime<Utc>) {
        self.refunded_amount += amount;
        if self.refunded_amount >= self.amount && self.state == PaymentState::Paid {
            self.state = PaymentState::Refunded;
        }
        self.updated_at = now;
    }
}
