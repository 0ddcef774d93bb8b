//! Refund requests and their review/settlement lifecycle.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, RefundId, UserId, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Money;
use crate::numbering;
use crate::order::CancellationReason;

/// Errors raised by refund transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefundError {
    #[error("Refund in {status} status cannot be reviewed")]
    RefundNotReviewable { status: RefundStatus },

    #[error("Refund in {status} status cannot be processed")]
    RefundNotProcessable { status: RefundStatus },

    #[error("Refund in {status} status has no settlement outstanding")]
    RefundNotSettling { status: RefundStatus },

    #[error("Invalid refund amount: {0}")]
    InvalidAmount(Money),
}

/// State of a refund request.
///
/// ```text
/// Pending ──► Approved ──► Processing ──► Completed
///    │                         │
///    └──► Rejected             └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Processing,
    Completed,
    Failed,
}

impl RefundStatus {
    pub fn can_review(&self) -> bool {
        matches!(self, RefundStatus::Pending)
    }

    pub fn can_process(&self) -> bool {
        matches!(self, RefundStatus::Approved)
    }

    /// Statuses whose amount counts against the order's collected money.
    pub fn holds_commitment(&self) -> bool {
        matches!(
            self,
            RefundStatus::Approved | RefundStatus::Processing | RefundStatus::Completed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RefundStatus::Rejected | RefundStatus::Completed | RefundStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Approved => "approved",
            RefundStatus::Rejected => "rejected",
            RefundStatus::Processing => "processing",
            RefundStatus::Completed => "completed",
            RefundStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RefundStatus::Pending),
            "approved" => Some(RefundStatus::Approved),
            "rejected" => Some(RefundStatus::Rejected),
            "processing" => Some(RefundStatus::Processing),
            "completed" => Some(RefundStatus::Completed),
            "failed" => Some(RefundStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundType {
    Full,
    Partial,
}

/// A customer's request to get money back on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub id: RefundId,
    pub refund_no: String,
    pub order_id: OrderId,
    /// Set when requested against a specific payment, otherwise chosen at processing.
    pub payment_id: Option<PaymentId>,
    pub user_id: Option<UserId>,
    pub amount: Money,
    pub reason: String,
    pub refund_type: RefundType,
    pub cancellation_reason: Option<CancellationReason>,
    pub status: RefundStatus,
    pub reviewer_id: Option<String>,
    pub review_note: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub provider_refund_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: Version,
}

impl RefundRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: OrderId,
        payment_id: Option<PaymentId>,
        user_id: Option<UserId>,
        amount: Money,
        collected: Money,
        reason: impl Into<String>,
        cancellation_reason: Option<CancellationReason>,
        now: DateTime<Utc>,
    ) -> Result<Self, RefundError> {
        if !amount.is_positive() {
            return Err(RefundError::InvalidAmount(amount));
        }
        let refund_type = if amount >= collected {
            RefundType::Full
        } else {
            RefundType::Partial
        };
        Ok(Self {
            id: RefundId::new(),
            refund_no: numbering::refund_number(now),
            order_id,
            payment_id,
            user_id,
            amount,
            reason: reason.into(),
            refund_type,
            cancellation_reason,
            status: RefundStatus::Pending,
            reviewer_id: None,
            review_note: None,
            reviewed_at: None,
            processed_at: None,
            completed_at: None,
            provider_refund_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            version: Version::UNSAVED,
        })
    }

    fn review(
        &mut self,
        status: RefundStatus,
        reviewer_id: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RefundError> {
        if !self.status.can_review() {
            return Err(RefundError::RefundNotReviewable {
                status: self.status,
            });
        }
        self.status = status;
        self.reviewer_id = Some(reviewer_id.to_string());
        self.review_note = Some(note.to_string()).filter(|n| !n.is_empty());
        self.reviewed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn approve(
        &mut self,
        reviewer_id: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RefundError> {
        self.review(RefundStatus::Approved, reviewer_id, note, now)
    }

    pub fn reject(
        &mut self,
        reviewer_id: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RefundError> {
        self.review(RefundStatus::Rejected, reviewer_id, note, now)
    }

    pub fn start_processing(
        &mut self,
        payment_id: PaymentId,
        now: DateTime<Utc>,
    ) -> Result<(), RefundError> {
        if !self.status.can_process() {
            return Err(RefundError::RefundNotProcessable {
                status: self.status,
            });
        }
        self.status = RefundStatus::Processing;
        self.payment_id = Some(payment_id);
        self.processed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn ensure_processing(&self) -> Result<(), RefundError> {
        if self.status == RefundStatus::Processing {
            Ok(())
        } else {
            Err(RefundError::RefundNotSettling {
                status: self.status,
            })
        }
    }

    pub fn complete(
        &mut self,
        provider_refund_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), RefundError> {
        self.ensure_processing()?;
        self.status = RefundStatus::Completed;
        self.provider_refund_id = Some(provider_refund_id.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), RefundError> {
        self.ensure_processing()?;
        self.status = RefundStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = now;
        Ok(())
    }
}
