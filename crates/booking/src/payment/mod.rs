//! Payment providers and the gateway that applies their outcomes.
//!
//! Each provider implements the fixed [`PaymentProvider`] capability set.
//! The [`PaymentGateway`] picks one by [`PaymentMethod`], bounds every call
//! with a timeout and turns provider callbacks into order transitions.

mod card;
mod gateway;
mod http;
mod memory;
pub mod signature;
mod wallet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Money, Payment, PaymentMethod};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use card::CardProvider;
pub use gateway::{CallbackOutcome, PaymentGateway, PaymentIntentView};
pub use http::ProviderClient;
pub use memory::{InMemoryProvider, ProviderBehavior};
pub use wallet::WalletProvider;

/// Errors raised while talking to a payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// The callback signature did not match; nothing was changed.
    #[error("Payment callback verification failed: {0}")]
    VerificationFailed(String),

    /// The provider could not be reached or did not answer in time.
    #[error("Payment provider {provider} unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    /// The provider answered and refused the request.
    #[error("Payment provider {provider} rejected the request: {reason}")]
    ProviderRejected { provider: String, reason: String },

    #[error("Unknown payment provider: {0}")]
    UnknownProvider(String),

    #[error("Refund amount {requested} is invalid, at most {available} can be refunded")]
    RefundAmountInvalid { requested: Money, available: Money },
}

impl PaymentError {
    pub(crate) fn unavailable(provider: &str, reason: impl ToString) -> Self {
        PaymentError::ProviderUnavailable {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn rejected(provider: &str, reason: impl ToString) -> Self {
        PaymentError::ProviderRejected {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// What the gateway asks a provider to collect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentIntent {
    pub payment_no: String,
    pub order_number: String,
    pub amount: Money,
    pub description: String,
}

/// An opened intent: the provider's reference plus whatever the client needs
/// to complete payment (a prepay id, a client secret).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentHandle {
    pub provider_reference: String,
    pub client_payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Closed,
}

/// The provider's view of one payment, from a callback or a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPayment {
    pub payment_no: String,
    pub status: ProviderPaymentStatus,
    pub transaction_id: Option<String>,
    pub amount: Money,
}

/// A refund to send to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundInstruction {
    pub refund_no: String,
    pub payment_no: String,
    pub provider_reference: Option<String>,
    pub transaction_id: Option<String>,
    pub amount: Money,
    /// What the original payment collected.
    pub payment_amount: Money,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRefundStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRefund {
    pub refund_no: String,
    pub status: ProviderRefundStatus,
    pub provider_refund_id: Option<String>,
    pub failure_reason: Option<String>,
}

/// The capability set every payment provider offers.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Header carrying the callback signature.
    fn signature_header(&self) -> &'static str;

    /// Literal body the provider expects in reply to a callback.
    fn acknowledgement(&self, accepted: bool) -> &'static str;

    async fn create_intent(&self, intent: &PaymentIntent) -> Result<IntentHandle, PaymentError>;

    /// Authenticates a raw callback body and decodes it.
    fn verify_callback(
        &self,
        body: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<ProviderPayment, PaymentError>;

    async fn query(&self, payment: &Payment) -> Result<ProviderPayment, PaymentError>;

    async fn refund(&self, refund: &RefundInstruction) -> Result<ProviderRefund, PaymentError>;

    async fn query_refund(
        &self,
        refund_no: &str,
        payment: &Payment,
    ) -> Result<ProviderRefund, PaymentError>;
}
