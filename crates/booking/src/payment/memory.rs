use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Money, Payment, PaymentMethod};

use super::signature::{sign_hex, verify_hex};
use super::{
    IntentHandle, PaymentError, PaymentIntent, PaymentProvider, ProviderPayment,
    ProviderPaymentStatus, ProviderRefund, ProviderRefundStatus, RefundInstruction,
};

pub const SIGNATURE_HEADER: &str = "Provider-Signature";

/// How the in-memory provider answers intent and refund calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderBehavior {
    #[default]
    Succeed,
    /// Answers with a rejection.
    Reject,
    /// Fails as if the provider could not be reached.
    Unavailable,
    /// Accepts refunds without settling them yet.
    Pending,
    /// Never answers, so only the caller's timeout ends the call.
    Hang,
}

#[derive(Default)]
struct State {
    intents: HashMap<String, PaymentIntent>,
    settled: HashMap<String, (String, Money)>,
    refunds: HashMap<String, ProviderRefund>,
    refund_calls: usize,
    intent_behavior: ProviderBehavior,
    refund_behavior: ProviderBehavior,
}

/// A provider that keeps everything in process.
///
/// Callbacks are [`ProviderPayment`] JSON signed with a hex HMAC, which makes
/// it usable both in tests and as a local stand-in for a real provider.
pub struct InMemoryProvider {
    method: PaymentMethod,
    secret: String,
    state: Mutex<State>,
}

impl InMemoryProvider {
    pub fn new(method: PaymentMethod, secret: impl Into<String>) -> Self {
        Self {
            method,
            secret: secret.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_intent_behavior(&self, behavior: ProviderBehavior) {
        self.state().intent_behavior = behavior;
    }

    pub fn set_refund_behavior(&self, behavior: ProviderBehavior) {
        self.state().refund_behavior = behavior;
    }

    /// Signs a callback body the way [`PaymentProvider::verify_callback`] expects.
    pub fn sign(&self, body: &[u8]) -> String {
        sign_hex(&self.secret, body)
    }

    /// Builds a signed success callback for `payment_no`.
    pub fn settlement_callback(
        &self,
        payment_no: &str,
        transaction_id: &str,
        amount: Money,
    ) -> (Vec<u8>, String) {
        let notice = ProviderPayment {
            payment_no: payment_no.to_string(),
            status: ProviderPaymentStatus::Succeeded,
            transaction_id: Some(transaction_id.to_string()),
            amount,
        };
        let body = serde_json::to_vec(&notice).unwrap_or_default();
        let signature = self.sign(&body);
        (body, signature)
    }

    /// Marks a payment settled on the provider side without sending a callback.
    pub fn settle(&self, payment_no: &str, transaction_id: &str, amount: Money) {
        self.state()
            .settled
            .insert(payment_no.to_string(), (transaction_id.to_string(), amount));
    }

    /// Settles a refund left pending, as the provider eventually would.
    pub fn complete_refund(&self, refund_no: &str) {
        if let Some(refund) = self.state().refunds.get_mut(refund_no) {
            refund.status = ProviderRefundStatus::Succeeded;
        }
    }

    pub fn intent(&self, payment_no: &str) -> Option<PaymentIntent> {
        self.state().intents.get(payment_no).cloned()
    }

    pub fn refund_calls(&self) -> usize {
        self.state().refund_calls
    }

    fn name(&self) -> &'static str {
        self.method.as_str()
    }

    async fn behave(&self, behavior: ProviderBehavior) -> Result<(), PaymentError> {
        match behavior {
            ProviderBehavior::Reject => Err(PaymentError::rejected(self.name(), "declined")),
            ProviderBehavior::Unavailable => {
                Err(PaymentError::unavailable(self.name(), "connection refused"))
            }
            ProviderBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(PaymentError::unavailable(self.name(), "hung"))
            }
            ProviderBehavior::Succeed | ProviderBehavior::Pending => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentProvider for InMemoryProvider {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn acknowledgement(&self, accepted: bool) -> &'static str {
        if accepted { "ok" } else { "error" }
    }

    async fn create_intent(&self, intent: &PaymentIntent) -> Result<IntentHandle, PaymentError> {
        let behavior = self.state().intent_behavior;
        self.behave(behavior).await?;

        let reference = format!("{}-{}", self.name(), intent.payment_no);
        self.state()
            .intents
            .insert(intent.payment_no.clone(), intent.clone());
        Ok(IntentHandle {
            client_payload: serde_json::json!({
                "reference": reference,
                "amount": intent.amount.cents(),
            }),
            provider_reference: reference,
        })
    }

    fn verify_callback(
        &self,
        body: &[u8],
        signature: &str,
        _now: DateTime<Utc>,
    ) -> Result<ProviderPayment, PaymentError> {
        if !verify_hex(&self.secret, body, signature) {
            return Err(PaymentError::VerificationFailed("signature mismatch".into()));
        }
        serde_json::from_slice(body)
            .map_err(|e| PaymentError::VerificationFailed(format!("unreadable callback: {e}")))
    }

    async fn query(&self, payment: &Payment) -> Result<ProviderPayment, PaymentError> {
        let state = self.state();
        Ok(match state.settled.get(&payment.payment_no) {
            Some((transaction_id, amount)) => ProviderPayment {
                payment_no: payment.payment_no.clone(),
                status: ProviderPaymentStatus::Succeeded,
                transaction_id: Some(transaction_id.clone()),
                amount: *amount,
            },
            None => ProviderPayment {
                payment_no: payment.payment_no.clone(),
                status: ProviderPaymentStatus::Pending,
                transaction_id: None,
                amount: payment.amount,
            },
        })
    }

    async fn refund(&self, refund: &RefundInstruction) -> Result<ProviderRefund, PaymentError> {
        let behavior = {
            let mut state = self.state();
            state.refund_calls += 1;
            state.refund_behavior
        };
        self.behave(behavior).await?;

        let status = if behavior == ProviderBehavior::Pending {
            ProviderRefundStatus::Pending
        } else {
            ProviderRefundStatus::Succeeded
        };
        let result = ProviderRefund {
            refund_no: refund.refund_no.clone(),
            status,
            provider_refund_id: Some(format!("{}-RF-{}", self.name(), refund.refund_no)),
            failure_reason: None,
        };
        self.state()
            .refunds
            .insert(refund.refund_no.clone(), result.clone());
        Ok(result)
    }

    async fn query_refund(
        &self,
        refund_no: &str,
        _payment: &Payment,
    ) -> Result<ProviderRefund, PaymentError> {
        self.state()
            .refunds
            .get(refund_no)
            .cloned()
            .ok_or_else(|| PaymentError::rejected(self.name(), format!("unknown refund {refund_no}")))
    }
}

#[cfg(test)]
mod tests {
    use common::OrderId;

    use super::*;

    #[test]
    fn signed_callbacks_verify() {
        let provider = InMemoryProvider::new(PaymentMethod::Wallet, "s3cret");
        let (body, signature) =
            provider.settlement_callback("PAY1", "TXN1", Money::from_major(10));

        let notice = provider
            .verify_callback(&body, &signature, Utc::now())
            .unwrap();
        assert_eq!(notice.transaction_id.as_deref(), Some("TXN1"));
        assert!(
            provider
                .verify_callback(&body, "00ff", Utc::now())
                .is_err()
        );
    }

    #[tokio::test]
    async fn query_reflects_provider_side_settlement() {
        let provider = InMemoryProvider::new(PaymentMethod::Card, "s3cret");
        let payment = Payment::new(
            OrderId::new(),
            PaymentMethod::Card,
            Money::from_major(10),
            "cruise",
            Utc::now(),
        );
        assert_eq!(
            provider.query(&payment).await.unwrap().status,
            ProviderPaymentStatus::Pending
        );

        provider.settle(&payment.payment_no, "TXN9", payment.amount);
        let remote = provider.query(&payment).await.unwrap();
        assert_eq!(remote.status, ProviderPaymentStatus::Succeeded);
        assert_eq!(remote.transaction_id.as_deref(), Some("TXN9"));
    }

    #[tokio::test]
    async fn pending_refund_settles_later() {
        let provider = InMemoryProvider::new(PaymentMethod::Wallet, "s3cret");
        provider.set_refund_behavior(ProviderBehavior::Pending);
        let payment = Payment::new(
            OrderId::new(),
            PaymentMethod::Wallet,
            Money::from_major(10),
            "cruise",
            Utc::now(),
        );
        let instruction = RefundInstruction {
            refund_no: "REF1".into(),
            payment_no: payment.payment_no.clone(),
            provider_reference: None,
            transaction_id: None,
            amount: Money::from_major(5),
            payment_amount: payment.amount,
            reason: "test".into(),
        };

        let first = provider.refund(&instruction).await.unwrap();
        assert_eq!(first.status, ProviderRefundStatus::Pending);

        provider.complete_refund("REF1");
        let later = provider.query_refund("REF1", &payment).await.unwrap();
        assert_eq!(later.status, ProviderRefundStatus::Succeeded);
        assert_eq!(provider.refund_calls(), 1);
    }
}
