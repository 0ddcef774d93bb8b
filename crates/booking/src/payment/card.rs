//! Card payments through payment intents.
//!
//! Callbacks are event envelopes signed as `t=<unix>,v1=<hex>` over
//! `"<t>.<body>"`. A signature older than [`TOLERANCE_SECS`] is refused.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Money, Payment, PaymentMethod};
use serde::{Deserialize, Serialize};

use super::http::ProviderClient;
use super::signature::TimestampedSignature;
use super::{
    IntentHandle, PaymentError, PaymentIntent, PaymentProvider, ProviderPayment,
    ProviderPaymentStatus, ProviderRefund, ProviderRefundStatus, RefundInstruction,
};

const NAME: &str = "card";
pub const SIGNATURE_HEADER: &str = "Card-Signature";
pub const TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentMetadata {
    #[serde(default)]
    pub payment_no: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardIntent {
    pub id: String,
    /// `succeeded`, `processing`, `requires_payment_method`,
    /// `requires_action` or `canceled`.
    pub status: String,
    pub amount: i64,
    #[serde(default)]
    pub latest_charge: Option<String>,
    #[serde(default)]
    pub metadata: IntentMetadata,
}

impl CardIntent {
    fn into_payment(self, status: ProviderPaymentStatus) -> ProviderPayment {
        ProviderPayment {
            payment_no: self.metadata.payment_no,
            status,
            // The charge id identifies the settlement; fall back to the intent.
            transaction_id: Some(self.latest_charge.unwrap_or(self.id)),
            amount: Money::from_cents(self.amount),
        }
    }

    fn status(&self) -> ProviderPaymentStatus {
        match self.status.as_str() {
            "succeeded" => ProviderPaymentStatus::Succeeded,
            "canceled" => ProviderPaymentStatus::Closed,
            _ => ProviderPaymentStatus::Pending,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: CardIntent,
}

/// Callback envelope.
#[derive(Debug, Deserialize)]
struct CardEvent {
    #[serde(rename = "type")]
    kind: String,
    data: EventData,
}

#[derive(Debug, Serialize)]
struct CreateIntent<'a> {
    amount: i64,
    description: &'a str,
    metadata: IntentMetadata,
}

#[derive(Debug, Deserialize)]
struct CreatedIntent {
    id: String,
    client_secret: String,
}

#[derive(Debug, Serialize)]
struct RefundMetadata<'a> {
    refund_no: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRefund<'a> {
    payment_intent: &'a str,
    amount: i64,
    reason: &'a str,
    metadata: RefundMetadata<'a>,
}

#[derive(Debug, Deserialize)]
struct CardRefund {
    id: String,
    /// `succeeded`, `pending`, `failed` or `canceled`.
    status: String,
    #[serde(default)]
    failure_reason: Option<String>,
}

impl CardRefund {
    fn into_refund(self, refund_no: &str) -> ProviderRefund {
        let status = match self.status.as_str() {
            "succeeded" => ProviderRefundStatus::Succeeded,
            "failed" | "canceled" => ProviderRefundStatus::Failed,
            _ => ProviderRefundStatus::Pending,
        };
        ProviderRefund {
            refund_no: refund_no.to_string(),
            status,
            provider_refund_id: Some(self.id),
            failure_reason: self.failure_reason,
        }
    }
}

pub struct CardProvider {
    client: ProviderClient,
}

impl CardProvider {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client: ProviderClient::new(NAME, base_url, secret, SIGNATURE_HEADER),
        }
    }

    fn intent_reference<'a>(payment: &'a Payment) -> Result<&'a str, PaymentError> {
        payment.provider_reference.as_deref().ok_or_else(|| {
            PaymentError::rejected(NAME, format!("payment {} has no intent", payment.payment_no))
        })
    }
}

#[async_trait]
impl PaymentProvider for CardProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Card
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn acknowledgement(&self, accepted: bool) -> &'static str {
        if accepted { "[accepted]" } else { "[rejected]" }
    }

    async fn create_intent(&self, intent: &PaymentIntent) -> Result<IntentHandle, PaymentError> {
        let created: CreatedIntent = self
            .client
            .post(
                "/v1/payment_intents",
                &CreateIntent {
                    amount: intent.amount.cents(),
                    description: &intent.description,
                    metadata: IntentMetadata {
                        payment_no: intent.payment_no.clone(),
                        order_number: Some(intent.order_number.clone()),
                    },
                },
            )
            .await?;
        Ok(IntentHandle {
            client_payload: serde_json::json!({
                "payment_intent": created.id,
                "client_secret": created.client_secret,
            }),
            provider_reference: created.id,
        })
    }

    fn verify_callback(
        &self,
        body: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<ProviderPayment, PaymentError> {
        let header = TimestampedSignature::parse(signature).ok_or_else(|| {
            PaymentError::VerificationFailed("malformed card signature header".into())
        })?;
        if (now.timestamp() - header.timestamp).abs() > TOLERANCE_SECS {
            return Err(PaymentError::VerificationFailed(
                "card signature timestamp outside tolerance".into(),
            ));
        }
        if !header.verify(self.client.secret(), body) {
            return Err(PaymentError::VerificationFailed(
                "card signature mismatch".into(),
            ));
        }

        let event: CardEvent = serde_json::from_slice(body).map_err(|e| {
            PaymentError::VerificationFailed(format!("unreadable card callback: {e}"))
        })?;
        let status = match event.kind.as_str() {
            "payment_intent.succeeded" => ProviderPaymentStatus::Succeeded,
            "payment_intent.payment_failed" => ProviderPaymentStatus::Failed,
            "payment_intent.canceled" => ProviderPaymentStatus::Closed,
            _ => ProviderPaymentStatus::Pending,
        };
        Ok(event.data.object.into_payment(status))
    }

    async fn query(&self, payment: &Payment) -> Result<ProviderPayment, PaymentError> {
        let reference = Self::intent_reference(payment)?;
        let mut intent: CardIntent = self
            .client
            .get(&format!("/v1/payment_intents/{reference}"))
            .await?;
        if intent.metadata.payment_no.is_empty() {
            intent.metadata.payment_no = payment.payment_no.clone();
        }
        let status = intent.status();
        Ok(intent.into_payment(status))
    }

    async fn refund(&self, refund: &RefundInstruction) -> Result<ProviderRefund, PaymentError> {
        let reference = refund.provider_reference.as_deref().ok_or_else(|| {
            PaymentError::rejected(NAME, format!("payment {} has no intent", refund.payment_no))
        })?;
        let created: CardRefund = self
            .client
            .post(
                "/v1/refunds",
                &CreateRefund {
                    payment_intent: reference,
                    amount: refund.amount.cents(),
                    reason: &refund.reason,
                    metadata: RefundMetadata {
                        refund_no: &refund.refund_no,
                    },
                },
            )
            .await?;
        Ok(created.into_refund(&refund.refund_no))
    }

    async fn query_refund(
        &self,
        refund_no: &str,
        _payment: &Payment,
    ) -> Result<ProviderRefund, PaymentError> {
        let found: CardRefund = self
            .client
            .get(&format!("/v1/refunds/by_reference/{refund_no}"))
            .await?;
        Ok(found.into_refund(refund_no))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use common::OrderId;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn event(kind: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": kind,
            "data": {"object": {
                "id": "pi_1",
                "status": "succeeded",
                "amount": 84_000,
                "latest_charge": "ch_1",
                "metadata": {"payment_no": "PAY1"}
            }}
        }))
        .unwrap()
    }

    #[test]
    fn succeeded_event_carries_charge_id() {
        let provider = CardProvider::new("http://unused", "whsec");
        let now = Utc::now();
        let body = event("payment_intent.succeeded");
        let header = TimestampedSignature::sign("whsec", now.timestamp(), &body);

        let notice = provider.verify_callback(&body, &header, now).unwrap();
        assert_eq!(notice.status, ProviderPaymentStatus::Succeeded);
        assert_eq!(notice.payment_no, "PAY1");
        assert_eq!(notice.transaction_id.as_deref(), Some("ch_1"));
        assert_eq!(notice.amount, Money::from_cents(84_000));
    }

    #[test]
    fn stale_or_forged_signatures_are_refused() {
        let provider = CardProvider::new("http://unused", "whsec");
        let now = Utc::now();
        let body = event("payment_intent.succeeded");

        let stale = TimestampedSignature::sign(
            "whsec",
            (now - Duration::seconds(TOLERANCE_SECS + 1)).timestamp(),
            &body,
        );
        let forged = TimestampedSignature::sign("other", now.timestamp(), &body);

        for header in [stale, forged, "v1=deadbeef".to_string()] {
            assert!(matches!(
                provider.verify_callback(&body, &header, now),
                Err(PaymentError::VerificationFailed(_))
            ));
        }
    }

    #[test]
    fn failure_events_map_to_failed_and_closed() {
        let provider = CardProvider::new("http://unused", "whsec");
        let now = Utc::now();
        for (kind, expected) in [
            ("payment_intent.payment_failed", ProviderPaymentStatus::Failed),
            ("payment_intent.canceled", ProviderPaymentStatus::Closed),
            ("charge.updated", ProviderPaymentStatus::Pending),
        ] {
            let body = event(kind);
            let header = TimestampedSignature::sign("whsec", now.timestamp(), &body);
            let notice = provider.verify_callback(&body, &header, now).unwrap();
            assert_eq!(notice.status, expected, "{kind}");
        }
    }

    #[tokio::test]
    async fn refund_targets_the_intent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/refunds"))
            .and(body_partial_json(json!({"payment_intent": "pi_1", "amount": 500})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "re_1", "status": "pending"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/refunds/by_reference/REF1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "re_1", "status": "succeeded"})),
            )
            .mount(&server)
            .await;

        let provider = CardProvider::new(server.uri(), "key");
        let refund = provider
            .refund(&RefundInstruction {
                refund_no: "REF1".into(),
                payment_no: "PAY1".into(),
                provider_reference: Some("pi_1".into()),
                transaction_id: Some("ch_1".into()),
                amount: Money::from_cents(500),
                payment_amount: Money::from_cents(84_000),
                reason: "requested_by_customer".into(),
            })
            .await
            .unwrap();
        assert_eq!(refund.status, ProviderRefundStatus::Pending);
        assert_eq!(refund.provider_refund_id.as_deref(), Some("re_1"));

        let payment = Payment::new(
            OrderId::new(),
            PaymentMethod::Card,
            Money::from_cents(84_000),
            "cruise",
            Utc::now(),
        );
        let settled = provider.query_refund("REF1", &payment).await.unwrap();
        assert_eq!(settled.status, ProviderRefundStatus::Succeeded);
    }

    #[tokio::test]
    async fn query_without_intent_is_rejected() {
        let provider = CardProvider::new("http://unused", "key");
        let payment = Payment::new(
            OrderId::new(),
            PaymentMethod::Card,
            Money::from_cents(100),
            "cruise",
            Utc::now(),
        );
        assert!(matches!(
            provider.query(&payment).await,
            Err(PaymentError::ProviderRejected { .. })
        ));
    }
}
