//! Wallet-style app payments.
//!
//! Every callback body is signed with HMAC-SHA256 of the raw bytes, hex
//! encoded in `Wallet-Signature`. The provider expects `success` or `fail`
//! as the reply body.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Money, Payment, PaymentMethod};
use serde::{Deserialize, Serialize};

use super::http::ProviderClient;
use super::signature::verify_hex;
use super::{
    IntentHandle, PaymentError, PaymentIntent, PaymentProvider, ProviderPayment,
    ProviderPaymentStatus, ProviderRefund, ProviderRefundStatus, RefundInstruction,
};

const NAME: &str = "wallet";
pub const SIGNATURE_HEADER: &str = "Wallet-Signature";

/// Trade record as the wallet reports it in callbacks and queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTrade {
    pub payment_no: String,
    /// `SUCCESS`, `NOTPAY`, `USERPAYING`, `CLOSED`, `PAYERROR` or `REFUND`.
    pub trade_state: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Minor units.
    pub amount: i64,
}

impl WalletTrade {
    fn into_payment(self) -> ProviderPayment {
        let status = match self.trade_state.as_str() {
            "SUCCESS" | "REFUND" => ProviderPaymentStatus::Succeeded,
            "CLOSED" | "REVOKED" => ProviderPaymentStatus::Closed,
            "PAYERROR" => ProviderPaymentStatus::Failed,
            _ => ProviderPaymentStatus::Pending,
        };
        ProviderPayment {
            payment_no: self.payment_no,
            status,
            transaction_id: self.transaction_id,
            amount: Money::from_cents(self.amount),
        }
    }
}

#[derive(Debug, Serialize)]
struct PrepayRequest<'a> {
    payment_no: &'a str,
    order_number: &'a str,
    amount: i64,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct PrepayResponse {
    prepay_id: String,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct WalletRefundRequest<'a> {
    refund_no: &'a str,
    payment_no: &'a str,
    transaction_id: Option<&'a str>,
    amount: i64,
    total: i64,
    reason: &'a str,
}

#[derive(Debug, Deserialize)]
struct WalletRefund {
    refund_no: String,
    #[serde(default)]
    refund_id: Option<String>,
    /// `SUCCESS`, `PROCESSING`, `ABNORMAL` or `CLOSED`.
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

impl WalletRefund {
    fn into_refund(self) -> ProviderRefund {
        let status = match self.status.as_str() {
            "SUCCESS" => ProviderRefundStatus::Succeeded,
            "ABNORMAL" | "CLOSED" => ProviderRefundStatus::Failed,
            _ => ProviderRefundStatus::Pending,
        };
        ProviderRefund {
            refund_no: self.refund_no,
            status,
            provider_refund_id: self.refund_id,
            failure_reason: self.reason,
        }
    }
}

pub struct WalletProvider {
    client: ProviderClient,
}

impl WalletProvider {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client: ProviderClient::new(NAME, base_url, secret, SIGNATURE_HEADER),
        }
    }
}

#[async_trait]
impl PaymentProvider for WalletProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Wallet
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn acknowledgement(&self, accepted: bool) -> &'static str {
        if accepted { "success" } else { "fail" }
    }

    async fn create_intent(&self, intent: &PaymentIntent) -> Result<IntentHandle, PaymentError> {
        let response: PrepayResponse = self
            .client
            .post(
                "/v1/payments",
                &PrepayRequest {
                    payment_no: &intent.payment_no,
                    order_number: &intent.order_number,
                    amount: intent.amount.cents(),
                    description: &intent.description,
                },
            )
            .await?;

        let mut payload = response.extra;
        payload.insert(
            "prepay_id".into(),
            serde_json::Value::String(response.prepay_id.clone()),
        );
        Ok(IntentHandle {
            provider_reference: response.prepay_id,
            client_payload: serde_json::Value::Object(payload),
        })
    }

    fn verify_callback(
        &self,
        body: &[u8],
        signature: &str,
        _now: DateTime<Utc>,
    ) -> Result<ProviderPayment, PaymentError> {
        if !verify_hex(self.client.secret(), body, signature) {
            return Err(PaymentError::VerificationFailed(
                "wallet signature mismatch".into(),
            ));
        }
        let trade: WalletTrade = serde_json::from_slice(body).map_err(|e| {
            PaymentError::VerificationFailed(format!("unreadable wallet callback: {e}"))
        })?;
        Ok(trade.into_payment())
    }

    async fn query(&self, payment: &Payment) -> Result<ProviderPayment, PaymentError> {
        let trade: WalletTrade = self
            .client
            .get(&format!("/v1/payments/{}", payment.payment_no))
            .await?;
        Ok(trade.into_payment())
    }

    async fn refund(&self, refund: &RefundInstruction) -> Result<ProviderRefund, PaymentError> {
        let response: WalletRefund = self
            .client
            .post(
                "/v1/refunds",
                &WalletRefundRequest {
                    refund_no: &refund.refund_no,
                    payment_no: &refund.payment_no,
                    transaction_id: refund.transaction_id.as_deref(),
                    amount: refund.amount.cents(),
                    total: refund.payment_amount.cents(),
                    reason: &refund.reason,
                },
            )
            .await?;
        Ok(response.into_refund())
    }

    async fn query_refund(
        &self,
        refund_no: &str,
        _payment: &Payment,
    ) -> Result<ProviderRefund, PaymentError> {
        let response: WalletRefund = self
            .client
            .get(&format!("/v1/refunds/{refund_no}"))
            .await?;
        Ok(response.into_refund())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::OrderId;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::payment::signature::sign_hex;

    fn payment() -> Payment {
        Payment::new(
            OrderId::new(),
            PaymentMethod::Wallet,
            Money::from_cents(84_000),
            "cruise",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn create_intent_returns_prepay_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .and(header_exists(SIGNATURE_HEADER))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"prepay_id": "wx-prepay-1", "nonce": "abc"})),
            )
            .mount(&server)
            .await;

        let provider = WalletProvider::new(server.uri(), "secret");
        let handle = provider
            .create_intent(&PaymentIntent {
                payment_no: "PAY1".into(),
                order_number: "ORD1".into(),
                amount: Money::from_cents(100),
                description: "cruise".into(),
            })
            .await
            .unwrap();

        assert_eq!(handle.provider_reference, "wx-prepay-1");
        assert_eq!(handle.client_payload["nonce"], "abc");
    }

    #[tokio::test]
    async fn server_error_is_unavailable_and_client_error_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/PAY500"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/refunds"))
            .respond_with(ResponseTemplate::new(400).set_body_string("NOT_ENOUGH"))
            .mount(&server)
            .await;

        let provider = WalletProvider::new(server.uri(), "secret");
        let mut pending = payment();
        pending.payment_no = "PAY500".into();
        assert!(matches!(
            provider.query(&pending).await.unwrap_err(),
            PaymentError::ProviderUnavailable { .. }
        ));

        let err = provider
            .refund(&RefundInstruction {
                refund_no: "REF1".into(),
                payment_no: "PAY1".into(),
                provider_reference: None,
                transaction_id: Some("txn".into()),
                amount: Money::from_cents(10),
                payment_amount: Money::from_cents(10),
                reason: "test".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, PaymentError::rejected("wallet", "NOT_ENOUGH"));
    }

    #[tokio::test]
    async fn query_maps_trade_state() {
        let server = MockServer::start().await;
        let payment = payment();
        Mock::given(method("GET"))
            .and(path(format!("/v1/payments/{}", payment.payment_no)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payment_no": payment.payment_no,
                "trade_state": "SUCCESS",
                "transaction_id": "4200001",
                "amount": 84_000
            })))
            .mount(&server)
            .await;

        let provider = WalletProvider::new(server.uri(), "secret");
        let remote = provider.query(&payment).await.unwrap();
        assert_eq!(remote.status, ProviderPaymentStatus::Succeeded);
        assert_eq!(remote.transaction_id.as_deref(), Some("4200001"));
        assert_eq!(remote.amount, payment.amount);
    }

    #[test]
    fn callback_requires_matching_signature() {
        let provider = WalletProvider::new("http://unused", "secret");
        let body = serde_json::to_vec(&json!({
            "payment_no": "PAY1",
            "trade_state": "SUCCESS",
            "transaction_id": "4200001",
            "amount": 500
        }))
        .unwrap();

        let notice = provider
            .verify_callback(&body, &sign_hex("secret", &body), Utc::now())
            .unwrap();
        assert_eq!(notice.status, ProviderPaymentStatus::Succeeded);

        assert!(matches!(
            provider.verify_callback(&body, &sign_hex("wrong", &body), Utc::now()),
            Err(PaymentError::VerificationFailed(_))
        ));
    }

    #[test]
    fn acknowledgements_are_literal() {
        let provider = WalletProvider::new("http://unused", "secret");
        assert_eq!(provider.acknowledgement(true), "success");
        assert_eq!(provider.acknowledgement(false), "fail");
    }
}
