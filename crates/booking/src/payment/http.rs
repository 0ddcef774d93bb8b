use std::time::Duration;

use reqwest::{Client, Response, StatusCode, header::CONTENT_TYPE};
use serde::{Serialize, de::DeserializeOwned};

use super::PaymentError;
use super::signature::sign_hex;

/// Signed JSON over HTTP to one provider's API.
///
/// Transport failures and 5xx answers are reported as
/// [`PaymentError::ProviderUnavailable`]; 4xx answers as
/// [`PaymentError::ProviderRejected`] carrying the response body.
#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
    provider: &'static str,
    base_url: String,
    secret: String,
    signature_header: &'static str,
}

impl ProviderClient {
    pub fn new(
        provider: &'static str,
        base_url: impl Into<String>,
        secret: impl Into<String>,
        signature_header: &'static str,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            provider,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
            signature_header,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, PaymentError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)
            .map_err(|e| PaymentError::unavailable(self.provider, e))?;
        let response = self
            .client
            .post(self.url(path))
            .header(CONTENT_TYPE, "application/json")
            .header(self.signature_header, sign_hex(&self.secret, &payload))
            .body(payload)
            .send()
            .await
            .map_err(|e| PaymentError::unavailable(self.provider, e))?;
        self.decode(response).await
    }

    pub(crate) async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, PaymentError> {
        let response = self
            .client
            .get(self.url(path))
            .header(self.signature_header, sign_hex(&self.secret, path.as_bytes()))
            .send()
            .await
            .map_err(|e| PaymentError::unavailable(self.provider, e))?;
        self.decode(response).await
    }

    async fn decode<R: DeserializeOwned>(&self, response: Response) -> Result<R, PaymentError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<R>().await.map_err(|e| {
                PaymentError::unavailable(self.provider, format!("unreadable response: {e}"))
            });
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(provider = self.provider, %status, body = %body, "provider returned an error");
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            Err(PaymentError::rejected(self.provider, body))
        } else {
            Err(PaymentError::unavailable(
                self.provider,
                format!("status {}", status.as_u16()),
            ))
        }
    }
}
