//! HMAC-SHA256 signing of provider requests and callbacks.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, payload: &[u8]) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take any size");
    mac.update(payload);
    mac
}

/// Hex-encoded HMAC-SHA256 of `payload`.
pub fn sign_hex(secret: &str, payload: &[u8]) -> String {
    hex::encode(mac(secret, payload).finalize().into_bytes())
}

/// Checks a hex signature in constant time.
pub fn verify_hex(secret: &str, payload: &[u8], signature: &str) -> bool {
    match hex::decode(signature.trim()) {
        Ok(expected) => mac(secret, payload).verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

/// Parsed `t=<unix seconds>,v1=<hex>` card signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedSignature {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl TimestampedSignature {
    pub fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => signatures.push(value.to_string()),
                _ => {}
            }
        }
        Some(Self {
            timestamp: timestamp?,
            signatures,
        })
        .filter(|s| !s.signatures.is_empty())
    }

    /// Builds the header value for `body` signed at `timestamp`.
    pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
        format!(
            "t={timestamp},v1={}",
            sign_hex(secret, &Self::signed_payload(timestamp, body))
        )
    }

    /// Whether any `v1` entry signs `body` at this header's timestamp.
    pub fn verify(&self, secret: &str, body: &[u8]) -> bool {
        let payload = Self::signed_payload(self.timestamp, body);
        self.signatures
            .iter()
            .any(|signature| verify_hex(secret, &payload, signature))
    }

    fn signed_payload(timestamp: i64, body: &[u8]) -> Vec<u8> {
        let mut payload = format!("{timestamp}.").into_bytes();
        payload.extend_from_slice(body);
        payload
    }
}
