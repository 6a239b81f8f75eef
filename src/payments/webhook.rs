//! Payment webhook parsing and signature verification
//!
//! The processor signs each delivery with HMAC-SHA256 over
//! `"{timestamp}.{body}"`, carried in a `t=...,v1=...` header. Signatures
//! are required in production; dev mode accepts an unsigned JSON body.
//! The processor retries deliveries, so every event here may arrive more
//! than once. Idempotency is the reconciliation engine's job; this module
//! only authenticates and decodes.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::types::{KeepsakeError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook before it is rejected as stale
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Webhook event types of interest
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    CheckoutCompleted,
    CheckoutExpired,
    CheckoutAsyncPaymentFailed,
}

/// Opaque metadata attached to the checkout session at creation time so the
/// webhook handler can resolve context without a secondary lookup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutMetadata {
    #[serde(default)]
    pub gift_id: String,
    #[serde(default)]
    pub payment_id: String,
    #[serde(default)]
    pub buyer_email: Option<String>,
}

/// A decoded webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    /// Checkout session reference (external correlation id)
    pub session_id: String,
    /// External transaction reference, present on completed events
    #[serde(default)]
    pub transaction_ref: Option<String>,
    #[serde(default)]
    pub metadata: CheckoutMetadata,
}

/// Verify the signature header and decode the event body.
///
/// `signature` is the raw header value; `None` is accepted only in dev mode.
pub fn parse_event(
    body: &[u8],
    signature: Option<&str>,
    secret: &str,
    dev_mode: bool,
    now_unix: i64,
) -> Result<WebhookEvent> {
    match signature {
        Some(header) => verify_signature(body, header, secret, now_unix)?,
        None => {
            if !dev_mode {
                return Err(KeepsakeError::Payment(
                    "missing webhook signature".to_string(),
                ));
            }
        }
    }

    serde_json::from_slice(body)
        .map_err(|e| KeepsakeError::Payment(format!("invalid webhook body: {}", e)))
}

/// Check an HMAC-SHA256 `t=...,v1=...` signature within the tolerance window
fn verify_signature(body: &[u8], header: &str, secret: &str, now_unix: i64) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut signature: Option<Vec<u8>> = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = value.parse().ok();
            }
            Some(("v1", value)) => {
                signature = hex::decode(value).ok();
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| KeepsakeError::Payment("malformed webhook signature header".to_string()))?;
    let signature = signature
        .ok_or_else(|| KeepsakeError::Payment("malformed webhook signature header".to_string()))?;

    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(KeepsakeError::Payment(
            "webhook signature timestamp outside tolerance".to_string(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| KeepsakeError::Payment(format!("invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);

    mac.verify_slice(&signature)
        .map_err(|_| KeepsakeError::Payment("webhook signature mismatch".to_string()))
}

/// Sign a body the way the processor does. Used by tests and the dev-mode
/// replay tooling.
pub fn sign_body(body: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    fn event_body() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": "checkout_completed",
            "session_id": "cs_123",
            "transaction_ref": "txn_456",
            "metadata": {
                "gift_id": "gift-1",
                "payment_id": "pay-1",
                "buyer_email": "ada@example.com"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_signature_decodes() {
        let body = event_body();
        let now = 1_700_000_000;
        let header = sign_body(&body, SECRET, now);

        let event = parse_event(&body, Some(&header), SECRET, false, now).unwrap();
        assert_eq!(event.event_type, WebhookEventType::CheckoutCompleted);
        assert_eq!(event.session_id, "cs_123");
        assert_eq!(event.metadata.payment_id, "pay-1");
    }

    #[test]
    fn test_bad_signature_rejected() {
        let body = event_body();
        let now = 1_700_000_000;
        let header = sign_body(&body, "wrong-secret", now);

        assert!(parse_event(&body, Some(&header), SECRET, false, now).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let body = event_body();
        let signed_at = 1_700_000_000;
        let header = sign_body(&body, SECRET, signed_at);

        let much_later = signed_at + SIGNATURE_TOLERANCE_SECS + 1;
        assert!(parse_event(&body, Some(&header), SECRET, false, much_later).is_err());
    }

    #[test]
    fn test_unsigned_only_in_dev_mode() {
        let body = event_body();
        assert!(parse_event(&body, None, SECRET, false, 0).is_err());
        assert!(parse_event(&body, None, SECRET, true, 0).is_ok());
    }
}
