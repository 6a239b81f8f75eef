//! Email delivery collaborator
//!
//! Keepsake does not render or send mail itself; it hands a recipient,
//! subject, HTML body, and attachments to an external delivery API. The
//! `EmailSender` trait is the seam: the reconciliation engine and the
//! delivery scheduler depend on the trait, production wires the HTTP
//! adapter, tests wire a recording fake.

mod messages;

pub use messages::{confirmation_email, gift_email, knot_email};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{KeepsakeError, Result};

/// One attachment: raw bytes plus an optional content-id so HTML can embed
/// it inline (`<img src="cid:...">`)
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
    /// When set, the attachment is inline-addressable from the HTML body
    pub content_id: Option<String>,
}

/// An outgoing email
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<EmailAttachment>,
}

/// Successful send receipt
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Provider-assigned message id
    pub message_id: String,
}

/// Email delivery contract
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<SendReceipt>;
}

/// Configuration for the HTTP email adapter
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    pub timeout: Duration,
}

/// HTTP API adapter for the email delivery collaborator
pub struct HttpEmailSender {
    config: EmailConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<WireAttachment>,
}

#[derive(Serialize)]
struct WireAttachment {
    filename: String,
    content: String,
    content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_id: Option<String>,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

impl HttpEmailSender {
    pub fn new(config: EmailConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| KeepsakeError::Email(format!("failed to build client: {}", e)))?;

        info!(api_url = %config.api_url, from = %config.from, "Email sender created");

        Ok(Self { config, client })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<SendReceipt> {
        let attachments: Vec<WireAttachment> = message
            .attachments
            .iter()
            .map(|a| WireAttachment {
                filename: a.filename.clone(),
                content: STANDARD.encode(&a.content),
                content_type: a.content_type.clone(),
                content_id: a.content_id.clone(),
            })
            .collect();

        let request = SendRequest {
            from: &self.config.from,
            to: &message.to,
            subject: &message.subject,
            html: &message.html_body,
            attachments,
        };

        let response = self
            .client
            .post(format!("{}/send", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| KeepsakeError::Email(format!("send request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(KeepsakeError::Email(format!(
                "delivery API returned {}: {}",
                status, body
            )));
        }

        let parsed: SendResponse = response
            .json()
            .await
            .map_err(|e| KeepsakeError::Email(format!("invalid delivery API response: {}", e)))?;

        debug!(message_id = %parsed.id, to = %message.to, "Email accepted by delivery API");

        Ok(SendReceipt {
            message_id: parsed.id,
        })
    }
}

/// Recording fake for tests: captures sends, optionally fails on demand
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    pub struct RecordingEmailSender {
        pub sent: Arc<Mutex<Vec<EmailMessage>>>,
        pub fail_next: Arc<Mutex<bool>>,
    }

    impl RecordingEmailSender {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn sent_count(&self) -> usize {
            self.sent.lock().await.len()
        }

        pub async fn set_fail_next(&self, fail: bool) {
            *self.fail_next.lock().await = fail;
        }
    }

    #[async_trait]
    impl EmailSender for RecordingEmailSender {
        async fn send(&self, message: EmailMessage) -> Result<SendReceipt> {
            let mut fail = self.fail_next.lock().await;
            if *fail {
                *fail = false;
                return Err(KeepsakeError::Email("simulated send failure".to_string()));
            }
            self.sent.lock().await.push(message);
            Ok(SendReceipt {
                message_id: format!("msg-{}", uuid::Uuid::new_v4()),
            })
        }
    }
}
