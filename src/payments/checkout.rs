//! Hosted checkout session creation
//!
//! The processor hosts the payment page; Keepsake only creates the session
//! and stores the returned reference on the payment record. The session
//! metadata carries gift id, buyer email, and the internal payment id so
//! the webhook can resolve all three entities without guessing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::payments::webhook::CheckoutMetadata;
use crate::types::{KeepsakeError, Result};

/// Request to create a hosted checkout session
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub amount_cents: i64,
    pub currency: String,
    /// Human-readable product label shown on the payment page
    pub product_label: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: CheckoutMetadata,
}

/// A created checkout session
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// External correlation id, stored on the payment record
    pub session_id: String,
    /// URL the buyer is redirected to
    pub checkout_url: String,
}

/// Payment processor contract
#[async_trait]
pub trait CheckoutClient: Send + Sync {
    async fn create_session(&self, request: CheckoutRequest) -> Result<CheckoutSession>;
}

/// Configuration for the HTTP checkout adapter
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub api_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// HTTP adapter for the payment processor
pub struct HttpCheckoutClient {
    config: CheckoutConfig,
    client: reqwest::Client,
}

impl HttpCheckoutClient {
    pub fn new(config: CheckoutConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| KeepsakeError::Payment(format!("failed to build client: {}", e)))?;

        info!(api_url = %config.api_url, "Checkout client created");

        Ok(Self { config, client })
    }
}

#[async_trait]
impl CheckoutClient for HttpCheckoutClient {
    async fn create_session(&self, request: CheckoutRequest) -> Result<CheckoutSession> {
        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| KeepsakeError::Payment(format!("session create failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(KeepsakeError::Payment(format!(
                "processor returned {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| KeepsakeError::Payment(format!("invalid session response: {}", e)))
    }
}
