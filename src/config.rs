//! Configuration for Keepsake
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Keepsake - fulfillment service for personalized digital gifts
#[derive(Parser, Debug, Clone)]
#[command(name = "keepsake")]
#[command(about = "Gift fulfillment: generation, payment reconciliation, scheduled delivery, sealed reveals")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (memory-only store allowed, unsigned webhooks accepted)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "keepsake")]
    pub mongodb_db: String,

    /// Payment webhook signing secret (required in production)
    #[arg(long, env = "WEBHOOK_SECRET")]
    pub webhook_secret: Option<String>,

    /// Payment processor API base URL
    #[arg(long, env = "PAYMENT_API_URL", default_value = "https://api.payments.example/v1")]
    pub payment_api_url: String,

    /// Payment processor API key (required in production)
    #[arg(long, env = "PAYMENT_API_KEY")]
    pub payment_api_key: Option<String>,

    /// Content-generation provider API base URL
    #[arg(long, env = "PROVIDER_API_URL", default_value = "https://api.generation.example/v1")]
    pub provider_api_url: String,

    /// Content-generation provider API key (required in production)
    #[arg(long, env = "PROVIDER_API_KEY")]
    pub provider_api_key: Option<String>,

    /// Email delivery API base URL
    #[arg(long, env = "EMAIL_API_URL", default_value = "https://api.mail.example/v1")]
    pub email_api_url: String,

    /// Email delivery API key (required in production)
    #[arg(long, env = "EMAIL_API_KEY")]
    pub email_api_key: Option<String>,

    /// Sender address for outgoing gift and confirmation mail
    #[arg(long, env = "EMAIL_FROM", default_value = "gifts@keepsake.example")]
    pub email_from: String,

    /// Public base URL of this service, used to build sealed-knot links
    #[arg(long, env = "PUBLIC_URL", default_value = "http://localhost:8080")]
    pub public_url: String,

    /// Delivery scheduler sweep interval in seconds
    #[arg(long, env = "SCHEDULER_INTERVAL_SECS", default_value = "60")]
    pub scheduler_interval_secs: u64,

    /// Per-call timeout for provider/payment/email HTTP requests, milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Hard wall-clock ceiling for a single generation commission, seconds
    #[arg(long, env = "GENERATION_CEILING_SECS", default_value = "300")]
    pub generation_ceiling_secs: u64,

    /// Path for JSONL usage telemetry (disabled when unset)
    #[arg(long, env = "USAGE_LOG_PATH")]
    pub usage_log_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Effective webhook secret (insecure default only in dev mode)
    pub fn webhook_secret(&self) -> String {
        if self.dev_mode {
            self.webhook_secret
                .clone()
                .unwrap_or_else(|| "dev-only-insecure-secret".to_string())
        } else {
            self.webhook_secret
                .clone()
                .unwrap_or_default()
        }
    }

    /// Build the sealed-knot link for a given access token
    pub fn knot_url(&self, token: &str) -> String {
        format!("{}/knot/{}", self.public_url.trim_end_matches('/'), token)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            if self.webhook_secret.is_none() {
                return Err("WEBHOOK_SECRET is required in production mode".to_string());
            }
            if self.payment_api_key.is_none() {
                return Err("PAYMENT_API_KEY is required in production mode".to_string());
            }
            if self.email_api_key.is_none() {
                return Err("EMAIL_API_KEY is required in production mode".to_string());
            }
            if self.provider_api_key.is_none() {
                return Err("PROVIDER_API_KEY is required in production mode".to_string());
            }
        }

        if self.scheduler_interval_secs == 0 {
            return Err("SCHEDULER_INTERVAL_SECS must be greater than zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_args() -> Args {
        Args::parse_from(["keepsake", "--dev-mode"])
    }

    #[test]
    fn test_dev_mode_validates_without_secrets() {
        let args = dev_args();
        assert!(args.dev_mode);
        assert!(args.validate().is_ok());
        assert_eq!(args.webhook_secret(), "dev-only-insecure-secret");
    }

    #[test]
    fn test_production_requires_secrets() {
        let args = Args::parse_from(["keepsake"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_knot_url_strips_trailing_slash() {
        let mut args = dev_args();
        args.public_url = "https://keepsake.example/".to_string();
        assert_eq!(args.knot_url("abc123"), "https://keepsake.example/knot/abc123");
    }
}
