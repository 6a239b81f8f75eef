//! Usage logging for provider quota tracking
//!
//! Logs generation and delivery usage events in JSONL format. Telemetry is
//! fire-and-forget: a write failure is logged and swallowed, it must never
//! block or fail the request that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Usage event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Generation job submitted to a provider
    GenerationRequested,
    /// Generation job finished (success, fallback, or failure)
    GenerationFinished,
    /// Gift email dispatched
    GiftDelivered,
    /// Payment confirmation email dispatched
    ConfirmationSent,
}

/// Usage event for quota tracking and analytics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Event type
    pub event_type: EventType,
    /// Node that handled the request
    pub node_id: String,
    /// Content provider name (for generation events)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Provider request count consumed by this event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_count: Option<u64>,
    /// Content size in provider units (characters, seconds, pixels)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_units: Option<u64>,
    /// Gift id the event belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gift_id: Option<String>,
    /// Outcome tag (completed, fallback, failed, timeout)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    /// Additional metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl UsageEvent {
    /// Create a new usage event
    pub fn new(event_type: EventType, node_id: String) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            node_id,
            provider: None,
            request_count: None,
            content_units: None,
            gift_id: None,
            outcome: None,
            metadata: None,
        }
    }

    /// Set the provider name
    pub fn with_provider(mut self, provider: String) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the request count
    pub fn with_request_count(mut self, count: u64) -> Self {
        self.request_count = Some(count);
        self
    }

    /// Set the content size units
    pub fn with_content_units(mut self, units: u64) -> Self {
        self.content_units = Some(units);
        self
    }

    /// Set the gift id
    pub fn with_gift(mut self, gift_id: String) -> Self {
        self.gift_id = Some(gift_id);
        self
    }

    /// Set the outcome tag
    pub fn with_outcome(mut self, outcome: &str) -> Self {
        self.outcome = Some(outcome.to_string());
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Usage logger that writes events to a JSONL file
#[derive(Clone)]
pub struct UsageLogger {
    inner: Arc<Mutex<UsageLoggerInner>>,
    node_id: String,
}

struct UsageLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl UsageLogger {
    /// Create a new usage logger
    pub fn new(node_id: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(UsageLoggerInner {
                writer: None,
                path: None,
            })),
            node_id,
        }
    }

    /// Initialize file logging to the specified path
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let writer = BufWriter::new(file);

        let mut inner = self.inner.lock().await;
        inner.writer = Some(writer);
        inner.path = Some(path.clone());

        info!("Usage logging initialized to {}", path.display());
        Ok(())
    }

    /// Log a usage event. Errors are swallowed and logged.
    pub async fn log(&self, event: UsageEvent) {
        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize usage event: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;

        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", jsonl) {
                error!("Failed to write usage event: {}", e);
            }
            // Flush periodically for durability
            if let Err(e) = writer.flush() {
                error!("Failed to flush usage log: {}", e);
            }
        }
    }

    /// Log a generation submission
    pub async fn log_generation_requested(&self, provider: &str, gift_id: Option<&str>) {
        let mut event = UsageEvent::new(EventType::GenerationRequested, self.node_id.clone())
            .with_provider(provider.to_string())
            .with_request_count(1);
        if let Some(id) = gift_id {
            event = event.with_gift(id.to_string());
        }
        self.log(event).await;
    }

    /// Log a generation result
    pub async fn log_generation_finished(
        &self,
        provider: &str,
        outcome: &str,
        content_units: u64,
    ) {
        let event = UsageEvent::new(EventType::GenerationFinished, self.node_id.clone())
            .with_provider(provider.to_string())
            .with_outcome(outcome)
            .with_content_units(content_units);
        self.log(event).await;
    }

    /// Log a delivered gift
    pub async fn log_gift_delivered(&self, gift_id: &str) {
        let event = UsageEvent::new(EventType::GiftDelivered, self.node_id.clone())
            .with_gift(gift_id.to_string());
        self.log(event).await;
    }

    /// Get the node ID
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = UsageEvent::new(EventType::GenerationFinished, "node-1".to_string())
            .with_provider("imagegen".to_string())
            .with_outcome("fallback")
            .with_content_units(2048);

        let jsonl = event.to_jsonl().unwrap();
        assert!(jsonl.contains("generation_finished"));
        assert!(jsonl.contains("imagegen"));
        assert!(jsonl.contains("fallback"));
        assert!(jsonl.contains("2048"));
    }

    #[tokio::test]
    async fn test_log_without_file_is_noop() {
        // No file initialized: logging must not fail the caller
        let logger = UsageLogger::new("node-1".to_string());
        logger.log_generation_requested("voicegen", Some("gift-1")).await;
        logger.log_gift_delivered("gift-1").await;
    }
}
