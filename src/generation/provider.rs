//! Content-generation provider boundary
//!
//! Providers are commissioned with a prompt and job parameters and either
//! answer inline (synchronous output) or hand back an opaque job id the
//! poller tracks against the job-status endpoint. The trait is the seam:
//! production wires `HttpContentProvider` instances, tests wire scripted
//! fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::db::schemas::{GiftContent, GiftKind};

/// Classified provider failure, drives retry/abort/fallback decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Credentials rejected. Non-retryable; abort the commission.
    Auth,
    /// Rate limited. Retryable, or degrade to a fallback provider.
    RateLimited,
    /// Transient unavailability. Retryable, or degrade to a fallback.
    Unavailable,
    /// Anything else (malformed response, unexpected status)
    Other,
}

/// Provider-level error
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ProviderError {}

/// A generation request handed to a provider
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub kind: GiftKind,
    /// Textual prompt describing the content to generate
    pub prompt: String,
    /// Provider-specific job parameters (voice id, style, duration)
    pub params: serde_json::Value,
}

/// Result of submitting a generation request
#[derive(Debug, Clone)]
pub enum JobSubmission {
    /// Provider answered synchronously
    Inline(GiftContent),
    /// Provider queued an async job
    Job { job_id: String },
}

/// Status reported by the provider's job endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Queued,
    /// Some providers expose a usable asset reference while still
    /// reporting running; the poller's stuck-job heuristic relies on it
    Running { asset_ref: Option<String> },
    Succeeded { asset_ref: String },
    Failed { reason: String },
}

/// Polling cadence a provider asks for
#[derive(Debug, Clone, Copy)]
pub struct PollProfile {
    /// Delay before the first status check
    pub initial_delay: Duration,
    /// Per-attempt delay ceiling
    pub max_delay: Duration,
}

impl Default for PollProfile {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(20),
        }
    }
}

/// Content-generation provider contract
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Provider name for telemetry and logs
    fn name(&self) -> &str;

    /// Polling cadence for this provider's jobs
    fn poll_profile(&self) -> PollProfile {
        PollProfile::default()
    }

    /// Submit a generation request
    async fn submit(&self, request: &GenerationRequest)
        -> Result<JobSubmission, ProviderError>;

    /// Check the status of a queued job
    async fn job_status(&self, job_id: &str) -> Result<JobStatus, ProviderError>;

    /// Download the finished asset for embedding
    async fn fetch_asset(&self, asset_ref: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Configuration for an HTTP provider client
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub api_url: String,
    pub api_key: String,
    /// Per-call timeout; independent of the overall polling ceiling
    pub timeout: Duration,
    pub poll_profile: PollProfile,
}

/// Generic JSON job-API client for external generation providers
pub struct HttpContentProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    /// One of: queued, running, succeeded, failed
    status: String,
    #[serde(default)]
    asset_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpContentProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ProviderError::new(ProviderErrorKind::Other, format!("client build failed: {}", e))
            })?;

        info!(provider = %config.name, api_url = %config.api_url, "Content provider created");

        Ok(Self { config, client })
    }

    /// Classify an HTTP response status into a provider error kind
    fn classify(status: reqwest::StatusCode) -> ProviderErrorKind {
        match status.as_u16() {
            401 | 403 => ProviderErrorKind::Auth,
            429 => ProviderErrorKind::RateLimited,
            502 | 503 | 504 => ProviderErrorKind::Unavailable,
            _ => ProviderErrorKind::Other,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::new(
            Self::classify(status),
            format!("provider returned {}: {}", status, body),
        ))
    }
}

#[async_trait]
impl ContentProvider for HttpContentProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn poll_profile(&self) -> PollProfile {
        self.config.poll_profile
    }

    async fn submit(
        &self,
        request: &GenerationRequest,
    ) -> Result<JobSubmission, ProviderError> {
        let response = self
            .client
            .post(format!("{}/jobs", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                ProviderError::new(ProviderErrorKind::Unavailable, format!("submit failed: {}", e))
            })?;

        let response = Self::check(response).await?;
        let parsed: SubmitResponse = response.json().await.map_err(|e| {
            ProviderError::new(ProviderErrorKind::Other, format!("invalid submit response: {}", e))
        })?;

        Ok(JobSubmission::Job {
            job_id: parsed.job_id,
        })
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, ProviderError> {
        let response = self
            .client
            .get(format!("{}/jobs/{}", self.config.api_url, job_id))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| {
                ProviderError::new(ProviderErrorKind::Unavailable, format!("status failed: {}", e))
            })?;

        let response = Self::check(response).await?;
        let parsed: StatusResponse = response.json().await.map_err(|e| {
            ProviderError::new(ProviderErrorKind::Other, format!("invalid status response: {}", e))
        })?;

        Ok(match parsed.status.as_str() {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running {
                asset_ref: parsed.asset_url,
            },
            "succeeded" => JobStatus::Succeeded {
                asset_ref: parsed.asset_url.unwrap_or_default(),
            },
            "failed" => JobStatus::Failed {
                reason: parsed.error.unwrap_or_else(|| "unspecified".to_string()),
            },
            other => {
                return Err(ProviderError::new(
                    ProviderErrorKind::Other,
                    format!("unknown job status '{}'", other),
                ))
            }
        })
    }

    async fn fetch_asset(&self, asset_ref: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .get(asset_ref)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| {
                ProviderError::new(ProviderErrorKind::Unavailable, format!("fetch failed: {}", e))
            })?;

        let response = Self::check(response).await?;
        let bytes = response.bytes().await.map_err(|e| {
            ProviderError::new(ProviderErrorKind::Other, format!("asset read failed: {}", e))
        })?;

        Ok(bytes.to_vec())
    }
}
