//! Generation job polling
//!
//! Tracks commissioned jobs against provider job-status endpoints with
//! multiplicative backoff, a hard wall-clock ceiling, and degradation to a
//! fallback provider when the primary is rate limited or unavailable. Every
//! commission terminates: completed, completed with a warning, or failed.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::db::schemas::{GiftContent, GiftKind, ImageCandidate};
use crate::generation::provider::{
    ContentProvider, GenerationRequest, JobStatus, JobSubmission, ProviderError,
    ProviderErrorKind,
};
use crate::logging::UsageLogger;

/// Hard upper bound on how long a commission may poll, regardless of config
pub const MAX_WALL_CLOCK: Duration = Duration::from_secs(300);

/// Backoff multiplier applied after each status check
const BACKOFF_MULTIPLIER: f64 = 1.3;

/// Consecutive transient poll errors tolerated before degrading
const MAX_TRANSIENT_ERRORS: u32 = 3;

/// Poller tuning
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Wall-clock ceiling for one commission, capped at [`MAX_WALL_CLOCK`]
    pub wall_clock_ceiling: Duration,
    /// How long a job may report running before a usable asset reference
    /// is accepted as the finished output
    pub stuck_grace: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            wall_clock_ceiling: MAX_WALL_CLOCK,
            stuck_grace: Duration::from_secs(180),
        }
    }
}

impl PollerConfig {
    fn ceiling(&self) -> Duration {
        self.wall_clock_ceiling.min(MAX_WALL_CLOCK)
    }
}

/// Terminal outcome of a commission
#[derive(Debug, Clone, PartialEq)]
pub enum CommissionResult {
    Completed(GiftContent),
    /// Content produced by a degraded path; the warning is shown to the buyer
    CompletedWithWarning(GiftContent, String),
    /// The job id (when one was issued) is preserved for manual recovery
    Failed {
        reason: String,
        job_id: Option<String>,
    },
}

/// Non-terminal outcome of a single provider attempt
enum AttemptOutcome {
    Done(GiftContent),
    /// Primary is rate limited or unavailable; a fallback may take over
    Degrade(String),
    Fail {
        reason: String,
        job_id: Option<String>,
    },
}

/// Drives commissioned generation jobs to a terminal state
#[derive(Clone)]
pub struct JobPoller {
    config: PollerConfig,
    usage: UsageLogger,
}

impl JobPoller {
    pub fn new(config: PollerConfig, usage: UsageLogger) -> Self {
        Self { config, usage }
    }

    /// Commission content from `primary`, degrading to `fallback` when the
    /// primary is rate limited or unavailable. Always returns a terminal
    /// result within one wall-clock ceiling; a fallback attempt only gets
    /// whatever the primary left of it.
    pub async fn commission(
        &self,
        primary: &dyn ContentProvider,
        fallback: Option<&dyn ContentProvider>,
        request: &GenerationRequest,
    ) -> CommissionResult {
        let deadline = Instant::now() + self.config.ceiling();
        match self.attempt(primary, request, deadline).await {
            AttemptOutcome::Done(content) => {
                self.log_finished(primary.name(), "completed", &content).await;
                CommissionResult::Completed(content)
            }
            AttemptOutcome::Degrade(reason) => {
                warn!(
                    provider = primary.name(),
                    %reason,
                    "Provider degraded, trying fallback"
                );
                let Some(fallback) = fallback else {
                    self.usage
                        .log_generation_finished(primary.name(), "failed", 0)
                        .await;
                    return CommissionResult::Failed {
                        reason,
                        job_id: None,
                    };
                };

                match self.attempt(fallback, request, deadline).await {
                    AttemptOutcome::Done(content) => {
                        self.log_finished(fallback.name(), "fallback", &content).await;
                        let warning = format!(
                            "The {} service was unavailable, so a simpler version \
                             was created with {} instead.",
                            primary.name(),
                            fallback.name()
                        );
                        CommissionResult::CompletedWithWarning(content, warning)
                    }
                    AttemptOutcome::Degrade(fallback_reason)
                    | AttemptOutcome::Fail {
                        reason: fallback_reason,
                        ..
                    } => {
                        error!(
                            primary = primary.name(),
                            fallback = fallback.name(),
                            %reason,
                            %fallback_reason,
                            "Fallback provider also failed"
                        );
                        self.usage
                            .log_generation_finished(fallback.name(), "failed", 0)
                            .await;
                        CommissionResult::Failed {
                            reason: format!("{}; fallback: {}", reason, fallback_reason),
                            job_id: None,
                        }
                    }
                }
            }
            AttemptOutcome::Fail { reason, job_id } => {
                error!(provider = primary.name(), %reason, ?job_id, "Commission failed");
                self.usage
                    .log_generation_finished(primary.name(), "failed", 0)
                    .await;
                CommissionResult::Failed { reason, job_id }
            }
        }
    }

    /// Commission two image candidates concurrently and join the results.
    /// One failure degrades to a single candidate with a warning; two
    /// failures fail the commission.
    pub async fn commission_image_candidates(
        &self,
        provider: &dyn ContentProvider,
        request: &GenerationRequest,
    ) -> CommissionResult {
        let deadline = Instant::now() + self.config.ceiling();
        let (first, second) = tokio::join!(
            self.attempt(provider, request, deadline),
            self.attempt(provider, request, deadline)
        );

        let mut candidates = Vec::new();
        let mut failures = Vec::new();
        for outcome in [first, second] {
            match outcome {
                AttemptOutcome::Done(content) => match content {
                    GiftContent::ImageCandidates {
                        candidates: mut produced,
                        ..
                    } => candidates.append(&mut produced),
                    other => {
                        warn!(?other, "Image commission produced non-image content");
                    }
                },
                AttemptOutcome::Degrade(reason) | AttemptOutcome::Fail { reason, .. } => {
                    failures.push(reason);
                }
            }
        }

        if candidates.is_empty() {
            self.usage
                .log_generation_finished(provider.name(), "failed", 0)
                .await;
            return CommissionResult::Failed {
                reason: failures.join("; "),
                job_id: None,
            };
        }

        let content = GiftContent::ImageCandidates {
            candidates,
            selected_id: None,
        };
        if failures.is_empty() {
            self.log_finished(provider.name(), "completed", &content).await;
            CommissionResult::Completed(content)
        } else {
            self.log_finished(provider.name(), "partial", &content).await;
            CommissionResult::CompletedWithWarning(
                content,
                "Only one image option could be created.".to_string(),
            )
        }
    }

    /// One provider attempt: submit, then poll to a terminal state before
    /// the commission-wide deadline.
    async fn attempt(
        &self,
        provider: &dyn ContentProvider,
        request: &GenerationRequest,
        deadline: Instant,
    ) -> AttemptOutcome {
        self.usage
            .log_generation_requested(provider.name(), None)
            .await;

        let job_id = match provider.submit(request).await {
            Ok(JobSubmission::Inline(content)) => return AttemptOutcome::Done(content),
            Ok(JobSubmission::Job { job_id }) => job_id,
            Err(e) => return Self::classify_submit_error(e),
        };

        info!(provider = provider.name(), job_id = %job_id, "Generation job queued");

        let profile = provider.poll_profile();
        let started = Instant::now();
        let mut delay = profile.initial_delay;
        let mut transient_errors: u32 = 0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return AttemptOutcome::Fail {
                    reason: format!(
                        "generation timed out after {}s",
                        self.config.ceiling().as_secs()
                    ),
                    job_id: Some(job_id),
                };
            }
            sleep(delay.min(deadline - now)).await;

            match provider.job_status(&job_id).await {
                Ok(JobStatus::Queued) => {
                    transient_errors = 0;
                }
                Ok(JobStatus::Running { asset_ref }) => {
                    transient_errors = 0;
                    // A job that keeps reporting running past the grace
                    // window but already exposes an asset is taken as done.
                    if started.elapsed() > self.config.stuck_grace {
                        if let Some(asset_ref) = asset_ref {
                            warn!(
                                provider = provider.name(),
                                job_id = %job_id,
                                "Job stuck in running with usable asset, accepting"
                            );
                            return self
                                .assemble(provider, request.kind, &asset_ref, Some(job_id))
                                .await;
                        }
                    }
                }
                Ok(JobStatus::Succeeded { asset_ref }) => {
                    return self
                        .assemble(provider, request.kind, &asset_ref, Some(job_id))
                        .await;
                }
                Ok(JobStatus::Failed { reason }) => {
                    return AttemptOutcome::Fail {
                        reason,
                        job_id: Some(job_id),
                    };
                }
                Err(e) => match e.kind {
                    ProviderErrorKind::Auth => {
                        return AttemptOutcome::Fail {
                            reason: e.message,
                            job_id: Some(job_id),
                        };
                    }
                    ProviderErrorKind::RateLimited | ProviderErrorKind::Unavailable => {
                        transient_errors += 1;
                        if transient_errors >= MAX_TRANSIENT_ERRORS {
                            return AttemptOutcome::Degrade(e.message);
                        }
                    }
                    ProviderErrorKind::Other => {
                        return AttemptOutcome::Fail {
                            reason: e.message,
                            job_id: Some(job_id),
                        };
                    }
                },
            }

            delay = delay.mul_f64(BACKOFF_MULTIPLIER).min(profile.max_delay);
        }
    }

    fn classify_submit_error(e: ProviderError) -> AttemptOutcome {
        match e.kind {
            ProviderErrorKind::RateLimited | ProviderErrorKind::Unavailable => {
                AttemptOutcome::Degrade(e.message)
            }
            ProviderErrorKind::Auth | ProviderErrorKind::Other => AttemptOutcome::Fail {
                reason: e.message,
                job_id: None,
            },
        }
    }

    /// Turn a finished job's asset reference into the content payload for
    /// the requested kind.
    async fn assemble(
        &self,
        provider: &dyn ContentProvider,
        kind: GiftKind,
        asset_ref: &str,
        job_id: Option<String>,
    ) -> AttemptOutcome {
        let content = match kind {
            GiftKind::TextLetter | GiftKind::SealedKnot | GiftKind::Combination => {
                match provider.fetch_asset(asset_ref).await {
                    Ok(bytes) => GiftContent::Text {
                        body: String::from_utf8_lossy(&bytes).into_owned(),
                    },
                    Err(e) => {
                        return AttemptOutcome::Fail {
                            reason: format!("asset fetch failed: {}", e),
                            job_id,
                        }
                    }
                }
            }
            GiftKind::SpokenMessage | GiftKind::Song => GiftContent::AudioRef {
                url: Some(asset_ref.to_string()),
                base64: None,
            },
            GiftKind::StillImage => GiftContent::ImageCandidates {
                candidates: vec![ImageCandidate {
                    id: uuid::Uuid::new_v4().to_string(),
                    url: asset_ref.to_string(),
                }],
                selected_id: None,
            },
            GiftKind::ShortVideo => GiftContent::VideoRef {
                url: asset_ref.to_string(),
            },
        };
        AttemptOutcome::Done(content)
    }

    async fn log_finished(&self, provider: &str, outcome: &str, content: &GiftContent) {
        let units = match content {
            GiftContent::Text { body } => body.len() as u64,
            GiftContent::ImageCandidates { candidates, .. } => candidates.len() as u64,
            _ => 1,
        };
        self.usage
            .log_generation_finished(provider, outcome, units)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider fake driven by a per-job script of status results. When a
    /// script runs out, its last entry repeats.
    struct ScriptedProvider {
        name: String,
        submit_result: Mutex<Vec<Result<JobSubmission, ProviderError>>>,
        submit_delay: Option<Duration>,
        scripts: Mutex<HashMap<String, Vec<Result<JobStatus, ProviderError>>>>,
        cursors: Mutex<HashMap<String, usize>>,
        status_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                submit_result: Mutex::new(Vec::new()),
                submit_delay: None,
                scripts: Mutex::new(HashMap::new()),
                cursors: Mutex::new(HashMap::new()),
                status_calls: AtomicUsize::new(0),
            }
        }

        fn on_submit(self, result: Result<JobSubmission, ProviderError>) -> Self {
            self.submit_result.lock().unwrap().push(result);
            self
        }

        fn with_submit_delay(mut self, delay: Duration) -> Self {
            self.submit_delay = Some(delay);
            self
        }

        fn with_script(self, job_id: &str, script: Vec<Result<JobStatus, ProviderError>>) -> Self {
            self.scripts.lock().unwrap().insert(job_id.to_string(), script);
            self
        }
    }

    #[async_trait]
    impl ContentProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn poll_profile(&self) -> crate::generation::provider::PollProfile {
            crate::generation::provider::PollProfile {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            }
        }

        async fn submit(
            &self,
            _request: &GenerationRequest,
        ) -> Result<JobSubmission, ProviderError> {
            if let Some(delay) = self.submit_delay {
                sleep(delay).await;
            }
            let mut queue = self.submit_result.lock().unwrap();
            if queue.is_empty() {
                return Ok(JobSubmission::Job {
                    job_id: "job-default".to_string(),
                });
            }
            queue.remove(0)
        }

        async fn job_status(&self, job_id: &str) -> Result<JobStatus, ProviderError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let scripts = self.scripts.lock().unwrap();
            let script = scripts.get(job_id).expect("script for job");
            let mut cursors = self.cursors.lock().unwrap();
            let cursor = cursors.entry(job_id.to_string()).or_insert(0);
            let index = (*cursor).min(script.len() - 1);
            *cursor += 1;
            script[index].clone()
        }

        async fn fetch_asset(&self, asset_ref: &str) -> Result<Vec<u8>, ProviderError> {
            Ok(asset_ref.as_bytes().to_vec())
        }
    }

    fn poller() -> JobPoller {
        JobPoller::new(PollerConfig::default(), UsageLogger::new("test".to_string()))
    }

    fn request(kind: GiftKind) -> GenerationRequest {
        GenerationRequest {
            kind,
            prompt: "a letter for Grace".to_string(),
            params: serde_json::Value::Null,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_commission_polls_to_success() {
        let provider = ScriptedProvider::new("textgen")
            .on_submit(Ok(JobSubmission::Job {
                job_id: "j1".to_string(),
            }))
            .with_script(
                "j1",
                vec![
                    Ok(JobStatus::Queued),
                    Ok(JobStatus::Running { asset_ref: None }),
                    Ok(JobStatus::Succeeded {
                        asset_ref: "Dear Grace".to_string(),
                    }),
                ],
            );

        let result = poller()
            .commission(&provider, None, &request(GiftKind::TextLetter))
            .await;

        assert_eq!(
            result,
            CommissionResult::Completed(GiftContent::Text {
                body: "Dear Grace".to_string()
            })
        );
        assert_eq!(provider.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_succeeding_job_fails_within_ceiling() {
        let provider = ScriptedProvider::new("videogen")
            .on_submit(Ok(JobSubmission::Job {
                job_id: "j1".to_string(),
            }))
            .with_script("j1", vec![Ok(JobStatus::Running { asset_ref: None })]);

        let started = Instant::now();
        let result = poller()
            .commission(&provider, None, &request(GiftKind::ShortVideo))
            .await;

        assert!(started.elapsed() <= MAX_WALL_CLOCK + Duration::from_secs(1));
        match result {
            CommissionResult::Failed { reason, job_id } => {
                assert!(reason.contains("timed out"));
                // Job id survives for manual recovery
                assert_eq!(job_id.as_deref(), Some("j1"));
            }
            other => panic!("expected timeout failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_aborts_without_retry() {
        let provider = ScriptedProvider::new("voicegen")
            .on_submit(Ok(JobSubmission::Job {
                job_id: "j1".to_string(),
            }))
            .with_script(
                "j1",
                vec![Err(ProviderError::new(
                    ProviderErrorKind::Auth,
                    "key revoked",
                ))],
            );

        let result = poller()
            .commission(&provider, None, &request(GiftKind::SpokenMessage))
            .await;

        assert!(matches!(result, CommissionResult::Failed { .. }));
        assert_eq!(provider.status_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_primary_degrades_to_fallback() {
        let primary = ScriptedProvider::new("songgen").on_submit(Err(ProviderError::new(
            ProviderErrorKind::RateLimited,
            "quota exceeded",
        )));
        let fallback = ScriptedProvider::new("voicegen").on_submit(Ok(JobSubmission::Inline(
            GiftContent::AudioRef {
                url: Some("https://assets.example/narration.mp3".to_string()),
                base64: None,
            },
        )));

        let result = poller()
            .commission(&primary, Some(&fallback), &request(GiftKind::Song))
            .await;

        match result {
            CommissionResult::CompletedWithWarning(content, warning) => {
                assert!(matches!(content, GiftContent::AudioRef { .. }));
                assert!(warning.contains("songgen"));
            }
            other => panic!("expected degraded completion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_shares_the_wall_clock_ceiling() {
        // The primary burns most of the ceiling before degrading; the
        // fallback only gets the remainder, not a fresh ceiling.
        let primary = ScriptedProvider::new("songgen")
            .with_submit_delay(Duration::from_secs(25))
            .on_submit(Err(ProviderError::new(
                ProviderErrorKind::RateLimited,
                "quota exceeded",
            )));
        let fallback = ScriptedProvider::new("voicegen")
            .on_submit(Ok(JobSubmission::Job {
                job_id: "j1".to_string(),
            }))
            .with_script("j1", vec![Ok(JobStatus::Queued)]);

        let config = PollerConfig {
            wall_clock_ceiling: Duration::from_secs(30),
            ..PollerConfig::default()
        };
        let poller = JobPoller::new(config, UsageLogger::new("test".to_string()));

        let started = Instant::now();
        let result = poller
            .commission(&primary, Some(&fallback), &request(GiftKind::Song))
            .await;

        assert!(started.elapsed() <= Duration::from_secs(31));
        match result {
            CommissionResult::Failed { reason, .. } => {
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected timeout failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_degrade_without_fallback_fails() {
        let primary = ScriptedProvider::new("songgen").on_submit(Err(ProviderError::new(
            ProviderErrorKind::Unavailable,
            "connection refused",
        )));

        let result = poller()
            .commission(&primary, None, &request(GiftKind::Song))
            .await;

        assert!(matches!(result, CommissionResult::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_running_job_with_asset_is_accepted() {
        let provider = ScriptedProvider::new("voicegen")
            .on_submit(Ok(JobSubmission::Job {
                job_id: "j1".to_string(),
            }))
            .with_script(
                "j1",
                vec![Ok(JobStatus::Running {
                    asset_ref: Some("https://assets.example/stuck.mp3".to_string()),
                })],
            );

        let config = PollerConfig {
            stuck_grace: Duration::from_secs(30),
            ..PollerConfig::default()
        };
        let poller = JobPoller::new(config, UsageLogger::new("test".to_string()));

        let result = poller
            .commission(&provider, None, &request(GiftKind::SpokenMessage))
            .await;

        assert_eq!(
            result,
            CommissionResult::Completed(GiftContent::AudioRef {
                url: Some("https://assets.example/stuck.mp3".to_string()),
                base64: None,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_candidates_are_joined() {
        let provider = ScriptedProvider::new("imagegen")
            .on_submit(Ok(JobSubmission::Job {
                job_id: "j1".to_string(),
            }))
            .on_submit(Ok(JobSubmission::Job {
                job_id: "j2".to_string(),
            }))
            .with_script(
                "j1",
                vec![Ok(JobStatus::Succeeded {
                    asset_ref: "https://assets.example/a.png".to_string(),
                })],
            )
            .with_script(
                "j2",
                vec![Ok(JobStatus::Succeeded {
                    asset_ref: "https://assets.example/b.png".to_string(),
                })],
            );

        let result = poller()
            .commission_image_candidates(&provider, &request(GiftKind::StillImage))
            .await;

        match result {
            CommissionResult::Completed(GiftContent::ImageCandidates {
                candidates,
                selected_id,
            }) => {
                assert_eq!(candidates.len(), 2);
                assert!(selected_id.is_none());
                let urls: Vec<_> = candidates.iter().map(|c| c.url.as_str()).collect();
                assert!(urls.contains(&"https://assets.example/a.png"));
                assert!(urls.contains(&"https://assets.example/b.png"));
            }
            other => panic!("expected two candidates, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_image_failure_degrades_to_one_candidate() {
        let provider = ScriptedProvider::new("imagegen")
            .on_submit(Ok(JobSubmission::Job {
                job_id: "j1".to_string(),
            }))
            .on_submit(Err(ProviderError::new(
                ProviderErrorKind::Other,
                "render crashed",
            )))
            .with_script(
                "j1",
                vec![Ok(JobStatus::Succeeded {
                    asset_ref: "https://assets.example/a.png".to_string(),
                })],
            );

        let result = poller()
            .commission_image_candidates(&provider, &request(GiftKind::StillImage))
            .await;

        match result {
            CommissionResult::CompletedWithWarning(
                GiftContent::ImageCandidates { candidates, .. },
                warning,
            ) => {
                assert_eq!(candidates.len(), 1);
                assert!(!warning.is_empty());
            }
            other => panic!("expected degraded single candidate, got {:?}", other),
        }
    }
}
