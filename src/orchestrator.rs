//! Job orchestration over the store, dispatcher, queue, and ingress.
//!
//! The orchestrator owns the submission paths: transcription jobs go through
//! upload and fallback dispatch to a GPU endpoint and finish later via
//! webhook, while chat, summary, and content-generation jobs go through the
//! bounded LLM queue. It also runs the startup recovery scan and the
//! correlation retention purge.

use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::error::{DirigentError, Result};
use crate::ingress::{WebhookIngress, WebhookOutcome};
use crate::job::{JobEvent, JobKind, JobPayload, JobRecord, JobStatus};
use crate::notify::Publisher;
use crate::provider::{HttpComputeProvider, HttpMediaUploader, MediaUploader, OpenAiProvider};
use crate::queue::TaskQueue;
use crate::store::{JobStore, SqliteJobStore};
use chrono::{Duration, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Outcome of the startup recovery scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    /// LLM jobs put back on the queue.
    pub requeued: usize,
    /// Transcription jobs left waiting for their webhook.
    pub awaiting_webhook: usize,
}

/// Coordinates job submission, completion, and recovery.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
    uploader: Arc<dyn MediaUploader>,
    queue: TaskQueue,
    ingress: WebhookIngress,
    publisher: Arc<dyn Publisher>,
    settings: Settings,
}

impl Orchestrator {
    /// Build an orchestrator with the default production collaborators: the
    /// SQLite store at the configured path, HTTP compute and upload clients,
    /// and the OpenAI chat provider.
    pub fn new(settings: Settings, publisher: Arc<dyn Publisher>) -> Result<Self> {
        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(&settings.sqlite_path())?);
        let compute = Arc::new(HttpComputeProvider::new(settings.compute.api_key()));
        let llm = Arc::new(OpenAiProvider::with_model_and_timeout(
            &settings.llm.model,
            std::time::Duration::from_secs(settings.llm.request_timeout_secs),
        ));
        let uploader = Arc::new(HttpMediaUploader::new(&settings.compute.upload_base_url));
        Ok(Self::with_components(
            settings, store, compute, llm, uploader, publisher,
        ))
    }

    /// Build an orchestrator from explicit collaborators.
    pub fn with_components(
        settings: Settings,
        store: Arc<dyn JobStore>,
        compute: Arc<dyn crate::provider::ComputeProvider>,
        llm: Arc<dyn crate::provider::LlmProvider>,
        uploader: Arc<dyn MediaUploader>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            compute,
            store.clone(),
            settings.compute.endpoints.clone(),
            &settings.callback_url(),
        ));
        let queue = TaskQueue::new(
            store.clone(),
            llm,
            publisher.clone(),
            settings.llm.max_concurrent_jobs,
            settings.usage.units_per_1k_chars,
        );
        let ingress = WebhookIngress::new(store.clone(), publisher.clone());
        Self {
            store,
            dispatcher,
            uploader,
            queue,
            ingress,
            publisher,
            settings,
        }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    /// Create a job and start it. Returns the pending record immediately;
    /// the work proceeds in the background and completion is observable via
    /// `get_job` and the owner's event stream.
    #[instrument(skip(self, payload))]
    pub async fn submit_job(
        &self,
        owner_id: &str,
        kind: JobKind,
        payload: JobPayload,
    ) -> Result<JobRecord> {
        if payload.input.trim().is_empty() {
            return Err(DirigentError::InvalidInput(
                "job input must not be empty".to_string(),
            ));
        }
        if matches!(kind, JobKind::Summary | JobKind::Chat) {
            let parent = payload.parent_id.ok_or_else(|| {
                DirigentError::InvalidInput(format!(
                    "{} jobs require an owning transcription",
                    kind
                ))
            })?;
            if self.store.get_job(parent).await?.is_none() {
                return Err(DirigentError::JobNotFound(parent.to_string()));
            }
        }

        let job = JobRecord::new(owner_id, kind, payload);
        self.store.create_job(&job).await?;
        info!("Submitted {} job {} for {}", kind, job.id, owner_id);

        if kind == JobKind::Transcription {
            let orchestrator = self.clone();
            let spawned = job.clone();
            tokio::spawn(async move {
                orchestrator.run_transcription(spawned).await;
            });
        } else {
            self.queue.enqueue(job.id);
        }

        Ok(job)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        self.store.get_job(job_id).await
    }

    pub async fn list_jobs(&self, owner_id: &str) -> Result<Vec<JobRecord>> {
        self.store.list_jobs(owner_id).await
    }

    /// Apply one provider callback.
    pub async fn on_webhook(&self, external_id: &str, outcome: WebhookOutcome) -> Result<()> {
        self.ingress.handle(external_id, outcome).await
    }

    /// Upload (when the input is a local file), dispatch, and leave the job
    /// processing until its webhook lands. Any step failing marks the job
    /// failed with a short reason.
    async fn run_transcription(&self, job: JobRecord) {
        let audio_url = if is_remote(&job.payload_ref) {
            job.payload_ref.clone()
        } else {
            if !self.apply_transition(job.id, JobStatus::Uploading).await {
                return;
            }
            match self.uploader.upload(Path::new(&job.payload_ref)).await {
                Ok(url) => url,
                Err(e) => {
                    self.fail(job.id, &format!("upload failed: {}", e)).await;
                    return;
                }
            }
        };

        match self.dispatcher.dispatch(&job, &audio_url).await {
            Ok(external_id) => {
                debug!("Job {} running upstream as {}", job.id, external_id);
                self.apply_transition(job.id, JobStatus::Processing).await;
            }
            Err(e) => {
                self.fail(job.id, &format!("dispatch failed: {}", e)).await;
            }
        }
    }

    /// Startup scan: LLM jobs interrupted by a restart are replayed onto the
    /// queue; transcription jobs keep waiting, since their correlation
    /// mapping lets the eventual webhook land.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let unfinished = self.store.list_unfinished().await?;
        let mut report = RecoveryReport::default();

        for job in unfinished {
            if job.kind == JobKind::Transcription {
                report.awaiting_webhook += 1;
            } else {
                self.queue.enqueue(job.id);
                report.requeued += 1;
            }
        }

        if report.requeued > 0 || report.awaiting_webhook > 0 {
            info!(
                "Recovery: requeued {} LLM jobs, {} transcriptions awaiting webhook",
                report.requeued, report.awaiting_webhook
            );
        }
        Ok(report)
    }

    /// Drop correlation mappings older than the configured retention window.
    pub async fn purge_expired_correlations(&self) -> Result<usize> {
        let cutoff =
            Utc::now() - Duration::days(self.settings.retention.correlation_retention_days);
        let purged = self.store.purge_correlations_before(cutoff).await?;
        if purged > 0 {
            info!("Purged {} expired correlation mappings", purged);
        }
        Ok(purged)
    }

    /// Non-terminal jobs whose last update is older than the stall window.
    pub async fn list_stalled(&self) -> Result<Vec<JobRecord>> {
        self.store
            .list_stalled(Duration::minutes(
                self.settings.retention.stalled_after_minutes,
            ))
            .await
    }

    async fn apply_transition(&self, job_id: Uuid, next: JobStatus) -> bool {
        match self.store.transition(job_id, next).await {
            Ok(applied) => {
                if applied {
                    self.publish(job_id).await;
                }
                true
            }
            Err(e) => {
                error!("Failed to move job {} to {}: {}", job_id, next, e);
                false
            }
        }
    }

    async fn fail(&self, job_id: Uuid, reason: &str) {
        warn!("Job {} failed: {}", job_id, reason);
        match self.store.fail_job(job_id, reason).await {
            Ok(true) => self.publish(job_id).await,
            Ok(false) => {}
            Err(e) => error!("Failed to record failure of job {}: {}", job_id, e),
        }
    }

    async fn publish(&self, job_id: Uuid) {
        match self.store.get_job(job_id).await {
            Ok(Some(job)) => self
                .publisher
                .publish(&job.owner_id, JobEvent::from_record(&job)),
            Ok(None) => {}
            Err(e) => warn!("Failed to reload job {} for fanout: {}", job_id, e),
        }
    }
}

fn is_remote(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}
