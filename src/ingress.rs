//! Webhook ingress for compute provider callbacks.
//!
//! Transcription completion arrives out-of-band: the compute endpoint calls
//! back with its own job id and an outcome. Ingress resolves that external id
//! through the correlation store, applies the outcome through the same
//! transition guards the queue uses, and acknowledges everything it could
//! classify. Unknown ids and late duplicates are acknowledged no-ops so the
//! provider never retries events we cannot or need not act on.

use crate::error::Result;
use crate::job::{JobEvent, JobStatus};
use crate::notify::Publisher;
use crate::store::JobStore;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Classified payload of one provider callback.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Terminal success with the finished transcript.
    Completed { result: String },
    /// Terminal failure with the provider's reason.
    Failed { error: String },
    /// Intermediate progress report, 0 to 100.
    Progress { percent: u8 },
}

/// Resolves provider callbacks against the job store.
#[derive(Clone)]
pub struct WebhookIngress {
    store: Arc<dyn JobStore>,
    publisher: Arc<dyn Publisher>,
}

impl WebhookIngress {
    pub fn new(store: Arc<dyn JobStore>, publisher: Arc<dyn Publisher>) -> Self {
        Self { store, publisher }
    }

    /// Handle one callback. `Ok(())` means the event was classified and
    /// should be acknowledged; `Err` is reserved for store failures where a
    /// provider retry could still land.
    #[instrument(skip(self, outcome))]
    pub async fn handle(&self, external_id: &str, outcome: WebhookOutcome) -> Result<()> {
        let mapping = match self.store.get_correlation(external_id).await? {
            Some(mapping) => mapping,
            None => {
                // Unknown ids happen after retention purges or when another
                // deployment shares the endpoint. Acknowledge and move on.
                debug!("No correlation for external id {}, ignoring", external_id);
                return Ok(());
            }
        };

        let job_id = mapping.internal_job_id;
        match outcome {
            WebhookOutcome::Completed { result } => {
                let applied = self.store.complete_job(job_id, &result).await?;
                if applied {
                    info!("Transcription job {} completed via webhook", job_id);
                    self.publish(job_id).await;
                } else {
                    debug!("Duplicate completion for job {}, ignoring", job_id);
                }
            }
            WebhookOutcome::Failed { error } => {
                let applied = self.store.fail_job(job_id, &error).await?;
                if applied {
                    warn!("Transcription job {} failed upstream: {}", job_id, error);
                    self.publish(job_id).await;
                } else {
                    debug!("Duplicate failure for job {}, ignoring", job_id);
                }
            }
            WebhookOutcome::Progress { percent } => {
                let applied = self
                    .store
                    .set_progress(job_id, percent.min(100))
                    .await?;
                if applied {
                    self.publish(job_id).await;
                }
            }
        }

        Ok(())
    }

    async fn publish(&self, job_id: uuid::Uuid) {
        match self.store.get_job(job_id).await {
            Ok(Some(job)) => self
                .publisher
                .publish(&job.owner_id, JobEvent::from_record(&job)),
            Ok(None) => {}
            Err(e) => warn!("Failed to reload job {} for fanout: {}", job_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CorrelationMapping, JobKind, JobPayload, JobRecord};
    use crate::notify::NoopPublisher;
    use crate::store::MemoryJobStore;
    use chrono::Utc;

    async fn correlated_job(store: &MemoryJobStore, external_id: &str) -> JobRecord {
        let job = JobRecord::new("owner-1", JobKind::Transcription, JobPayload::default());
        store.create_job(&job).await.unwrap();
        store
            .transition(job.id, JobStatus::Processing)
            .await
            .unwrap();
        store
            .put_correlation(&CorrelationMapping {
                external_id: external_id.to_string(),
                internal_job_id: job.id,
                owner_id: job.owner_id.clone(),
                kind: job.kind,
                display_name: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        job
    }

    fn ingress(store: &Arc<MemoryJobStore>) -> WebhookIngress {
        WebhookIngress::new(store.clone(), Arc::new(NoopPublisher))
    }

    #[tokio::test]
    async fn test_completion_resolves_through_correlation() {
        let store = Arc::new(MemoryJobStore::new());
        let job = correlated_job(&store, "ext-123").await;

        ingress(&store)
            .handle(
                "ext-123",
                WebhookOutcome::Completed {
                    result: "transcript text".to_string(),
                },
            )
            .await
            .unwrap();

        let done = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.result.as_deref(), Some("transcript text"));
    }

    #[tokio::test]
    async fn test_unknown_external_id_is_acknowledged() {
        let store = Arc::new(MemoryJobStore::new());
        let job = correlated_job(&store, "ext-123").await;

        // A foreign id must not touch existing jobs.
        ingress(&store)
            .handle(
                "ext-unknown",
                WebhookOutcome::Completed {
                    result: "noise".to_string(),
                },
            )
            .await
            .unwrap();

        let untouched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, JobStatus::Processing);
        assert!(untouched.result.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_a_no_op() {
        let store = Arc::new(MemoryJobStore::new());
        let job = correlated_job(&store, "ext-123").await;
        let handler = ingress(&store);

        handler
            .handle(
                "ext-123",
                WebhookOutcome::Completed {
                    result: "first transcript".to_string(),
                },
            )
            .await
            .unwrap();
        handler
            .handle(
                "ext-123",
                WebhookOutcome::Completed {
                    result: "second transcript".to_string(),
                },
            )
            .await
            .unwrap();

        let done = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(done.result.as_deref(), Some("first transcript"));
    }

    #[tokio::test]
    async fn test_late_failure_after_completion_is_ignored() {
        let store = Arc::new(MemoryJobStore::new());
        let job = correlated_job(&store, "ext-123").await;
        let handler = ingress(&store);

        handler
            .handle(
                "ext-123",
                WebhookOutcome::Completed {
                    result: "transcript".to_string(),
                },
            )
            .await
            .unwrap();
        handler
            .handle(
                "ext-123",
                WebhookOutcome::Failed {
                    error: "gpu preempted".to_string(),
                },
            )
            .await
            .unwrap();

        let done = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn test_progress_updates_are_monotonic() {
        let store = Arc::new(MemoryJobStore::new());
        let job = correlated_job(&store, "ext-123").await;
        let handler = ingress(&store);

        handler
            .handle("ext-123", WebhookOutcome::Progress { percent: 60 })
            .await
            .unwrap();
        handler
            .handle("ext-123", WebhookOutcome::Progress { percent: 40 })
            .await
            .unwrap();

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.progress, 60);
    }

    #[tokio::test]
    async fn test_outcome_payload_parses() {
        let parsed: WebhookOutcome = serde_json::from_str(
            r#"{"status": "completed", "result": "hello"}"#,
        )
        .unwrap();
        assert!(matches!(parsed, WebhookOutcome::Completed { result } if result == "hello"));

        let parsed: WebhookOutcome =
            serde_json::from_str(r#"{"status": "progress", "percent": 42}"#).unwrap();
        assert!(matches!(parsed, WebhookOutcome::Progress { percent: 42 }));
    }
}
