//! Fallback dispatcher for GPU compute jobs.
//!
//! Endpoints are configured in preference order, warm caches first. A cheap
//! health probe decides whether a preferred endpoint is worth submitting to;
//! the last endpoint is always attempted unconditionally, because a provider
//! reporting zero workers may still autoscale on submission, and a degraded
//! but reachable endpoint beats rejecting the owner's request outright.

use crate::config::ComputeEndpoint;
use crate::error::{DirigentError, Result};
use crate::job::{CorrelationMapping, JobRecord};
use crate::provider::{ComputeProvider, SubmitRequest};
use crate::store::JobStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Chooses a compute endpoint and submits jobs to it.
pub struct Dispatcher {
    compute: Arc<dyn ComputeProvider>,
    store: Arc<dyn JobStore>,
    endpoints: Vec<ComputeEndpoint>,
    callback_url: String,
}

impl Dispatcher {
    /// Create a dispatcher over a preference-ordered endpoint list.
    pub fn new(
        compute: Arc<dyn ComputeProvider>,
        store: Arc<dyn JobStore>,
        endpoints: Vec<ComputeEndpoint>,
        callback_url: &str,
    ) -> Self {
        Self {
            compute,
            store,
            endpoints,
            callback_url: callback_url.to_string(),
        }
    }

    /// Submit a job to the first viable endpoint.
    ///
    /// On success the correlation mapping for the returned external id is
    /// durably written before this method returns, so a webhook arriving
    /// after a process restart can still be attributed.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn dispatch(&self, job: &JobRecord, audio_url: &str) -> Result<String> {
        if self.endpoints.is_empty() {
            return Err(DirigentError::Dispatch(
                "No compute endpoints configured".to_string(),
            ));
        }

        let request = SubmitRequest {
            job_id: job.id,
            audio_url: audio_url.to_string(),
            display_name: job.display_name.clone(),
        };

        let last = self.endpoints.len() - 1;
        let mut last_error = String::new();

        for (i, endpoint) in self.endpoints.iter().enumerate() {
            let is_final = i == last;

            if is_final {
                // Zero workers is not proof of unavailability; the final
                // endpoint is tried even when health looks bad.
                info!(
                    "Attempting final endpoint {} unconditionally for job {}",
                    endpoint.name, job.id
                );
            } else {
                match self.compute.health(endpoint).await {
                    Some(counts) if counts.has_workers() => {
                        info!(
                            "Endpoint {} has capacity ({} idle, {} running), submitting job {}",
                            endpoint.name, counts.idle, counts.running, job.id
                        );
                    }
                    Some(_) => {
                        info!(
                            "Endpoint {} reports no workers, falling through",
                            endpoint.name
                        );
                        continue;
                    }
                    None => {
                        info!("Endpoint {} unavailable, falling through", endpoint.name);
                        continue;
                    }
                }
            }

            match self
                .compute
                .submit(endpoint, &request, &self.callback_url)
                .await
            {
                Ok(external_id) => {
                    self.record_correlation(job, &external_id).await?;
                    info!(
                        "Job {} submitted to {} as {}",
                        job.id, endpoint.name, external_id
                    );
                    return Ok(external_id);
                }
                Err(e) => {
                    warn!("Submission to {} failed: {}", endpoint.name, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(DirigentError::Dispatch(format!(
            "All compute endpoints exhausted: {}",
            last_error
        )))
    }

    /// Durably record the external-id mapping. Called before a successful
    /// dispatch returns control to any caller path that might crash.
    async fn record_correlation(&self, job: &JobRecord, external_id: &str) -> Result<()> {
        let mapping = CorrelationMapping {
            external_id: external_id.to_string(),
            internal_job_id: job.id,
            owner_id: job.owner_id.clone(),
            kind: job.kind,
            display_name: job.display_name.clone(),
            created_at: Utc::now(),
        };
        self.store.put_correlation(&mapping).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, JobPayload};
    use crate::provider::WorkerCounts;
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Fake compute provider with scripted per-endpoint behavior.
    struct FakeCompute {
        /// Health report per endpoint name; absent means unavailable.
        health: HashMap<String, WorkerCounts>,
        /// Endpoint names that reject submissions.
        rejecting: Vec<String>,
        /// Names of endpoints that received a submission, in order.
        submissions: Mutex<Vec<String>>,
    }

    impl FakeCompute {
        fn new() -> Self {
            Self {
                health: HashMap::new(),
                rejecting: Vec::new(),
                submissions: Mutex::new(Vec::new()),
            }
        }

        fn with_health(mut self, name: &str, idle: u32, running: u32) -> Self {
            self.health
                .insert(name.to_string(), WorkerCounts { idle, running });
            self
        }

        fn rejecting_submissions(mut self, name: &str) -> Self {
            self.rejecting.push(name.to_string());
            self
        }

        fn submitted_to(&self) -> Vec<String> {
            self.submissions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ComputeProvider for FakeCompute {
        async fn health(&self, endpoint: &ComputeEndpoint) -> Option<WorkerCounts> {
            self.health.get(&endpoint.name).copied()
        }

        async fn submit(
            &self,
            endpoint: &ComputeEndpoint,
            request: &SubmitRequest,
            _callback_url: &str,
        ) -> Result<String> {
            self.submissions.lock().unwrap().push(endpoint.name.clone());
            if self.rejecting.contains(&endpoint.name) {
                return Err(DirigentError::Provider(format!(
                    "{} rejected submission",
                    endpoint.name
                )));
            }
            Ok(format!("ext-{}-{}", endpoint.name, request.job_id))
        }
    }

    fn endpoints() -> Vec<ComputeEndpoint> {
        vec![
            ComputeEndpoint {
                name: "warm".to_string(),
                url: "https://warm.example".to_string(),
            },
            ComputeEndpoint {
                name: "cold".to_string(),
                url: "https://cold.example".to_string(),
            },
        ]
    }

    fn transcription_job() -> JobRecord {
        JobRecord::new(
            "owner-1",
            JobKind::Transcription,
            JobPayload {
                input: "/tmp/audio.mp3".to_string(),
                display_name: Some("Interview".to_string()),
                ..Default::default()
            },
        )
    }

    fn dispatcher(compute: Arc<FakeCompute>, store: Arc<MemoryJobStore>) -> Dispatcher {
        Dispatcher::new(
            compute,
            store,
            endpoints(),
            "https://api.example/webhooks/compute",
        )
    }

    #[tokio::test]
    async fn test_prefers_healthy_endpoint() {
        let compute = Arc::new(FakeCompute::new().with_health("warm", 2, 1));
        let store = Arc::new(MemoryJobStore::new());
        let job = transcription_job();

        let external_id = dispatcher(compute.clone(), store)
            .dispatch(&job, "https://media.example/audio.mp3")
            .await
            .unwrap();

        assert!(external_id.starts_with("ext-warm-"));
        assert_eq!(compute.submitted_to(), vec!["warm"]);
    }

    #[tokio::test]
    async fn test_falls_through_to_healthy_lower_preference() {
        // Scenario 1: warm reports zero workers, cold has one. The job goes
        // to cold and warm never sees a submission.
        let compute = Arc::new(
            FakeCompute::new()
                .with_health("warm", 0, 0)
                .with_health("cold", 1, 0),
        );
        let store = Arc::new(MemoryJobStore::new());
        let job = transcription_job();

        let external_id = dispatcher(compute.clone(), store)
            .dispatch(&job, "https://media.example/audio.mp3")
            .await
            .unwrap();

        assert!(external_id.starts_with("ext-cold-"));
        assert_eq!(compute.submitted_to(), vec!["cold"]);
    }

    #[tokio::test]
    async fn test_final_endpoint_attempted_despite_bad_health() {
        // Scenario 2: both endpoints look dead. The last endpoint is still
        // attempted rather than dropping the request.
        let compute = Arc::new(FakeCompute::new());
        let store = Arc::new(MemoryJobStore::new());
        let job = transcription_job();

        let external_id = dispatcher(compute.clone(), store)
            .dispatch(&job, "https://media.example/audio.mp3")
            .await
            .unwrap();

        assert!(external_id.starts_with("ext-cold-"));
        assert_eq!(compute.submitted_to(), vec!["cold"]);
    }

    #[tokio::test]
    async fn test_submission_failure_falls_through() {
        let compute = Arc::new(
            FakeCompute::new()
                .with_health("warm", 3, 0)
                .rejecting_submissions("warm"),
        );
        let store = Arc::new(MemoryJobStore::new());
        let job = transcription_job();

        let external_id = dispatcher(compute.clone(), store)
            .dispatch(&job, "https://media.example/audio.mp3")
            .await
            .unwrap();

        assert!(external_id.starts_with("ext-cold-"));
        assert_eq!(compute.submitted_to(), vec!["warm", "cold"]);
    }

    #[tokio::test]
    async fn test_all_endpoints_failing_reports_dispatch_error() {
        let compute = Arc::new(
            FakeCompute::new()
                .with_health("warm", 1, 0)
                .rejecting_submissions("warm")
                .rejecting_submissions("cold"),
        );
        let store = Arc::new(MemoryJobStore::new());
        let job = transcription_job();

        let result = dispatcher(compute.clone(), store.clone())
            .dispatch(&job, "https://media.example/audio.mp3")
            .await;

        assert!(matches!(result, Err(DirigentError::Dispatch(_))));
        assert_eq!(compute.submitted_to(), vec!["warm", "cold"]);
    }

    #[tokio::test]
    async fn test_correlation_written_before_dispatch_returns() {
        let compute = Arc::new(FakeCompute::new().with_health("warm", 1, 0));
        let store = Arc::new(MemoryJobStore::new());
        let job = transcription_job();

        let external_id = dispatcher(compute, store.clone())
            .dispatch(&job, "https://media.example/audio.mp3")
            .await
            .unwrap();

        // The mapping is durable the instant dispatch returns, before any
        // webhook could arrive.
        let mapping = store.get_correlation(&external_id).await.unwrap().unwrap();
        assert_eq!(mapping.internal_job_id, job.id);
        assert_eq!(mapping.owner_id, "owner-1");
        assert_eq!(mapping.kind, JobKind::Transcription);
        assert_eq!(mapping.display_name.as_deref(), Some("Interview"));
    }
}
