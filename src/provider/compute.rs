//! GPU compute provider client.
//!
//! Speech-to-text runs on external GPU workers reached over HTTP: a health
//! probe reports worker counts for the routing decision, and a submission
//! registers a callback address and returns the provider-assigned job id.

use crate::config::ComputeEndpoint;
use crate::error::{DirigentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Worker counts reported by one endpoint's health probe.
///
/// Transient: used only for the immediate routing decision, never cached.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WorkerCounts {
    pub idle: u32,
    pub running: u32,
}

impl WorkerCounts {
    /// Whether any worker (idle or running) is present. A running worker
    /// still counts: it will pick up queued work when it finishes.
    pub fn has_workers(&self) -> bool {
        self.idle > 0 || self.running > 0
    }
}

/// Payload for a compute submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest {
    /// Internal job id, echoed back for diagnostics.
    pub job_id: Uuid,
    /// Uploaded source media location.
    pub audio_url: String,
    /// Human-readable name shown to the owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Trait for compute provider implementations.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Probe an endpoint's worker availability.
    ///
    /// Side effect free. Any failure (network error, non-2xx, malformed
    /// body) yields `None` rather than an error: a failed health check only
    /// removes the endpoint from consideration for this attempt and must
    /// never abort job submission.
    async fn health(&self, endpoint: &ComputeEndpoint) -> Option<WorkerCounts>;

    /// Submit a job to an endpoint, registering the callback address the
    /// provider will POST its completion notice to. Returns the externally
    /// issued job id.
    async fn submit(
        &self,
        endpoint: &ComputeEndpoint,
        request: &SubmitRequest,
        callback_url: &str,
    ) -> Result<String>;
}

#[derive(Deserialize)]
struct HealthResponse {
    workers: WorkerCounts,
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    input: &'a SubmitRequest,
    webhook: &'a str,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

/// HTTP compute provider client.
pub struct HttpComputeProvider {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl HttpComputeProvider {
    /// Create a provider client with the default timeouts.
    pub fn new(api_key: Option<String>) -> Self {
        // Health checks must resolve quickly; submissions may queue briefly
        // on the provider side before the id is issued.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");

        Self { http, api_key }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl ComputeProvider for HttpComputeProvider {
    #[instrument(skip(self), fields(endpoint = %endpoint.name))]
    async fn health(&self, endpoint: &ComputeEndpoint) -> Option<WorkerCounts> {
        let url = format!("{}/health", endpoint.url.trim_end_matches('/'));

        let response = match self.authorize(self.http.get(&url)).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("Health check for {} failed: {}", endpoint.name, e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(
                "Health check for {} returned {}",
                endpoint.name,
                response.status()
            );
            return None;
        }

        match response.json::<HealthResponse>().await {
            Ok(body) => {
                debug!(
                    "Endpoint {} reports {} idle / {} running workers",
                    endpoint.name, body.workers.idle, body.workers.running
                );
                Some(body.workers)
            }
            Err(e) => {
                warn!("Malformed health body from {}: {}", endpoint.name, e);
                None
            }
        }
    }

    #[instrument(skip(self, request), fields(endpoint = %endpoint.name, job_id = %request.job_id))]
    async fn submit(
        &self,
        endpoint: &ComputeEndpoint,
        request: &SubmitRequest,
        callback_url: &str,
    ) -> Result<String> {
        let url = format!("{}/run", endpoint.url.trim_end_matches('/'));
        let body = SubmitBody {
            input: request,
            webhook: callback_url,
        };

        let response = self
            .authorize(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| DirigentError::Provider(format!("{}: {}", endpoint.name, e)))?;

        if !response.status().is_success() {
            return Err(DirigentError::Provider(format!(
                "{} rejected submission with {}",
                endpoint.name,
                response.status()
            )));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| DirigentError::Provider(format!("{}: malformed response: {}", endpoint.name, e)))?;

        debug!(
            "Submitted job {} to {} as external id {}",
            request.job_id, endpoint.name, submitted.id
        );
        Ok(submitted.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_workers() {
        assert!(!WorkerCounts { idle: 0, running: 0 }.has_workers());
        assert!(WorkerCounts { idle: 1, running: 0 }.has_workers());
        assert!(WorkerCounts { idle: 0, running: 3 }.has_workers());
    }

    #[test]
    fn test_submit_body_shape() {
        let request = SubmitRequest {
            job_id: Uuid::nil(),
            audio_url: "https://media.example/audio.mp3".to_string(),
            display_name: None,
        };
        let body = SubmitBody {
            input: &request,
            webhook: "https://api.example/webhooks/compute",
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["webhook"], "https://api.example/webhooks/compute");
        assert_eq!(json["input"]["audio_url"], "https://media.example/audio.mp3");
        assert!(json["input"].get("display_name").is_none());
    }
}
