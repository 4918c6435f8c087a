//! In-memory job store implementation.
//!
//! Useful for testing and for embedding the orchestration core without a
//! database. Not durable: a process restart loses everything, so production
//! deployments should use the SQLite store.

use super::{ChatTurn, ContentRecord, JobStore, SummaryEntry};
use crate::error::{DirigentError, Result};
use crate::job::{CorrelationMapping, JobRecord, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory job store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
    correlations: RwLock<HashMap<String, CorrelationMapping>>,
    contents: RwLock<HashMap<Uuid, ContentRecord>>,
    summaries: RwLock<Vec<SummaryEntry>>,
    chat_turns: RwLock<Vec<ChatTurn>>,
    usage: RwLock<HashMap<String, i64>>,
}

impl MemoryJobStore {
    /// Create a new in-memory job store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: &JobRecord) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs.get(&job_id).cloned())
    }

    async fn list_jobs(&self, owner_id: &str) -> Result<Vec<JobRecord>> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<JobRecord> = jobs
            .values()
            .filter(|j| j.owner_id == owner_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    async fn transition(&self, job_id: Uuid, next: JobStatus) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| DirigentError::JobNotFound(job_id.to_string()))?;

        if !job.status.can_transition(next) {
            return Ok(false);
        }

        job.status = next;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_job(&self, job_id: Uuid, result: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| DirigentError::JobNotFound(job_id.to_string()))?;

        if !job.status.can_transition(JobStatus::Completed) {
            return Ok(false);
        }

        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.result = Some(result.to_string());
        job.error = None;
        job.updated_at = now;
        job.ended_at = Some(now);
        Ok(true)
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| DirigentError::JobNotFound(job_id.to_string()))?;

        if !job.status.can_transition(JobStatus::Failed) {
            return Ok(false);
        }

        let now = Utc::now();
        job.status = JobStatus::Failed;
        job.result = None;
        job.error = Some(error.to_string());
        job.updated_at = now;
        job.ended_at = Some(now);
        Ok(true)
    }

    async fn set_progress(&self, job_id: Uuid, progress: u8) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            let progress = progress.min(100);
            if !job.status.is_terminal() && progress > job.progress {
                job.progress = progress;
                job.updated_at = Utc::now();
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn list_unfinished(&self) -> Result<Vec<JobRecord>> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<JobRecord> = jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn list_stalled(&self, older_than: Duration) -> Result<Vec<JobRecord>> {
        let cutoff = Utc::now() - older_than;
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<JobRecord> = jobs
            .values()
            .filter(|j| !j.status.is_terminal() && j.updated_at < cutoff)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(result)
    }

    async fn put_correlation(&self, mapping: &CorrelationMapping) -> Result<()> {
        let mut correlations = self.correlations.write().unwrap();
        correlations.insert(mapping.external_id.clone(), mapping.clone());
        Ok(())
    }

    async fn get_correlation(&self, external_id: &str) -> Result<Option<CorrelationMapping>> {
        let correlations = self.correlations.read().unwrap();
        Ok(correlations.get(external_id).cloned())
    }

    async fn purge_correlations_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut correlations = self.correlations.write().unwrap();
        let initial_len = correlations.len();
        correlations.retain(|_, m| m.created_at >= cutoff);
        Ok(initial_len - correlations.len())
    }

    async fn save_content_record(&self, job: &JobRecord, content: &str) -> Result<()> {
        let mut contents = self.contents.write().unwrap();
        contents.insert(
            job.id,
            ContentRecord {
                job_id: job.id,
                owner_id: job.owner_id.clone(),
                status: "completed".to_string(),
                content: Some(content.to_string()),
                error: None,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn mark_content_failed(&self, job: &JobRecord, error: &str) -> Result<()> {
        let mut contents = self.contents.write().unwrap();
        contents.insert(
            job.id,
            ContentRecord {
                job_id: job.id,
                owner_id: job.owner_id.clone(),
                status: "failed".to_string(),
                content: None,
                error: Some(error.to_string()),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_content_record(&self, job_id: Uuid) -> Result<Option<ContentRecord>> {
        let contents = self.contents.read().unwrap();
        Ok(contents.get(&job_id).cloned())
    }

    async fn attach_summary(
        &self,
        transcription_id: Uuid,
        variant: &str,
        text: &str,
    ) -> Result<()> {
        let mut summaries = self.summaries.write().unwrap();
        summaries.push(SummaryEntry {
            transcription_id,
            variant: variant.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_summaries(&self, transcription_id: Uuid) -> Result<Vec<SummaryEntry>> {
        let summaries = self.summaries.read().unwrap();
        Ok(summaries
            .iter()
            .filter(|s| s.transcription_id == transcription_id)
            .cloned()
            .collect())
    }

    async fn append_chat_turn(
        &self,
        transcription_id: Uuid,
        role: &str,
        text: &str,
    ) -> Result<()> {
        let mut turns = self.chat_turns.write().unwrap();
        turns.push(ChatTurn {
            transcription_id,
            role: role.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_chat_turns(&self, transcription_id: Uuid) -> Result<Vec<ChatTurn>> {
        let turns = self.chat_turns.read().unwrap();
        Ok(turns
            .iter()
            .filter(|t| t.transcription_id == transcription_id)
            .cloned()
            .collect())
    }

    async fn deduct_usage(&self, owner_id: &str, amount: i64) -> Result<()> {
        let mut usage = self.usage.write().unwrap();
        *usage.entry(owner_id.to_string()).or_insert(0) += amount;
        Ok(())
    }

    async fn usage_spent(&self, owner_id: &str) -> Result<i64> {
        let usage = self.usage.read().unwrap();
        Ok(usage.get(owner_id).copied().unwrap_or(0))
    }
}
