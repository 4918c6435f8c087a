//! Job store abstraction for Dirigent.
//!
//! The store is the single source of truth for job state ("did this
//! complete"), correlation mappings ("who does this external id belong to"),
//! per-owner usage counters, and the per-kind artifacts written when a job
//! finishes. Every mutation is keyed by a single job id; transitions are
//! enforced against the status state machine so no caller can move a job
//! backward or re-fire a terminal side effect.

mod memory;
mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

use crate::error::Result;
use crate::job::{CorrelationMapping, JobRecord, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// A content record produced by a `content_generation` job, visible to the
/// owner independently of the job record itself.
#[derive(Debug, Clone)]
pub struct ContentRecord {
    pub job_id: Uuid,
    pub owner_id: String,
    /// "completed" or "failed".
    pub status: String,
    pub content: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A summary attached to a transcription under a requested variant.
#[derive(Debug, Clone)]
pub struct SummaryEntry {
    pub transcription_id: Uuid,
    pub variant: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// One turn of a transcription's chat history.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub transcription_id: Uuid,
    pub role: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Trait for durable job store implementations.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a newly created job record.
    async fn create_job(&self, job: &JobRecord) -> Result<()>;

    /// Fetch a job by internal id.
    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>>;

    /// List all jobs for an owner, newest first.
    async fn list_jobs(&self, owner_id: &str) -> Result<Vec<JobRecord>>;

    /// Apply a non-terminal status transition if the state machine allows it.
    ///
    /// Returns whether the transition applied. A disallowed transition
    /// (backward, or out of a terminal state) is not an error; callers use
    /// the return value to decide whether downstream effects fire.
    async fn transition(&self, job_id: Uuid, next: JobStatus) -> Result<bool>;

    /// Move a job into `completed`, setting the result, progress=100 and
    /// `ended_at`. Returns false without mutating when already terminal.
    async fn complete_job(&self, job_id: Uuid, result: &str) -> Result<bool>;

    /// Move a job into `failed` with a human-readable reason. Returns false
    /// without mutating when already terminal.
    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<bool>;

    /// Update progress. Regressions and updates to terminal jobs are ignored;
    /// progress only ever moves forward. Returns whether the value advanced.
    async fn set_progress(&self, job_id: Uuid, progress: u8) -> Result<bool>;

    /// All jobs left in a non-terminal status, for the startup recovery scan.
    async fn list_unfinished(&self) -> Result<Vec<JobRecord>>;

    /// Non-terminal jobs not updated for longer than `older_than`. Queried by
    /// external health monitoring; this subsystem never cancels them itself.
    async fn list_stalled(&self, older_than: Duration) -> Result<Vec<JobRecord>>;

    /// Durably record an external-id mapping. Must be called before a
    /// successful submission returns to the caller path.
    async fn put_correlation(&self, mapping: &CorrelationMapping) -> Result<()>;

    /// Resolve an external id back to the internal job.
    async fn get_correlation(&self, external_id: &str) -> Result<Option<CorrelationMapping>>;

    /// Drop correlation mappings older than the retention cutoff. Returns the
    /// number removed.
    async fn purge_correlations_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Persist the output of a successful `content_generation` job.
    async fn save_content_record(&self, job: &JobRecord, content: &str) -> Result<()>;

    /// Mark a `content_generation` job's content record failed.
    async fn mark_content_failed(&self, job: &JobRecord, error: &str) -> Result<()>;

    /// Fetch the content record for a job, if any.
    async fn get_content_record(&self, job_id: Uuid) -> Result<Option<ContentRecord>>;

    /// Attach a summary to a transcription under the requested variant.
    async fn attach_summary(&self, transcription_id: Uuid, variant: &str, text: &str)
        -> Result<()>;

    /// List summaries attached to a transcription.
    async fn list_summaries(&self, transcription_id: Uuid) -> Result<Vec<SummaryEntry>>;

    /// Append a turn to a transcription's chat history.
    async fn append_chat_turn(&self, transcription_id: Uuid, role: &str, text: &str)
        -> Result<()>;

    /// Full chat history for a transcription, oldest first.
    async fn list_chat_turns(&self, transcription_id: Uuid) -> Result<Vec<ChatTurn>>;

    /// Deduct a usage amount from an owner's quota counter.
    async fn deduct_usage(&self, owner_id: &str, amount: i64) -> Result<()>;

    /// Total usage deducted for an owner.
    async fn usage_spent(&self, owner_id: &str) -> Result<i64>;
}
