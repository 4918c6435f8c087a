//! Job data model and status state machine.
//!
//! A job is one unit of asynchronous work tracked from submission to a
//! terminal status. Both completion paths (the in-process task queue and the
//! webhook ingress) drive the same state machine; the store enforces the
//! transition rules defined here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of work a job performs.
///
/// `Transcription` runs on external GPU workers and completes via webhook;
/// the other kinds are short LLM calls that complete synchronously inside
/// the concurrency-bounded task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Transcription,
    Chat,
    Summary,
    ContentGeneration,
}

impl JobKind {
    /// Whether this kind is dispatched to the GPU compute provider.
    pub fn is_compute(&self) -> bool {
        matches!(self, JobKind::Transcription)
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "transcription" => Ok(JobKind::Transcription),
            "chat" => Ok(JobKind::Chat),
            "summary" => Ok(JobKind::Summary),
            "content_generation" => Ok(JobKind::ContentGeneration),
            _ => Err(format!("Unknown job kind: {}", s)),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Transcription => write!(f, "transcription"),
            JobKind::Chat => write!(f, "chat"),
            JobKind::Summary => write!(f, "summary"),
            JobKind::ContentGeneration => write!(f, "content_generation"),
        }
    }
}

/// Job lifecycle status.
///
/// Transitions are strictly monotonic: `pending -> (uploading ->)? processing
/// -> {completed | failed}`. A terminal status is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Check whether a transition to `next` is allowed.
    ///
    /// This is the single transition predicate for the whole subsystem. The
    /// task queue and the webhook ingress both go through it (via the store),
    /// so neither path can move a job backward or out of a terminal state.
    /// Forward skips are legal: a webhook can complete a job whose
    /// processing transition has not landed yet.
    pub fn can_transition(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Uploading) => true,
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Pending, JobStatus::Completed) => true,
            (JobStatus::Pending, JobStatus::Failed) => true,
            (JobStatus::Uploading, JobStatus::Processing) => true,
            (JobStatus::Uploading, JobStatus::Completed) => true,
            (JobStatus::Uploading, JobStatus::Failed) => true,
            (JobStatus::Processing, JobStatus::Completed) => true,
            (JobStatus::Processing, JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "uploading" => Ok(JobStatus::Uploading),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Uploading => write!(f, "uploading"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Input payload for a job submission.
///
/// `input` is a pointer to the work: a media location for transcription, or
/// the prompt text for LLM kinds (small enough to carry inline). Summary and
/// chat jobs reference the transcription job whose artifacts they extend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPayload {
    /// Source media location or prompt text.
    pub input: String,
    /// Owning transcription job (summary and chat kinds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Requested summary variant (summary kind).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Human-readable name shown to the owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Durable record of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Internal job ID, generated at creation.
    pub id: Uuid,
    /// The requesting principal.
    pub owner_id: String,
    /// Kind of work.
    pub kind: JobKind,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Progress percentage, 0-100, monotonically non-decreasing while active.
    pub progress: u8,
    /// Pointer to input data (media location or prompt text).
    pub payload_ref: String,
    /// Owning transcription job, for summary/chat kinds.
    pub parent_id: Option<Uuid>,
    /// Requested summary variant, for summary kind.
    pub variant: Option<String>,
    /// Human-readable name shown to the owner.
    pub display_name: Option<String>,
    /// Success payload; present only when completed.
    pub result: Option<String>,
    /// Human-readable failure reason; present only when failed.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new pending job.
    pub fn new(owner_id: &str, kind: JobKind, payload: JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            kind,
            status: JobStatus::Pending,
            progress: 0,
            payload_ref: payload.input,
            parent_id: payload.parent_id,
            variant: payload.variant,
            display_name: payload.display_name,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            ended_at: None,
        }
    }
}

/// Durable index from an externally issued job identifier back to the
/// internal job, written before a successful submission returns so a
/// late-arriving webhook can be resolved even after a process restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationMapping {
    /// ID assigned by the external provider at submission time.
    pub external_id: String,
    pub internal_job_id: Uuid,
    pub owner_id: String,
    pub kind: JobKind,
    /// Snapshot of payload metadata, enough to resume after a restart.
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Status-transition event broadcast to live subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub owner_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    /// Short preview of the result, for completed jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
}

impl JobEvent {
    /// Build an event from a job record, truncating the result preview.
    pub fn from_record(job: &JobRecord) -> Self {
        const PREVIEW_LEN: usize = 160;
        let result_summary = job.result.as_ref().map(|r| {
            if r.chars().count() <= PREVIEW_LEN {
                r.clone()
            } else {
                let preview: String = r.chars().take(PREVIEW_LEN).collect();
                format!("{}...", preview)
            }
        });

        Self {
            job_id: job.id,
            owner_id: job.owner_id.clone(),
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            result_summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_are_immutable() {
        for terminal in [JobStatus::Completed, JobStatus::Failed] {
            for next in [
                JobStatus::Pending,
                JobStatus::Uploading,
                JobStatus::Processing,
                JobStatus::Completed,
                JobStatus::Failed,
            ] {
                assert!(!terminal.can_transition(next));
            }
        }
    }

    #[test]
    fn test_no_backward_transitions() {
        assert!(!JobStatus::Processing.can_transition(JobStatus::Pending));
        assert!(!JobStatus::Processing.can_transition(JobStatus::Uploading));
        assert!(!JobStatus::Uploading.can_transition(JobStatus::Pending));
    }

    #[test]
    fn test_allowed_sequence() {
        assert!(JobStatus::Pending.can_transition(JobStatus::Uploading));
        assert!(JobStatus::Pending.can_transition(JobStatus::Processing));
        assert!(JobStatus::Uploading.can_transition(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition(JobStatus::Failed));

        // A webhook may land before the dispatch path records processing.
        assert!(JobStatus::Pending.can_transition(JobStatus::Completed));
        assert!(JobStatus::Uploading.can_transition(JobStatus::Completed));
    }

    #[test]
    fn test_kind_parse_roundtrip() {
        for kind in [
            JobKind::Transcription,
            JobKind::Chat,
            JobKind::Summary,
            JobKind::ContentGeneration,
        ] {
            let parsed: JobKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("demux".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_event_result_preview_truncated() {
        let mut job = JobRecord::new("owner-1", JobKind::Chat, JobPayload::default());
        job.result = Some("x".repeat(500));
        let event = JobEvent::from_record(&job);
        let summary = event.result_summary.unwrap();
        assert!(summary.len() < 200);
        assert!(summary.ends_with("..."));
    }
}
