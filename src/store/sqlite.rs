//! SQLite-based job store implementation.
//!
//! Uses a single SQLite database with WAL enabled. Transition guards run
//! under the connection lock, so a read-check-write against one job id is
//! atomic with respect to other store callers in this process.

use super::{ChatTurn, ContentRecord, JobStore, SummaryEntry};
use crate::error::{DirigentError, Result};
use crate::job::{CorrelationMapping, JobKind, JobRecord, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        progress INTEGER NOT NULL DEFAULT 0,
        payload_ref TEXT NOT NULL,
        parent_id TEXT,
        variant TEXT,
        display_name TEXT,
        result TEXT,
        error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        ended_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_owner_id ON jobs(owner_id);
    CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

    CREATE TABLE IF NOT EXISTS correlations (
        external_id TEXT PRIMARY KEY,
        internal_job_id TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        display_name TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS content_records (
        job_id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        status TEXT NOT NULL,
        content TEXT,
        error TEXT,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS summaries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        transcription_id TEXT NOT NULL,
        variant TEXT NOT NULL,
        text TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_summaries_transcription ON summaries(transcription_id);

    CREATE TABLE IF NOT EXISTS chat_turns (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        transcription_id TEXT NOT NULL,
        role TEXT NOT NULL,
        text TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chat_turns_transcription ON chat_turns(transcription_id);

    CREATE TABLE IF NOT EXISTS usage_counters (
        owner_id TEXT PRIMARY KEY,
        spent INTEGER NOT NULL DEFAULT 0
    );
"#;

/// SQLite-based job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) a job store at the given path.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite job store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory job store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DirigentError::Store(format!("Failed to acquire lock: {}", e)))
    }

    fn row_to_job(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
        let id_str: String = row.get(0)?;
        let kind_str: String = row.get(2)?;
        let status_str: String = row.get(3)?;
        let parent_str: Option<String> = row.get(6)?;
        let created_str: String = row.get(11)?;
        let updated_str: String = row.get(12)?;
        let ended_str: Option<String> = row.get(13)?;

        let kind: JobKind = kind_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?;
        let status: JobStatus = status_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?;

        Ok(JobRecord {
            id: Uuid::parse_str(&id_str).unwrap_or_default(),
            owner_id: row.get(1)?,
            kind,
            status,
            progress: row.get::<_, i64>(4)?.clamp(0, 100) as u8,
            payload_ref: row.get(5)?,
            parent_id: parent_str.and_then(|s| Uuid::parse_str(&s).ok()),
            variant: row.get(7)?,
            display_name: row.get(8)?,
            result: row.get(9)?,
            error: row.get(10)?,
            created_at: parse_timestamp(&created_str),
            updated_at: parse_timestamp(&updated_str),
            ended_at: ended_str.map(|s| parse_timestamp(&s)),
        })
    }

    fn get_job_sync(conn: &Connection, job_id: Uuid) -> Result<Option<JobRecord>> {
        let result = conn.query_row(
            r#"
            SELECT id, owner_id, kind, status, progress, payload_ref, parent_id,
                   variant, display_name, result, error, created_at, updated_at, ended_at
            FROM jobs WHERE id = ?1
            "#,
            params![job_id.to_string()],
            Self::row_to_job,
        );

        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl JobStore for SqliteJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn create_job(&self, job: &JobRecord) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO jobs
            (id, owner_id, kind, status, progress, payload_ref, parent_id, variant,
             display_name, result, error, created_at, updated_at, ended_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                job.id.to_string(),
                job.owner_id,
                job.kind.to_string(),
                job.status.to_string(),
                job.progress as i64,
                job.payload_ref,
                job.parent_id.map(|p| p.to_string()),
                job.variant,
                job.display_name,
                job.result,
                job.error,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
                job.ended_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;

        debug!("Created job {}", job.id);
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let conn = self.lock()?;
        Self::get_job_sync(&conn, job_id)
    }

    #[instrument(skip(self))]
    async fn list_jobs(&self, owner_id: &str) -> Result<Vec<JobRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, owner_id, kind, status, progress, payload_ref, parent_id,
                   variant, display_name, result, error, created_at, updated_at, ended_at
            FROM jobs WHERE owner_id = ?1
            ORDER BY created_at DESC
            "#,
        )?;

        let jobs = stmt.query_map(params![owner_id], Self::row_to_job)?;
        Ok(jobs.filter_map(|j| j.ok()).collect())
    }

    #[instrument(skip(self))]
    async fn transition(&self, job_id: Uuid, next: JobStatus) -> Result<bool> {
        let conn = self.lock()?;

        let job = Self::get_job_sync(&conn, job_id)?
            .ok_or_else(|| DirigentError::JobNotFound(job_id.to_string()))?;

        if !job.status.can_transition(next) {
            debug!(
                "Transition {} -> {} not allowed for job {}, skipping",
                job.status, next, job_id
            );
            return Ok(false);
        }

        conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                next.to_string(),
                Utc::now().to_rfc3339(),
                job_id.to_string()
            ],
        )?;

        debug!("Job {} transitioned {} -> {}", job_id, job.status, next);
        Ok(true)
    }

    #[instrument(skip(self, result))]
    async fn complete_job(&self, job_id: Uuid, result: &str) -> Result<bool> {
        let conn = self.lock()?;

        let job = Self::get_job_sync(&conn, job_id)?
            .ok_or_else(|| DirigentError::JobNotFound(job_id.to_string()))?;

        if !job.status.can_transition(JobStatus::Completed) {
            debug!("Job {} already {} - completion is a no-op", job_id, job.status);
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            UPDATE jobs
            SET status = 'completed', progress = 100, result = ?1, error = NULL,
                updated_at = ?2, ended_at = ?2
            WHERE id = ?3
            "#,
            params![result, now, job_id.to_string()],
        )?;

        info!("Job {} completed", job_id);
        Ok(true)
    }

    #[instrument(skip(self, error))]
    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<bool> {
        let conn = self.lock()?;

        let job = Self::get_job_sync(&conn, job_id)?
            .ok_or_else(|| DirigentError::JobNotFound(job_id.to_string()))?;

        if !job.status.can_transition(JobStatus::Failed) {
            debug!("Job {} already {} - failure is a no-op", job_id, job.status);
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            UPDATE jobs
            SET status = 'failed', result = NULL, error = ?1,
                updated_at = ?2, ended_at = ?2
            WHERE id = ?3
            "#,
            params![error, now, job_id.to_string()],
        )?;

        info!("Job {} failed: {}", job_id, error);
        Ok(true)
    }

    async fn set_progress(&self, job_id: Uuid, progress: u8) -> Result<bool> {
        let conn = self.lock()?;

        // Progress only moves forward and never touches terminal jobs.
        let changed = conn.execute(
            r#"
            UPDATE jobs SET progress = ?1, updated_at = ?2
            WHERE id = ?3 AND progress < ?1 AND status NOT IN ('completed', 'failed')
            "#,
            params![
                progress.min(100) as i64,
                Utc::now().to_rfc3339(),
                job_id.to_string()
            ],
        )?;

        Ok(changed > 0)
    }

    #[instrument(skip(self))]
    async fn list_unfinished(&self) -> Result<Vec<JobRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, owner_id, kind, status, progress, payload_ref, parent_id,
                   variant, display_name, result, error, created_at, updated_at, ended_at
            FROM jobs WHERE status NOT IN ('completed', 'failed')
            ORDER BY created_at
            "#,
        )?;

        let jobs = stmt.query_map([], Self::row_to_job)?;
        Ok(jobs.filter_map(|j| j.ok()).collect())
    }

    #[instrument(skip(self))]
    async fn list_stalled(&self, older_than: Duration) -> Result<Vec<JobRecord>> {
        let cutoff = (Utc::now() - older_than).to_rfc3339();
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, owner_id, kind, status, progress, payload_ref, parent_id,
                   variant, display_name, result, error, created_at, updated_at, ended_at
            FROM jobs
            WHERE status NOT IN ('completed', 'failed') AND updated_at < ?1
            ORDER BY updated_at
            "#,
        )?;

        let jobs = stmt.query_map(params![cutoff], Self::row_to_job)?;
        Ok(jobs.filter_map(|j| j.ok()).collect())
    }

    #[instrument(skip(self, mapping), fields(external_id = %mapping.external_id))]
    async fn put_correlation(&self, mapping: &CorrelationMapping) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO correlations
            (external_id, internal_job_id, owner_id, kind, display_name, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                mapping.external_id,
                mapping.internal_job_id.to_string(),
                mapping.owner_id,
                mapping.kind.to_string(),
                mapping.display_name,
                mapping.created_at.to_rfc3339(),
            ],
        )?;

        debug!(
            "Recorded correlation {} -> {}",
            mapping.external_id, mapping.internal_job_id
        );
        Ok(())
    }

    async fn get_correlation(&self, external_id: &str) -> Result<Option<CorrelationMapping>> {
        let conn = self.lock()?;

        let result = conn.query_row(
            r#"
            SELECT external_id, internal_job_id, owner_id, kind, display_name, created_at
            FROM correlations WHERE external_id = ?1
            "#,
            params![external_id],
            |row| {
                let job_id_str: String = row.get(1)?;
                let kind_str: String = row.get(3)?;
                let created_str: String = row.get(5)?;

                let kind: JobKind = kind_str.parse().map_err(|e: String| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        rusqlite::types::Type::Text,
                        e.into(),
                    )
                })?;

                Ok(CorrelationMapping {
                    external_id: row.get(0)?,
                    internal_job_id: Uuid::parse_str(&job_id_str).unwrap_or_default(),
                    owner_id: row.get(2)?,
                    kind,
                    display_name: row.get(4)?,
                    created_at: parse_timestamp(&created_str),
                })
            },
        );

        match result {
            Ok(mapping) => Ok(Some(mapping)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn purge_correlations_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;

        let purged = conn.execute(
            "DELETE FROM correlations WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;

        if purged > 0 {
            info!("Purged {} expired correlation mappings", purged);
        }
        Ok(purged)
    }

    #[instrument(skip(self, job, content), fields(job_id = %job.id))]
    async fn save_content_record(&self, job: &JobRecord, content: &str) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO content_records
            (job_id, owner_id, status, content, error, updated_at)
            VALUES (?1, ?2, 'completed', ?3, NULL, ?4)
            "#,
            params![
                job.id.to_string(),
                job.owner_id,
                content,
                Utc::now().to_rfc3339()
            ],
        )?;

        debug!("Saved content record for job {}", job.id);
        Ok(())
    }

    #[instrument(skip(self, job, error), fields(job_id = %job.id))]
    async fn mark_content_failed(&self, job: &JobRecord, error: &str) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO content_records
            (job_id, owner_id, status, content, error, updated_at)
            VALUES (?1, ?2, 'failed', NULL, ?3, ?4)
            "#,
            params![
                job.id.to_string(),
                job.owner_id,
                error,
                Utc::now().to_rfc3339()
            ],
        )?;

        Ok(())
    }

    async fn get_content_record(&self, job_id: Uuid) -> Result<Option<ContentRecord>> {
        let conn = self.lock()?;

        let result = conn.query_row(
            r#"
            SELECT job_id, owner_id, status, content, error, updated_at
            FROM content_records WHERE job_id = ?1
            "#,
            params![job_id.to_string()],
            |row| {
                let job_id_str: String = row.get(0)?;
                let updated_str: String = row.get(5)?;
                Ok(ContentRecord {
                    job_id: Uuid::parse_str(&job_id_str).unwrap_or_default(),
                    owner_id: row.get(1)?,
                    status: row.get(2)?,
                    content: row.get(3)?,
                    error: row.get(4)?,
                    updated_at: parse_timestamp(&updated_str),
                })
            },
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, text))]
    async fn attach_summary(
        &self,
        transcription_id: Uuid,
        variant: &str,
        text: &str,
    ) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO summaries (transcription_id, variant, text, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                transcription_id.to_string(),
                variant,
                text,
                Utc::now().to_rfc3339()
            ],
        )?;

        debug!(
            "Attached '{}' summary to transcription {}",
            variant, transcription_id
        );
        Ok(())
    }

    async fn list_summaries(&self, transcription_id: Uuid) -> Result<Vec<SummaryEntry>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT transcription_id, variant, text, created_at
            FROM summaries WHERE transcription_id = ?1 ORDER BY id
            "#,
        )?;

        let rows = stmt.query_map(params![transcription_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let created_str: String = row.get(3)?;
            Ok(SummaryEntry {
                transcription_id: Uuid::parse_str(&id_str).unwrap_or_default(),
                variant: row.get(1)?,
                text: row.get(2)?,
                created_at: parse_timestamp(&created_str),
            })
        })?;

        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    #[instrument(skip(self, text))]
    async fn append_chat_turn(
        &self,
        transcription_id: Uuid,
        role: &str,
        text: &str,
    ) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO chat_turns (transcription_id, role, text, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                transcription_id.to_string(),
                role,
                text,
                Utc::now().to_rfc3339()
            ],
        )?;

        Ok(())
    }

    async fn list_chat_turns(&self, transcription_id: Uuid) -> Result<Vec<ChatTurn>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT transcription_id, role, text, created_at
            FROM chat_turns WHERE transcription_id = ?1 ORDER BY id
            "#,
        )?;

        let rows = stmt.query_map(params![transcription_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let created_str: String = row.get(3)?;
            Ok(ChatTurn {
                transcription_id: Uuid::parse_str(&id_str).unwrap_or_default(),
                role: row.get(1)?,
                text: row.get(2)?,
                created_at: parse_timestamp(&created_str),
            })
        })?;

        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    #[instrument(skip(self))]
    async fn deduct_usage(&self, owner_id: &str, amount: i64) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO usage_counters (owner_id, spent) VALUES (?1, ?2)
            ON CONFLICT(owner_id) DO UPDATE SET spent = spent + ?2
            "#,
            params![owner_id, amount],
        )?;

        debug!("Deducted {} usage units from {}", amount, owner_id);
        Ok(())
    }

    async fn usage_spent(&self, owner_id: &str) -> Result<i64> {
        let conn = self.lock()?;

        let result = conn.query_row(
            "SELECT spent FROM usage_counters WHERE owner_id = ?1",
            params![owner_id],
            |row| row.get(0),
        );

        match result {
            Ok(spent) => Ok(spent),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobPayload;

    fn sample_job(kind: JobKind) -> JobRecord {
        JobRecord::new(
            "owner-1",
            kind,
            JobPayload {
                input: "s3://bucket/episode-12.mp3".to_string(),
                display_name: Some("Episode 12".to_string()),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let store = SqliteJobStore::in_memory().unwrap();
        let job = sample_job(JobKind::Transcription);

        store.create_job(&job).await.unwrap();

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.progress, 0);
        assert_eq!(fetched.display_name.as_deref(), Some("Episode 12"));

        assert!(store.transition(job.id, JobStatus::Uploading).await.unwrap());
        assert!(store.transition(job.id, JobStatus::Processing).await.unwrap());

        // Backward transition must not apply.
        assert!(!store.transition(job.id, JobStatus::Uploading).await.unwrap());

        assert!(store.complete_job(job.id, "transcript text").await.unwrap());

        let done = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.result.as_deref(), Some("transcript text"));
        assert!(done.error.is_none());
        assert!(done.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_state_is_immutable() {
        let store = SqliteJobStore::in_memory().unwrap();
        let job = sample_job(JobKind::Chat);
        store.create_job(&job).await.unwrap();

        store.transition(job.id, JobStatus::Processing).await.unwrap();
        assert!(store.fail_job(job.id, "provider timed out").await.unwrap());

        // Completion of a failed job is a no-op, not an error.
        assert!(!store.complete_job(job.id, "late result").await.unwrap());
        assert!(!store.fail_job(job.id, "second failure").await.unwrap());

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Failed);
        assert_eq!(fetched.error.as_deref(), Some("provider timed out"));
        assert!(fetched.result.is_none());
        assert_eq!(fetched.progress, 0);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let store = SqliteJobStore::in_memory().unwrap();
        let job = sample_job(JobKind::Transcription);
        store.create_job(&job).await.unwrap();
        store.transition(job.id, JobStatus::Processing).await.unwrap();

        store.set_progress(job.id, 40).await.unwrap();
        store.set_progress(job.id, 20).await.unwrap();

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.progress, 40);
    }

    #[tokio::test]
    async fn test_correlation_roundtrip_and_purge() {
        let store = SqliteJobStore::in_memory().unwrap();
        let job = sample_job(JobKind::Transcription);

        let mapping = CorrelationMapping {
            external_id: "ext-abc123".to_string(),
            internal_job_id: job.id,
            owner_id: job.owner_id.clone(),
            kind: job.kind,
            display_name: job.display_name.clone(),
            created_at: Utc::now() - Duration::days(10),
        };
        store.put_correlation(&mapping).await.unwrap();

        let found = store.get_correlation("ext-abc123").await.unwrap().unwrap();
        assert_eq!(found.internal_job_id, job.id);
        assert_eq!(found.kind, JobKind::Transcription);

        assert!(store.get_correlation("ext-unknown").await.unwrap().is_none());

        let purged = store
            .purge_correlations_before(Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_correlation("ext-abc123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stalled_query() {
        let store = SqliteJobStore::in_memory().unwrap();
        let job = sample_job(JobKind::Transcription);
        store.create_job(&job).await.unwrap();
        store.transition(job.id, JobStatus::Processing).await.unwrap();

        // Nothing is stalled against a 10 minute threshold yet.
        let stalled = store.list_stalled(Duration::minutes(10)).await.unwrap();
        assert!(stalled.is_empty());

        // Everything non-terminal is stalled against a zero threshold.
        let stalled = store.list_stalled(Duration::zero()).await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].id, job.id);
    }

    #[tokio::test]
    async fn test_usage_counter_accumulates() {
        let store = SqliteJobStore::in_memory().unwrap();
        assert_eq!(store.usage_spent("owner-1").await.unwrap(), 0);

        store.deduct_usage("owner-1", 3).await.unwrap();
        store.deduct_usage("owner-1", 2).await.unwrap();
        assert_eq!(store.usage_spent("owner-1").await.unwrap(), 5);
        assert_eq!(store.usage_spent("owner-2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_artifact_persistence() {
        let store = SqliteJobStore::in_memory().unwrap();
        let transcription = sample_job(JobKind::Transcription);

        store
            .attach_summary(transcription.id, "bullet_points", "- point one")
            .await
            .unwrap();
        store
            .append_chat_turn(transcription.id, "user", "What was discussed?")
            .await
            .unwrap();
        store
            .append_chat_turn(transcription.id, "assistant", "The episode covered...")
            .await
            .unwrap();

        let summaries = store.list_summaries(transcription.id).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].variant, "bullet_points");

        let turns = store.list_chat_turns(transcription.id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[1].role, "assistant");
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");

        let job = sample_job(JobKind::Transcription);
        {
            let store = SqliteJobStore::new(&path).unwrap();
            store.create_job(&job).await.unwrap();
            store
                .transition(job.id, JobStatus::Processing)
                .await
                .unwrap();
            store
                .put_correlation(&CorrelationMapping {
                    external_id: "ext-42".to_string(),
                    internal_job_id: job.id,
                    owner_id: job.owner_id.clone(),
                    kind: job.kind,
                    display_name: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        // A restarted process sees the in-flight job and its correlation.
        let store = SqliteJobStore::new(&path).unwrap();
        let reloaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Processing);

        let mapping = store.get_correlation("ext-42").await.unwrap().unwrap();
        assert_eq!(mapping.internal_job_id, job.id);

        let unfinished = store.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
    }
}
