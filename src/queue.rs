//! Concurrency-bounded task queue for LLM jobs.
//!
//! Chat, summary, and content-generation jobs are short synchronous calls to
//! the LLM provider. They share one FIFO queue and one in-flight bound: a
//! drain loop admits queued jobs while slots remain, spawns one worker task
//! per admitted job, and each worker re-invokes the drain when it finishes so
//! queued work proceeds. No priority or deadline scheduling.

use crate::error::DirigentError;
use crate::job::{JobEvent, JobKind, JobRecord, JobStatus};
use crate::notify::Publisher;
use crate::provider::LlmProvider;
use crate::store::JobStore;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CONTENT_SYSTEM: &str =
    "You repurpose podcast and video transcripts into polished written content. \
     Respond with the finished piece only.";
const SUMMARY_SYSTEM: &str =
    "You summarize transcripts. Respond with the requested summary only.";
const CHAT_SYSTEM: &str =
    "You answer questions about a transcript on behalf of its owner. \
     Be concise and ground every answer in the transcript.";

fn system_prompt_for(kind: JobKind) -> &'static str {
    match kind {
        JobKind::ContentGeneration => CONTENT_SYSTEM,
        JobKind::Summary => SUMMARY_SYSTEM,
        // Transcription never reaches the queue; the fallback prompt is
        // harmless if it somehow does.
        JobKind::Chat | JobKind::Transcription => CHAT_SYSTEM,
    }
}

/// FIFO task queue bounding in-flight LLM calls.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    store: Arc<dyn JobStore>,
    llm: Arc<dyn LlmProvider>,
    publisher: Arc<dyn Publisher>,
    max_concurrent: usize,
    units_per_1k_chars: i64,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Uuid>,
    active: usize,
}

impl TaskQueue {
    /// Create a queue with the given in-flight bound.
    pub fn new(
        store: Arc<dyn JobStore>,
        llm: Arc<dyn LlmProvider>,
        publisher: Arc<dyn Publisher>,
        max_concurrent: usize,
        units_per_1k_chars: i64,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                store,
                llm,
                publisher,
                max_concurrent: max_concurrent.max(1),
                units_per_1k_chars,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Admit a job. Returns immediately; the job starts as soon as a slot
    /// frees up, in FIFO order.
    pub fn enqueue(&self, job_id: Uuid) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.pending.push_back(job_id);
            debug!(
                "Enqueued job {} ({} pending, {} active)",
                job_id,
                state.pending.len(),
                state.active
            );
        }
        self.drain();
    }

    /// Number of jobs currently running.
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().unwrap().active
    }

    /// Number of jobs waiting for a slot.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().unwrap().pending.len()
    }

    /// Start queued jobs while slots remain.
    fn drain(&self) {
        loop {
            let job_id = {
                let mut state = self.inner.state.lock().unwrap();
                if state.active >= self.inner.max_concurrent {
                    return;
                }
                match state.pending.pop_front() {
                    Some(id) => {
                        state.active += 1;
                        id
                    }
                    None => return,
                }
            };

            let queue = self.clone();
            tokio::spawn(async move {
                queue.inner.run_job(job_id).await;
                {
                    let mut state = queue.inner.state.lock().unwrap();
                    state.active -= 1;
                }
                queue.drain();
            });
        }
    }
}

impl QueueInner {
    /// Run one job to its terminal state.
    async fn run_job(&self, job_id: Uuid) {
        let job = match self.store.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!("Queued job {} no longer exists, skipping", job_id);
                return;
            }
            Err(e) => {
                error!("Failed to load queued job {}: {}", job_id, e);
                return;
            }
        };

        // A replayed id (restart recovery) may already be terminal.
        if job.status.is_terminal() {
            debug!("Job {} is already {}, nothing to do", job_id, job.status);
            return;
        }

        // Recovered jobs can already be processing; the transition guard
        // makes that a no-op rather than an error.
        match self.store.transition(job_id, JobStatus::Processing).await {
            Ok(true) => {
                let mut started = job.clone();
                started.status = JobStatus::Processing;
                self.publisher
                    .publish(&job.owner_id, JobEvent::from_record(&started));
            }
            Ok(false) => {}
            Err(e) => {
                error!("Failed to start job {}: {}", job_id, e);
                return;
            }
        }

        let system = system_prompt_for(job.kind);
        match self.llm.call(&job.payload_ref, system).await {
            Ok(text) => self.finish_success(&job, &text).await,
            Err(e) => self.finish_failure(&job, &e).await,
        }
    }

    async fn finish_success(&self, job: &JobRecord, text: &str) {
        let applied = match self.store.complete_job(job.id, text).await {
            Ok(applied) => applied,
            Err(e) => {
                error!("Failed to persist completion of job {}: {}", job.id, e);
                return;
            }
        };

        // The terminal-transition guard is the at-most-once gate: effects
        // never re-fire for a job that was already terminal.
        if !applied {
            debug!("Job {} completion replayed, skipping side effects", job.id);
            return;
        }

        self.apply_success_effects(job, text).await;
        self.publish_final(job.id, &job.owner_id).await;
    }

    async fn finish_failure(&self, job: &JobRecord, cause: &DirigentError) {
        let reason = cause.to_string();
        let applied = match self.store.fail_job(job.id, &reason).await {
            Ok(applied) => applied,
            Err(e) => {
                error!("Failed to persist failure of job {}: {}", job.id, e);
                return;
            }
        };

        if !applied {
            debug!("Job {} failure replayed, skipping side effects", job.id);
            return;
        }

        info!("Job {} failed: {}", job.id, reason);

        // Usage is only deducted for delivered output; a failed content
        // generation still marks its content record so the owner sees why.
        if job.kind == JobKind::ContentGeneration {
            if let Err(e) = self.store.mark_content_failed(job, &reason).await {
                warn!("Failed to mark content record for job {}: {}", job.id, e);
            }
        }

        self.publish_final(job.id, &job.owner_id).await;
    }

    /// Per-kind completion side effects. Failures here are logged and never
    /// revert the otherwise-successful job: the generated output is valid
    /// and owner-visible regardless of bookkeeping outcome.
    async fn apply_success_effects(&self, job: &JobRecord, text: &str) {
        match job.kind {
            JobKind::ContentGeneration => {
                if let Err(e) = self.store.save_content_record(job, text).await {
                    warn!("Failed to save content record for job {}: {}", job.id, e);
                }

                let chars = text.chars().count();
                let units = chars.div_ceil(1000) as i64 * self.units_per_1k_chars;
                if let Err(e) = self.store.deduct_usage(&job.owner_id, units).await {
                    warn!(
                        "Usage deduction of {} units failed for {}: {}",
                        units, job.owner_id, e
                    );
                }
            }
            JobKind::Summary => {
                let Some(parent) = job.parent_id else {
                    warn!("Summary job {} has no owning transcription", job.id);
                    return;
                };
                let variant = job.variant.as_deref().unwrap_or("default");
                if let Err(e) = self.store.attach_summary(parent, variant, text).await {
                    warn!("Failed to attach summary for job {}: {}", job.id, e);
                }
            }
            JobKind::Chat => {
                let Some(parent) = job.parent_id else {
                    warn!("Chat job {} has no owning transcription", job.id);
                    return;
                };
                if let Err(e) = self.store.append_chat_turn(parent, "assistant", text).await {
                    warn!("Failed to append chat turn for job {}: {}", job.id, e);
                }
            }
            JobKind::Transcription => {}
        }
    }

    async fn publish_final(&self, job_id: Uuid, owner_id: &str) {
        match self.store.get_job(job_id).await {
            Ok(Some(job)) => self.publisher.publish(owner_id, JobEvent::from_record(&job)),
            Ok(None) => {}
            Err(e) => warn!("Failed to reload job {} for fanout: {}", job_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::job::JobPayload;
    use crate::notify::NoopPublisher;
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Fake LLM that blocks each call until a permit is released, recording
    /// started/concurrent/peak call counts.
    struct BlockingLlm {
        started: AtomicUsize,
        current: AtomicUsize,
        peak: AtomicUsize,
        gate: Semaphore,
    }

    impl BlockingLlm {
        fn new() -> Self {
            Self {
                started: AtomicUsize::new(0),
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                gate: Semaphore::new(0),
            }
        }

        fn release(&self, n: usize) {
            self.gate.add_permits(n);
        }

        fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for BlockingLlm {
        async fn call(&self, _prompt: &str, _system: &str) -> Result<String> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();

            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok("generated text".to_string())
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmProvider for FailingLlm {
        async fn call(&self, _prompt: &str, _system: &str) -> Result<String> {
            Err(DirigentError::Provider("model overloaded".to_string()))
        }
    }

    async fn make_job(store: &MemoryJobStore, kind: JobKind, payload: JobPayload) -> JobRecord {
        let job = JobRecord::new("owner-1", kind, payload);
        store.create_job(&job).await.unwrap();
        job
    }

    async fn wait_terminal(store: &MemoryJobStore, ids: &[Uuid]) {
        for _ in 0..200 {
            let mut all_done = true;
            for id in ids {
                let job = store.get_job(*id).await.unwrap().unwrap();
                if !job.status.is_terminal() {
                    all_done = false;
                    break;
                }
            }
            if all_done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("jobs did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_max() {
        let store = Arc::new(MemoryJobStore::new());
        let llm = Arc::new(BlockingLlm::new());
        let queue = TaskQueue::new(
            store.clone(),
            llm.clone(),
            Arc::new(NoopPublisher),
            3,
            1,
        );

        // Burst of max + K submissions.
        let mut ids = Vec::new();
        for _ in 0..7 {
            let job = make_job(
                &store,
                JobKind::ContentGeneration,
                JobPayload {
                    input: "prompt".to_string(),
                    ..Default::default()
                },
            )
            .await;
            ids.push(job.id);
            queue.enqueue(job.id);
        }

        llm.release(32);
        wait_terminal(&store, &ids).await;

        assert_eq!(llm.started(), 7);
        assert!(llm.peak() <= 3, "peak concurrency was {}", llm.peak());
    }

    #[tokio::test]
    async fn test_third_job_waits_for_a_free_slot() {
        let store = Arc::new(MemoryJobStore::new());
        let llm = Arc::new(BlockingLlm::new());
        let queue = TaskQueue::new(
            store.clone(),
            llm.clone(),
            Arc::new(NoopPublisher),
            2,
            1,
        );

        let mut ids = Vec::new();
        for _ in 0..3 {
            let job = make_job(
                &store,
                JobKind::ContentGeneration,
                JobPayload {
                    input: "prompt".to_string(),
                    ..Default::default()
                },
            )
            .await;
            ids.push(job.id);
            queue.enqueue(job.id);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(llm.started(), 2, "job 3 must wait for a terminal state");
        assert_eq!(queue.pending_count(), 1);

        // Let one of the first two finish; the third is admitted.
        llm.release(1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(llm.started(), 3);

        llm.release(2);
        wait_terminal(&store, &ids).await;
    }

    #[tokio::test]
    async fn test_content_generation_effects() {
        let store = Arc::new(MemoryJobStore::new());
        let llm = Arc::new(BlockingLlm::new());
        llm.release(8);
        let queue = TaskQueue::new(
            store.clone(),
            llm.clone(),
            Arc::new(NoopPublisher),
            2,
            2,
        );

        let job = make_job(
            &store,
            JobKind::ContentGeneration,
            JobPayload {
                input: "Write a newsletter".to_string(),
                ..Default::default()
            },
        )
        .await;
        queue.enqueue(job.id);
        wait_terminal(&store, &[job.id]).await;

        let done = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);

        let content = store.get_content_record(job.id).await.unwrap().unwrap();
        assert_eq!(content.status, "completed");
        assert_eq!(content.content.as_deref(), Some("generated text"));

        // "generated text" is under 1k chars: one 1k block at 2 units each.
        assert_eq!(store.usage_spent("owner-1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replayed_job_does_not_double_deduct() {
        let store = Arc::new(MemoryJobStore::new());
        let llm = Arc::new(BlockingLlm::new());
        llm.release(8);
        let queue = TaskQueue::new(
            store.clone(),
            llm.clone(),
            Arc::new(NoopPublisher),
            2,
            1,
        );

        let job = make_job(
            &store,
            JobKind::ContentGeneration,
            JobPayload {
                input: "Write a newsletter".to_string(),
                ..Default::default()
            },
        )
        .await;

        queue.enqueue(job.id);
        wait_terminal(&store, &[job.id]).await;
        let spent = store.usage_spent("owner-1").await.unwrap();

        // Replay the same id, as a restart recovery might.
        queue.enqueue(job.id);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.usage_spent("owner-1").await.unwrap(), spent);
        assert_eq!(llm.started(), 1, "terminal job must not re-run");
    }

    #[tokio::test]
    async fn test_summary_attaches_to_parent() {
        let store = Arc::new(MemoryJobStore::new());
        let llm = Arc::new(BlockingLlm::new());
        llm.release(8);
        let queue = TaskQueue::new(
            store.clone(),
            llm.clone(),
            Arc::new(NoopPublisher),
            2,
            1,
        );

        let transcription =
            make_job(&store, JobKind::Transcription, JobPayload::default()).await;
        let summary = make_job(
            &store,
            JobKind::Summary,
            JobPayload {
                input: "Summarize this transcript".to_string(),
                parent_id: Some(transcription.id),
                variant: Some("bullet_points".to_string()),
                ..Default::default()
            },
        )
        .await;

        queue.enqueue(summary.id);
        wait_terminal(&store, &[summary.id]).await;

        let summaries = store.list_summaries(transcription.id).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].variant, "bullet_points");
        assert_eq!(summaries[0].text, "generated text");
    }

    #[tokio::test]
    async fn test_chat_appends_assistant_turn() {
        let store = Arc::new(MemoryJobStore::new());
        let llm = Arc::new(BlockingLlm::new());
        llm.release(8);
        let queue = TaskQueue::new(
            store.clone(),
            llm.clone(),
            Arc::new(NoopPublisher),
            2,
            1,
        );

        let transcription =
            make_job(&store, JobKind::Transcription, JobPayload::default()).await;
        let chat = make_job(
            &store,
            JobKind::Chat,
            JobPayload {
                input: "What was the main topic?".to_string(),
                parent_id: Some(transcription.id),
                ..Default::default()
            },
        )
        .await;

        queue.enqueue(chat.id);
        wait_terminal(&store, &[chat.id]).await;

        let turns = store.list_chat_turns(transcription.id).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, "assistant");
    }

    #[tokio::test]
    async fn test_failed_call_marks_job_and_skips_usage() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = TaskQueue::new(
            store.clone(),
            Arc::new(FailingLlm),
            Arc::new(NoopPublisher),
            2,
            1,
        );

        let job = make_job(
            &store,
            JobKind::ContentGeneration,
            JobPayload {
                input: "Write a newsletter".to_string(),
                ..Default::default()
            },
        )
        .await;
        queue.enqueue(job.id);
        wait_terminal(&store, &[job.id]).await;

        let failed = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("model overloaded"));
        assert!(failed.result.is_none());
        assert_eq!(failed.progress, 0);

        let content = store.get_content_record(job.id).await.unwrap().unwrap();
        assert_eq!(content.status, "failed");

        assert_eq!(store.usage_spent("owner-1").await.unwrap(), 0);
    }
}
