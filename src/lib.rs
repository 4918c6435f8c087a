//! Dirigent - Transcription Job Orchestrator
//!
//! The asynchronous job core behind an audio transcription and content
//! repurposing service. Dirigent tracks every unit of work as a durable job
//! record, submits transcription to GPU compute endpoints with health-checked
//! fallback, runs LLM jobs through a concurrency-bounded queue, resolves
//! provider webhooks back to jobs through a correlation store, and streams
//! status updates to owners.
//!
//! The name is the Norwegian word for a conductor.
//!
//! # Architecture
//!
//! - `config` - Configuration management
//! - `job` - Job records, statuses, and the transition rules
//! - `store` - Durable job store (SQLite, plus in-memory for tests)
//! - `provider` - Compute, LLM, and upload collaborators behind traits
//! - `dispatch` - Health-checked fallback submission to compute endpoints
//! - `queue` - Concurrency-bounded FIFO queue for LLM jobs
//! - `ingress` - Webhook resolution for out-of-band completions
//! - `notify` - Per-owner event fanout
//! - `orchestrator` - Submission paths, recovery, and retention
//!
//! # Example
//!
//! ```rust,no_run
//! use dirigent::config::Settings;
//! use dirigent::job::{JobKind, JobPayload};
//! use dirigent::notify::BroadcastHub;
//! use dirigent::orchestrator::Orchestrator;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let hub = Arc::new(BroadcastHub::new());
//!     let orchestrator = Orchestrator::new(settings, hub)?;
//!
//!     let job = orchestrator
//!         .submit_job(
//!             "owner-1",
//!             JobKind::Transcription,
//!             JobPayload {
//!                 input: "https://media.example/episode.mp3".to_string(),
//!                 ..Default::default()
//!             },
//!         )
//!         .await?;
//!     println!("Submitted job {}", job.id);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingress;
pub mod job;
pub mod notify;
pub mod orchestrator;
pub mod provider;
pub mod queue;
pub mod store;

pub use error::{DirigentError, Result};
