//! External provider collaborators.
//!
//! The orchestration core treats its compute back ends as opaque
//! request/response/webhook endpoints behind traits, so tests can substitute
//! fakes and the dispatch policy stays independent of any concrete vendor.

mod compute;
mod llm;
mod upload;

pub use compute::{ComputeProvider, HttpComputeProvider, SubmitRequest, WorkerCounts};
pub use llm::{create_client, LlmProvider, OpenAiProvider};
pub use upload::{HttpMediaUploader, MediaUploader};
