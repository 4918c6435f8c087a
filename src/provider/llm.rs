//! LLM provider client.
//!
//! Short synchronous request/response calls to a chat-completion API, used
//! by the concurrency-bounded task queue. The call runs to completion inside
//! its worker routine; there is no webhook on this path.

use crate::error::{DirigentError, Result};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default timeout for LLM API requests (5 minutes).
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Create an OpenAI client with a configured timeout.
///
/// A stuck call occupies one concurrency slot until it errors or returns, so
/// the underlying HTTP timeout is the only bound on slot occupancy.
pub fn create_client() -> Client<OpenAIConfig> {
    create_client_with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
}

/// Create an OpenAI client with a custom timeout.
pub fn create_client_with_timeout(timeout: Duration) -> Client<OpenAIConfig> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("Failed to create HTTP client");

    Client::with_config(OpenAIConfig::default()).with_http_client(http_client)
}

/// Trait for LLM provider implementations.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one chat completion and return the generated text.
    async fn call(&self, prompt: &str, system: &str) -> Result<String>;
}

/// OpenAI-based LLM provider.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiProvider {
    /// Create a provider with default settings.
    pub fn new() -> Self {
        Self::with_model("gpt-4o-mini")
    }

    /// Create a provider for a specific model.
    pub fn with_model(model: &str) -> Self {
        Self {
            client: create_client(),
            model: model.to_string(),
        }
    }

    /// Create a provider for a specific model with a custom request timeout.
    pub fn with_model_and_timeout(model: &str, timeout: Duration) -> Self {
        Self {
            client: create_client_with_timeout(timeout),
            model: model.to_string(),
        }
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    #[instrument(skip(self, prompt, system), fields(prompt_len = prompt.len()))]
    async fn call(&self, prompt: &str, system: &str) -> Result<String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system.to_string())
                .build()
                .map_err(|e| DirigentError::Provider(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.to_string())
                .build()
                .map_err(|e| DirigentError::Provider(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.7)
            .build()
            .map_err(|e| DirigentError::Provider(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| DirigentError::OpenAI(format!("Chat completion failed: {}", e)))?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| DirigentError::OpenAI("Empty response from LLM".to_string()))?
            .clone();

        debug!("LLM call returned {} characters", text.len());
        Ok(text)
    }
}
