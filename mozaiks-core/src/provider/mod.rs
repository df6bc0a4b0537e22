//! LLM provider contract.
//!
//! The runtime treats the model provider as an external collaborator
//! behind [`ModelProvider`]. Transient failures are retried with
//! exponential backoff; permanent failures surface to the orchestrator
//! as `LLM_ERROR`.

mod http;
mod retry;

pub use http::HttpProvider;
pub use retry::{backoff_delay, retry_with_backoff, RetryConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Per-agent LLM selection carried by workflow bundles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProfile {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for LlmProfile {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One conversation turn sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Tool,
            content: content.into(),
        }
    }
}

/// Tool surface advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Request for one model call.
///
/// When `delta_sink` is set, stream-capable providers push text chunks
/// into it as they arrive; the full content is still returned.
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatTurn>,
    pub tools: Vec<ProviderToolSpec>,
    /// JSON schema constraining the response body (structured output).
    pub response_format: Option<Value>,
    pub delta_sink: Option<UnboundedSender<String>>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, messages: Vec<ChatTurn>) -> Self {
        Self {
            system: system.into(),
            messages,
            tools: Vec::new(),
            response_format: None,
            delta_sink: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_call: Option<ProviderToolCall>,
    pub usage: Option<TokenUsage>,
}

/// Errors from a model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    /// Transient errors are retried; permanent ones fail the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Network(_) | Self::ServiceUnavailable(_)
        )
    }
}

/// The model provider contract consumed by the orchestrator.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(
        &self,
        profile: &LlmProfile,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;
}
