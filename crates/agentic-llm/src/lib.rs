//! agentic-llm: Chat clients for the supported model backends.

pub mod ollama;
pub mod openai;

use std::time::Duration;

use agentic_config::LlmConfig;
use agentic_types::{ChatMessage, ChatResponse, ToolSchema};
use async_trait::async_trait;
use thiserror::Error;

pub use ollama::OllamaClient;
pub use openai::OpenAiCompatClient;

/// Request timeout for a single chat call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Base URL used for `opencode` when the configured URL belongs to another
/// provider.
pub const OPENCODE_BASE_URL: &str = "https://opencode.ai";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{provider} returned {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;

/// A chat-completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider identifier.
    fn provider(&self) -> &str;
    fn model(&self) -> &str;

    /// One non-streaming chat round, optionally offering tools.
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSchema]) -> Result<ChatResponse>;

    /// Model names the backend can serve.
    async fn available_models(&self) -> Result<Vec<String>>;
}

/// Sampling settings shared by every backend.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_key: Option<String>,
}

impl ClientOptions {
    fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Build a client for `provider`, using `model` and the sampling settings
/// from `config`.
///
/// The configured `base_url` only applies when `provider` matches the
/// configured provider. Otherwise the provider's own default is used.
pub fn client_for(provider: &str, config: &LlmConfig, model: &str) -> Result<Box<dyn LlmClient>> {
    let same_provider = provider == config.provider;
    let base_url = |fallback: &str| {
        if same_provider {
            config.base_url.clone()
        } else {
            fallback.to_string()
        }
    };

    match provider {
        "ollama" => Ok(Box::new(OllamaClient::new(ClientOptions {
            base_url: base_url(ollama::DEFAULT_BASE_URL),
            model: model.to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key: None,
        })?)),
        "opencode" => Ok(Box::new(OpenAiCompatClient::new(ClientOptions {
            base_url: base_url(OPENCODE_BASE_URL),
            model: model.to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key: config.api_key.clone(),
        })?)),
        other => Err(LlmError::UnknownProvider(other.to_string())),
    }
}

/// Pull a human-readable error message out of an error body.
fn error_message(body: &serde_json::Value) -> String {
    body.get("error")
        .map(|e| match e {
            serde_json::Value::String(s) => s.clone(),
            other => other
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        })
        .unwrap_or_else(|| "Unknown error".to_string())
}
