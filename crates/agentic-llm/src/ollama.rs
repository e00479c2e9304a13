//! Ollama `/api/chat` client.

use agentic_types::{ChatMessage, ChatResponse, ToolCall, ToolSchema};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::{ClientOptions, LlmClient, LlmError, Result, error_message};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaClient {
    options: ClientOptions,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(options: ClientOptions) -> Result<Self> {
        let client = options.http_client()?;
        Ok(Self { options, client })
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSchema]) -> Value {
        let mut body = json!({
            "model": self.options.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": self.options.temperature,
                "num_predict": self.options.max_tokens,
            },
        });
        if !tools.is_empty() {
            body["tools"] = tools.iter().map(ToolSchema::to_function_json).collect();
        }
        body
    }
}

/// Decode a non-streaming `/api/chat` response.
pub(crate) fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let message = body
        .get("message")
        .ok_or_else(|| LlmError::InvalidResponse("missing `message`".to_string()))?;
    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        for call in calls {
            let function = call
                .get("function")
                .ok_or_else(|| LlmError::InvalidResponse("tool call without `function`".into()))?;
            let name = function
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| LlmError::InvalidResponse("tool call without name".into()))?;
            tool_calls.push(ToolCall {
                name: name.to_string(),
                arguments: function.get("arguments").cloned().unwrap_or(json!({})),
            });
        }
    }

    Ok(ChatResponse {
        content,
        tool_calls,
    })
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn provider(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.options.model
    }

    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSchema]) -> Result<ChatResponse> {
        debug!(model = %self.options.model, messages = messages.len(), tools = tools.len(), "Ollama chat");
        let resp = self
            .client
            .post(self.options.endpoint("/api/chat"))
            .json(&self.request_body(messages, tools))
            .send()
            .await?;

        let status = resp.status();
        let body: Value = resp.json().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                provider: "ollama",
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        parse_chat_response(&body)
    }

    async fn available_models(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(self.options.endpoint("/api/tags"))
            .send()
            .await?;
        let status = resp.status();
        let body: Value = resp.json().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                provider: "ollama",
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(body
            .get("models")
            .and_then(|m| m.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}
