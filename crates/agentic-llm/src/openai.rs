//! OpenAI-compatible `/chat/completions` client (used for `opencode`).

use agentic_types::{ChatMessage, ChatResponse, ToolCall, ToolSchema};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::{ClientOptions, LlmClient, LlmError, Result, error_message};

pub struct OpenAiCompatClient {
    options: ClientOptions,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(options: ClientOptions) -> Result<Self> {
        let client = options.http_client()?;
        Ok(Self { options, client })
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSchema]) -> Value {
        let mut body = json!({
            "model": self.options.model,
            "messages": messages,
            "temperature": self.options.temperature,
            "max_tokens": self.options.max_tokens,
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = tools.iter().map(ToolSchema::to_function_json).collect();
        }
        body
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.options.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let resp = self.authorize(request).send().await?;
        let status = resp.status();
        let body: Value = resp.json().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                provider: "opencode",
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(body)
    }
}

/// Decode a `/chat/completions` response, taking the first choice.
pub(crate) fn parse_completion(body: &Value) -> Result<ChatResponse> {
    let message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| LlmError::InvalidResponse("no choices in completion".to_string()))?;
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
            // Arguments arrive as a JSON-encoded string on most servers.
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
                Some(Value::String(raw)) => serde_json::from_str(raw).map_err(|e| {
                    LlmError::InvalidResponse(format!("tool `{name}` arguments: {e}"))
                })?,
                Some(other) => other.clone(),
                None => json!({}),
            };
            tool_calls.push(ToolCall {
                name: name.to_string(),
                arguments,
            });
        }
    }

    Ok(ChatResponse {
        content,
        tool_calls,
    })
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn provider(&self) -> &str {
        "opencode"
    }

    fn model(&self) -> &str {
        &self.options.model
    }

    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSchema]) -> Result<ChatResponse> {
        debug!(model = %self.options.model, messages = messages.len(), tools = tools.len(), "Chat completion");
        let request = self
            .client
            .post(self.options.endpoint("/chat/completions"))
            .json(&self.request_body(messages, tools));
        let body = self.send_json(request).await?;
        parse_completion(&body)
    }

    async fn available_models(&self) -> Result<Vec<String>> {
        let request = self.client.get(self.options.endpoint("/api/models"));
        let body = self.send_json(request).await?;
        let list = body
            .get("models")
            .or_else(|| body.get("data"))
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(list
            .iter()
            .filter_map(|m| m.get("name").or_else(|| m.get("id")).and_then(|n| n.as_str()))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_text() {
        let body = json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi"}}]
        });
        let resp = parse_completion(&body).unwrap();
        assert_eq!(resp.content, "Hi");
        assert!(resp.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_completion_string_arguments() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "scheduler",
                            "arguments": "{\"action\":\"list\"}"
                        }
                    }]
                }
            }]
        });
        let resp = parse_completion(&body).unwrap();
        assert_eq!(resp.content, "");
        assert_eq!(resp.tool_calls[0].name, "scheduler");
        assert_eq!(resp.tool_calls[0].arguments, json!({"action": "list"}));
    }

    #[test]
    fn test_parse_completion_bad_arguments() {
        let body = json!({
            "choices": [{"message": {"tool_calls": [
                {"function": {"name": "shell", "arguments": "{not json"}}
            ]}}]
        });
        assert!(matches!(
            parse_completion(&body),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_completion_without_choices() {
        assert!(matches!(
            parse_completion(&json!({"choices": []})),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let client = OpenAiCompatClient::new(ClientOptions {
            base_url: "https://opencode.ai".into(),
            model: "big-pickle".into(),
            temperature: 0.2,
            max_tokens: 512,
            api_key: Some("k".into()),
        })
        .unwrap();
        let body = client.request_body(&[ChatMessage::system("be brief")], &[]);
        assert_eq!(body["model"], "big-pickle");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "system");
    }
}
