use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// ──────────────────── Chat Types ────────────────────

/// Author of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Tool calls requested by the assistant in this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Name of the tool whose result this message carries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_name.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// A tool call as returned by the model, before validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Non-streaming model response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

// ──────────────────── Tool Types ────────────────────

/// Description of a tool offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool arguments.
    pub parameters: Value,
}

impl ToolSchema {
    /// Render in the `{"type": "function", ...}` shape both Ollama and
    /// OpenAI-compatible endpoints accept.
    pub fn to_function_json(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Result of dispatching one tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Tool name.
    pub tool: String,
    pub success: bool,
    /// Tool output on success, error text on failure.
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_serde() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hello"}"#);

        let parsed: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.role, Role::User);
        assert!(parsed.tool_calls.is_empty());
        assert!(parsed.tool_call_id.is_none());
    }

    #[test]
    fn test_tool_message_carries_tool_name() {
        let msg = ChatMessage::tool("shell", "Result: ok");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "shell");
    }

    #[test]
    fn test_tool_call_missing_arguments_defaults_to_null() {
        let call: ToolCall = serde_json::from_str(r#"{"name":"scheduler"}"#).unwrap();
        assert_eq!(call.name, "scheduler");
        assert!(call.arguments.is_null());
    }

    #[test]
    fn test_tool_schema_function_shape() {
        let schema = ToolSchema {
            name: "shell".into(),
            description: "Run a command".into(),
            parameters: json!({"type": "object"}),
        };
        let value = schema.to_function_json();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "shell");
        assert_eq!(value["function"]["parameters"]["type"], "object");
    }
}
