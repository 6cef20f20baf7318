//! Message types for agent communication

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Message or tool-result payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Structured(Value),
}

impl Content {
    /// Render as text; structured payloads become pretty-printed JSON.
    pub fn to_text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<Value> for Content {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Content::Text(text),
            other => Content::Structured(other),
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    /// Tool calls made by assistant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Tool call ID (for tool responses)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool name (for tool responses)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: Option<Content>) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, Some(Content::Text(content.into())))
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, Some(Content::Text(content.into())))
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, Some(Content::Text(content.into())))
    }

    /// Create an assistant message recording requested tool calls
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, content.filter(|c| !c.is_empty()).map(Content::Text))
        }
    }

    /// Create a tool result message
    pub fn tool_result(result: &ToolResult) -> Self {
        Self {
            tool_call_id: Some(result.tool_call_id.clone()),
            name: Some(result.name.clone()),
            ..Self::with_role(Role::Tool, Some(result.content.clone()))
        }
    }

    /// Text content, empty if none.
    pub fn text(&self) -> String {
        self.content.as_ref().map(Content::to_text).unwrap_or_default()
    }
}

/// A tool call request from the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: Content,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call: &ToolCallRequest, content: Content) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content,
            is_error: false,
        }
    }

    /// Error result carrying a human-readable message for the model
    pub fn error(call: &ToolCallRequest, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content: Content::Structured(serde_json::json!({ "error": message.into() })),
            is_error: true,
        }
    }
}

/// Final reply of one agent turn
#[derive(Debug, Clone)]
pub struct Response {
    pub content: String,
    /// Provider calls made during the turn
    pub iterations: usize,
    /// Tool invocations made during the turn
    pub tool_calls: usize,
}
