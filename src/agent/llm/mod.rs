//! LLM client abstraction layer.
//!
//! This module provides:
//! - [`LlmClient`] trait for swappable LLM providers
//! - [`Turn`], the tagged result of one completion: text or tool calls
//! - [`OpenAiCompatibleClient`] for any OpenAI-compatible chat completion endpoint
//! - [`StreamAccumulator`] for streamed (SSE) completions

mod stream;
mod types;

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

pub use openai::OpenAiCompatibleClient;
pub use stream::StreamAccumulator;
pub use types::*;

use super::conversation::Conversation;
use super::message::ToolCallRequest;

/// One provider response.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    /// Final assistant text; ends the agent turn
    Text(String),
    /// The model wants tools run; optional text may accompany the calls
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
}

impl Turn {
    /// Build a turn from raw response parts.
    ///
    /// A response with neither text nor tool calls is malformed.
    pub fn from_parts(text: Option<String>, calls: Vec<ToolCallRequest>) -> Result<Self> {
        let text = text.filter(|t| !t.trim().is_empty());
        match (text, calls.is_empty()) {
            (text, false) => Ok(Turn::ToolCalls { text, calls }),
            (Some(text), true) => Ok(Turn::Text(text)),
            (None, true) => Err(Error::Provider(
                "Malformed response: no assistant text and no tool calls".to_string(),
            )),
        }
    }

    /// Tool calls requested by this turn, empty for text turns.
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Turn::Text(_) => &[],
            Turn::ToolCalls { calls, .. } => calls,
        }
    }
}

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub turn: Turn,

    /// Reason the response finished.
    pub finish_reason: String,

    /// Token usage statistics.
    pub usage: Usage,
}

impl LlmResponse {
    /// Create a simple text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            turn: Turn::Text(content.into()),
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    /// Create a response requesting tool calls.
    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            turn: Turn::ToolCalls { text: None, calls },
            finish_reason: "tool_calls".to_string(),
            usage: Usage::default(),
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// LLM client trait - swappable provider abstraction.
///
/// One call is one request/response cycle. Implementations attach the
/// conversation's correlation id and credentials; they never retry.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send the conversation and tool declarations, get the next turn.
    async fn complete(
        &self,
        conversation: &Conversation,
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse>;

    /// Like [`complete`](Self::complete), passing assistant text to `on_text`
    /// as it arrives. Clients that cannot stream deliver nothing early.
    async fn complete_streaming(
        &self,
        conversation: &Conversation,
        tools: &[ToolDefinition],
        _on_text: &(dyn for<'s> Fn(&'s str) + Send + Sync),
    ) -> Result<LlmResponse> {
        self.complete(conversation, tools).await
    }

    /// Model this client talks to.
    fn model(&self) -> &str;
}

/// What a [`FakeLlmClient`] saw on one call.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub message_count: usize,
    pub correlation_id: String,
    pub tool_names: Vec<String>,
}

/// Scripted LLM client for testing.
#[cfg(test)]
pub struct FakeLlmClient {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<LlmResponse>>>,
    /// Returned, with fresh call ids, once the script runs out
    repeat: Option<LlmResponse>,
    seen: std::sync::Mutex<Vec<SeenRequest>>,
}

#[cfg(test)]
impl FakeLlmClient {
    fn scripted(responses: Vec<Result<LlmResponse>>, repeat: Option<LlmResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
            repeat,
            seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Create with predefined text responses.
    pub fn new(responses: Vec<&str>) -> Self {
        Self::scripted(responses.into_iter().map(|s| Ok(LlmResponse::text(s))).collect(), None)
    }

    /// Create with a single tool call followed by a text response.
    pub fn with_tool_call(name: &str, args: serde_json::Value, final_response: &str) -> Self {
        let call = ToolCallRequest {
            id: "tc_1".to_string(),
            name: name.to_string(),
            arguments: args,
        };
        Self::scripted(
            vec![Ok(LlmResponse::tool_calls(vec![call])), Ok(LlmResponse::text(final_response))],
            None,
        )
    }

    /// Create from an explicit script of responses and errors.
    pub fn from_script(responses: Vec<Result<LlmResponse>>) -> Self {
        Self::scripted(responses, None)
    }

    /// Create a client that requests the same tool call forever.
    pub fn always_tool_call(name: &str, args: serde_json::Value) -> Self {
        let call = ToolCallRequest {
            id: String::new(),
            name: name.to_string(),
            arguments: args,
        };
        Self::scripted(Vec::new(), Some(LlmResponse::tool_calls(vec![call])))
    }

    /// Requests seen so far, in order.
    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn complete(
        &self,
        conversation: &Conversation,
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse> {
        let call_number = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(SeenRequest {
                message_count: conversation.len(),
                correlation_id: conversation.correlation_id().to_string(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            });
            seen.len()
        };

        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            return next;
        }

        match &self.repeat {
            Some(template) => {
                let mut response = template.clone();
                if let Turn::ToolCalls { calls, .. } = &mut response.turn {
                    for (i, call) in calls.iter_mut().enumerate() {
                        call.id = format!("call_{}_{}", call_number, i);
                    }
                }
                Ok(response)
            }
            None => Err(Error::Provider("No more fake responses".to_string())),
        }
    }

    async fn complete_streaming(
        &self,
        conversation: &Conversation,
        tools: &[ToolDefinition],
        on_text: &(dyn for<'s> Fn(&'s str) + Send + Sync),
    ) -> Result<LlmResponse> {
        let response = self.complete(conversation, tools).await?;
        if let Turn::Text(text) = &response.turn {
            for piece in text.split_inclusive(' ') {
                on_text(piece);
            }
        }
        Ok(response)
    }

    fn model(&self) -> &str {
        "fake-model"
    }
}
