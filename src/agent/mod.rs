//! Agent module - core agent logic.
//!
//! This module contains:
//! - Message and conversation types
//! - LLM client trait and the OpenAI-compatible implementation
//! - Agent loop that alternates provider calls and tool execution

mod conversation;
mod loop_impl;
pub mod message;

// LLM providers in submodule
pub mod llm;

// Re-exports for convenience
pub use conversation::{Conversation, DEFAULT_SYSTEM_PROMPT};
pub use llm::{LlmClient, LlmResponse, OpenAiCompatibleClient, Turn, Usage};
pub use loop_impl::{AgentLoop, AgentObserver, LoopState, NoopObserver};
pub use message::{Content, Message, Response, Role, ToolCallRequest, ToolResult};
