//! Agent loop - core message processing

use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::Result;
use crate::error::Error;
use crate::tools::ToolRegistry;
use super::conversation::Conversation;
use super::llm::{LlmClient, Turn};
use super::message::{Message, Response, ToolCallRequest, ToolResult};

/// Where a turn currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    AwaitingUser,
    CallingProvider { iteration: usize },
    ExecutingTools { count: usize },
    Done,
    Failed,
}

/// Hooks for surfacing loop progress, e.g. to a terminal UI.
pub trait AgentObserver: Send + Sync {
    fn on_state(&self, _state: &LoopState) {}
    /// Assistant text as it streams in, before the turn is parsed
    fn on_text(&self, _chunk: &str) {}
    fn on_tool_start(&self, _call: &ToolCallRequest) {}
    fn on_tool_end(&self, _result: &ToolResult) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl AgentObserver for NoopObserver {}

/// The agent loop alternates between provider calls and tool execution
/// until the model answers in plain text or the iteration limit is hit.
pub struct AgentLoop<C: LlmClient> {
    client: C,
    tools: ToolRegistry,
    max_iterations: usize,
    observer: Arc<dyn AgentObserver>,
}

impl<C: LlmClient> AgentLoop<C> {
    /// Create a new agent loop. `max_iterations` is at least one.
    pub fn new(client: C, tools: ToolRegistry, max_iterations: usize) -> Self {
        Self {
            client,
            tools,
            max_iterations: max_iterations.max(1),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AgentObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn transition(&self, state: LoopState) {
        debug!("Agent state: {:?}", state);
        self.observer.on_state(&state);
    }

    /// Run one user turn against `conversation`.
    ///
    /// Every tool-calling pass is committed to the conversation as a whole:
    /// the assistant message and all of its tool results, or nothing. A
    /// dropped future therefore never leaves a call without its result.
    pub async fn run(&self, input: &str, conversation: &mut Conversation) -> Result<Response> {
        let outcome = self.run_turn(input, conversation).await;
        self.transition(LoopState::AwaitingUser);
        outcome
    }

    async fn run_turn(&self, input: &str, conversation: &mut Conversation) -> Result<Response> {
        conversation.append(Message::user(input));
        let definitions = self.tools.definitions();
        let mut tool_calls_made = 0;

        info!(
            "Starting agent turn (correlation id {}, {} messages)",
            conversation.correlation_id(),
            conversation.len()
        );

        for iteration in 1..=self.max_iterations {
            self.transition(LoopState::CallingProvider { iteration });

            let on_text = |chunk: &str| self.observer.on_text(chunk);
            let response = match self
                .client
                .complete_streaming(conversation, &definitions, &on_text)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("Provider call failed on iteration {}: {}", iteration, e);
                    self.transition(LoopState::Failed);
                    return Err(e);
                }
            };

            match response.turn {
                Turn::Text(content) => {
                    conversation.append(Message::assistant(content.clone()));
                    self.transition(LoopState::Done);
                    info!(
                        "Agent completed after {} iterations with response: {} chars",
                        iteration,
                        content.len()
                    );
                    return Ok(Response {
                        content,
                        iterations: iteration,
                        tool_calls: tool_calls_made,
                    });
                }
                Turn::ToolCalls { text, calls } => {
                    self.transition(LoopState::ExecutingTools { count: calls.len() });

                    let mut batch = Vec::with_capacity(calls.len() + 1);
                    batch.push(Message::assistant_with_tools(text, calls.clone()));
                    for call in &calls {
                        batch.push(Message::tool_result(&self.execute_tool(call).await));
                    }

                    tool_calls_made += calls.len();
                    conversation.extend(batch);
                }
            }
        }

        self.transition(LoopState::Failed);
        Err(Error::IterationLimitExceeded {
            limit: self.max_iterations,
        })
    }

    async fn execute_tool(&self, call: &ToolCallRequest) -> ToolResult {
        debug!("Executing tool: {} with args: {}", call.name, call.arguments);
        self.observer.on_tool_start(call);

        let result = self.tools.invoke(call).await;
        if result.is_error {
            debug!("Tool {} failed: {}", call.name, result.content.to_text());
        } else {
            debug!("Tool {} succeeded", call.name);
        }

        self.observer.on_tool_end(&result);
        result
    }
}
