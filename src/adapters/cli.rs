//! CLI adapter - interactive and single-message command line interface.
//!
//! A [`Session`] pairs an agent loop with the conversation it drives; the
//! REPL reads lines, dispatches session commands and runs everything else as
//! an agent turn. Ctrl+C abandons the turn in flight and keeps the session.
//! Replies are rendered as they stream in; flagged shell commands are
//! confirmed through [`ConsoleApproval`].

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::agent::{AgentLoop, AgentObserver, Conversation, LlmClient, LoopState, Response, ToolCallRequest, ToolResult};
use crate::tools::{CommandApproval, ToolRegistry};
use crate::ui;
use crate::Result;

const HELP: &str = "\
  /reset, /clear   start a new conversation (new session id)
  /id              show the session id
  /help            show this help
  /quit, /exit, /q leave";

/// A line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Reset,
    Id,
    Help,
    Quit,
    Empty,
    Unknown(String),
    Message(String),
}

/// Parse one input line.
pub fn parse_command(line: &str) -> Command {
    let input = line.trim();
    if input.is_empty() {
        return Command::Empty;
    }

    if let Some(name) = input.strip_prefix('/') {
        return match name.to_lowercase().as_str() {
            "reset" | "clear" => Command::Reset,
            "id" => Command::Id,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            _ => Command::Unknown(input.to_string()),
        };
    }

    if matches!(input.to_lowercase().as_str(), "exit" | "quit") {
        return Command::Quit;
    }

    Command::Message(input.to_string())
}

/// Spinner, streamed text and tool trace for a terminal.
///
/// Streamed text replaces the spinner; the spinner comes back when the next
/// provider call starts.
pub struct ConsoleObserver {
    spinner: Mutex<Option<ProgressBar>>,
    /// Some text was streamed during the current turn
    streamed: AtomicBool,
    /// The cursor is at the end of streamed text, not at a line start
    mid_line: AtomicBool,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
            streamed: AtomicBool::new(false),
            mid_line: AtomicBool::new(false),
        }
    }

    fn current_spinner(&self) -> Option<ProgressBar> {
        self.spinner.lock().ok().and_then(|guard| guard.clone())
    }

    fn show_spinner(&self, message: String) {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("  {spinner:.magenta} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(message);
        spinner.enable_steady_tick(Duration::from_millis(100));

        if let Ok(mut guard) = self.spinner.lock() {
            if let Some(old) = guard.replace(spinner) {
                old.finish_and_clear();
            }
        }
    }

    fn end_line(&self) {
        if self.mid_line.swap(false, Ordering::SeqCst) {
            println!();
        }
    }

    /// Run `f` with the spinner hidden, on a fresh line.
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.current_spinner() {
            Some(spinner) => spinner.suspend(f),
            None => {
                self.end_line();
                f()
            }
        }
    }

    /// Show the spinner for a new turn.
    pub fn start_turn(&self) {
        self.streamed.store(false, Ordering::SeqCst);
        self.mid_line.store(false, Ordering::SeqCst);
        self.show_spinner("Thinking".to_string());
    }

    /// Clear the spinner. Safe to call when none is shown.
    pub fn finish(&self) {
        if let Ok(mut guard) = self.spinner.lock() {
            if let Some(spinner) = guard.take() {
                spinner.finish_and_clear();
            }
        }
    }

    /// Print the final reply unless it was already streamed.
    pub fn render_response(&self, response: &Response) {
        if self.streamed.load(Ordering::SeqCst) {
            self.end_line();
            println!();
        } else {
            ui::print_response(&response.content);
        }
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentObserver for ConsoleObserver {
    fn on_state(&self, state: &LoopState) {
        match state {
            LoopState::CallingProvider { iteration } if *iteration > 1 => {
                let message = format!("Thinking (step {})", iteration);
                match self.current_spinner() {
                    Some(spinner) => spinner.set_message(message),
                    None => {
                        self.end_line();
                        self.show_spinner(message);
                    }
                }
            }
            LoopState::ExecutingTools { count } => {
                if let Some(spinner) = self.current_spinner() {
                    spinner.set_message(format!("Running {} tool(s)", count));
                }
            }
            LoopState::Done | LoopState::Failed => self.finish(),
            _ => {}
        }
    }

    fn on_text(&self, chunk: &str) {
        if !self.streamed.swap(true, Ordering::SeqCst) || self.current_spinner().is_some() {
            self.finish();
            println!();
        }
        ui::print_stream_chunk(chunk);
        self.mid_line.store(!chunk.ends_with('\n'), Ordering::SeqCst);
    }

    fn on_tool_start(&self, call: &ToolCallRequest) {
        let arguments = call.arguments.to_string();
        self.suspend(|| ui::print_tool_call(&call.name, &arguments, false));
    }

    fn on_tool_end(&self, result: &ToolResult) {
        if result.is_error {
            let message = result.content.to_text();
            self.suspend(|| ui::print_tool_call(&result.name, &message, true));
        }
    }
}

/// Asks on the terminal before a flagged command runs.
pub struct ConsoleApproval {
    observer: Arc<ConsoleObserver>,
}

impl ConsoleApproval {
    pub fn new(observer: Arc<ConsoleObserver>) -> Self {
        Self { observer }
    }
}

impl CommandApproval for ConsoleApproval {
    fn approve(&self, command: &str, reason: &str) -> bool {
        self.observer.suspend(|| {
            ui::print_dangerous_command(command, reason);
            Confirm::new("Execute this command?")
                .with_default(false)
                .prompt()
                .unwrap_or(false)
        })
    }
}

/// An agent loop and the conversation it drives.
pub struct Session<C: LlmClient> {
    agent: AgentLoop<C>,
    conversation: Conversation,
    observer: Arc<ConsoleObserver>,
}

impl<C: LlmClient> Session<C> {
    pub fn new(
        client: C,
        tools: ToolRegistry,
        max_iterations: usize,
        conversation: Conversation,
        observer: Arc<ConsoleObserver>,
    ) -> Self {
        let agent = AgentLoop::new(client, tools, max_iterations).with_observer(observer.clone());
        Self {
            agent,
            conversation,
            observer,
        }
    }

    /// Run one agent turn.
    pub async fn send(&mut self, input: &str) -> Result<Response> {
        self.agent.run(input, &mut self.conversation).await
    }

    /// Start over with an empty history. Returns the new correlation id.
    pub fn reset(&mut self) -> String {
        self.conversation.reset().to_string()
    }

    pub fn correlation_id(&self) -> &str {
        self.conversation.correlation_id()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn agent(&self) -> &AgentLoop<C> {
        &self.agent
    }

    pub fn observer(&self) -> &ConsoleObserver {
        &self.observer
    }

    /// Run a single message with the spinner shown.
    pub async fn run_once(&mut self, message: &str) -> Result<Response> {
        self.observer.start_turn();
        let result = self.send(message).await;
        self.observer.finish();
        result
    }

    /// Run interactive REPL loop until `/quit`, EOF or Ctrl+C at the prompt.
    pub async fn run_interactive(&mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            print!("\n{} ", ">".cyan().bold());
            std::io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            };
            let Some(line) = line else {
                // EOF
                break;
            };

            match parse_command(&line) {
                Command::Empty => continue,
                Command::Quit => break,
                Command::Help => println!("{}", HELP),
                Command::Id => ui::print_step(&format!("Session id: {}", self.correlation_id())),
                Command::Reset => {
                    let id = self.reset();
                    ui::print_success(&format!("Conversation cleared. New session id: {}", id));
                }
                Command::Unknown(command) => {
                    ui::print_warning(&format!("Unknown command {}. Type /help for commands.", command));
                }
                Command::Message(text) => {
                    self.observer.start_turn();
                    let outcome = tokio::select! {
                        result = self.send(&text) => Some(result),
                        _ = tokio::signal::ctrl_c() => None,
                    };
                    self.observer.finish();
                    if !matches!(outcome, Some(Ok(_))) {
                        self.observer.end_line();
                    }

                    match outcome {
                        Some(Ok(response)) => self.observer.render_response(&response),
                        Some(Err(e)) => ui::print_error(e.kind(), &e.to_string()),
                        None => ui::print_warning("Interrupted. The turn was abandoned."),
                    }
                }
            }
        }

        println!("Goodbye! 👋");
        Ok(())
    }
}
