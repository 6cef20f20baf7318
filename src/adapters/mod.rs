//! Adapters module - front ends that drive an agent session.
//!
//! - **CLI** - single-shot prompts and the interactive REPL

pub mod cli;

pub use cli::{parse_command, Command, ConsoleApproval, ConsoleObserver, Session};
