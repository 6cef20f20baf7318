//! auto-coder - a conversational coding assistant for OpenAI-compatible endpoints
//!
//! This library provides the agent loop, the tool registry it drives, and
//! the credential resolvers that authenticate each provider request.

pub mod agent;
pub mod tools;
pub mod adapters;
pub mod auth;
pub mod config;
pub mod error;
pub mod ui;

pub use error::{Error, Result};
