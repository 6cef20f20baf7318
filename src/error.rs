//! Error types for auto-coder

use thiserror::Error;

/// Result type alias for auto-coder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the assistant
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential or token acquisition failed. Fatal to the current turn.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Network failure, non-2xx status, timeout or malformed response.
    #[error("Provider error: {0}")]
    Provider(String),

    /// A single tool invocation failed. The agent loop turns these into
    /// `tool` messages instead of surfacing them.
    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Iteration limit exceeded: gave up after {limit} tool iterations without a final answer")]
    IterationLimitExceeded { limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Short name of the error kind, for display next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::Auth(_) => "AuthenticationError",
            Error::Provider(_) => "ProviderError",
            Error::Tool(_) => "ToolExecutionError",
            Error::IterationLimitExceeded { .. } => "IterationLimitExceeded",
            Error::Io(_) => "IoError",
            Error::Json(_) => "JsonError",
            Error::Yaml(_) => "YamlError",
        }
    }
}
