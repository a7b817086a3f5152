//! Error types for the prompt engine.

use thiserror::Error;

/// Result type alias for prompt engine operations.
pub type Result<T> = std::result::Result<T, PromptError>;

/// Errors that can occur while assembling prompts or evaluating responses.
///
/// Most of these never escape the public pipelines: handlers catch them at
/// their boundary, log them and degrade to a no-op or placeholder text.
#[derive(Debug, Error)]
pub enum PromptError {
    /// Agent configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An external collaborator (workspace, wiki, tool, protocol server) failed.
    #[error("Service error: {0}")]
    Service(String),

    /// Error from the language model backend.
    #[error("Backend error: {0}")]
    Backend(String),

    /// An external call exceeded its time budget.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A content URI could not be resolved.
    #[error("URI error: {0}")]
    Uri(String),

    /// HTTP/network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A parameter schema could not be applied.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for PromptError {
    fn from(e: reqwest::Error) -> Self {
        PromptError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(e: serde_json::Error) -> Self {
        PromptError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for PromptError {
    fn from(e: std::io::Error) -> Self {
        PromptError::Io(e.to_string())
    }
}
