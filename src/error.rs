//! Error types for the Nexa agent runtime.

use crate::settings::ServerType;
use std::time::Duration;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Failed to encode value for key '{key}': {message}")]
    Encode { key: String, message: String },

    #[error("Failed to decode value for key '{key}': {message}")]
    Decode { key: String, message: String },

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Expected failures on the message-processing path.
///
/// These are surfaced to the UI as error messages and never stop the work queue.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid settings: {0}")]
    Validation(String),

    #[error("Provider unreachable: {0}")]
    Connectivity(String),

    #[error("Provider request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Model not available on provider: {0}")]
    ModelNotFound(String),

    #[error("No models available on {server_type} server")]
    NoModelsAvailable { server_type: ServerType },

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Agent runtime is shut down")]
    Shutdown,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AgentError {
    /// Failures that mean the active settings no longer describe the server.
    pub fn is_validation_class(&self) -> bool {
        matches!(
            self,
            AgentError::Validation(_)
                | AgentError::ModelNotFound(_)
                | AgentError::NoModelsAvailable { .. }
        )
    }

    /// Failures that mean the configured model is gone from the server.
    pub fn needs_revalidation(&self) -> bool {
        matches!(
            self,
            AgentError::ModelNotFound(_) | AgentError::NoModelsAvailable { .. }
        )
    }

    /// Short machine-readable kind, used in logs and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "validation",
            AgentError::Connectivity(_) => "connectivity",
            AgentError::Timeout(_) => "timeout",
            AgentError::MalformedResponse(_) => "malformed_response",
            AgentError::Http { .. } => "http",
            AgentError::ModelNotFound(_) => "model_not_found",
            AgentError::NoModelsAvailable { .. } => "no_models",
            AgentError::EmptyMessage => "empty_message",
            AgentError::Shutdown => "shutdown",
            AgentError::Storage(_) => "storage",
        }
    }
}

/// Fatal setup faults: configuration, logging, client and storage construction.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Logging error: {0}")]
    LoggingError(String),

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl From<config::ConfigError> for RuntimeError {
    fn from(err: config::ConfigError) -> Self {
        RuntimeError::ConfigError(err.to_string())
    }
}
