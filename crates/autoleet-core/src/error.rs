//! Error taxonomy for AutoLeet.
//!
//! Errors split into two groups. Artifact-level errors (validation, execution,
//! file handling, provider) are caught at the pipeline boundary and logged so
//! the watcher keeps running. Fatal errors (configuration, missing source
//! directory, missing interpreter, watch back-end failure) terminate the
//! process. [`AutoleetError::is_fatal`] is the single source of that split.

use std::path::PathBuf;

/// Reasons a candidate script is rejected before execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("syntax error at line {line}, column {column}: {snippet}")]
    Syntax {
        line: usize,
        column: usize,
        snippet: String,
    },

    #[error("unsafe code: {0}")]
    Unsafe(String),

    #[error("parser unavailable: {0}")]
    Parser(String),
}

/// Failures reported by a code generation back-end.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} request failed: {message}")]
    Http { provider: String, message: String },

    #[error("{provider} returned status {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} returned an empty response")]
    EmptyResponse { provider: String },

    #[error("{provider} response could not be decoded: {message}")]
    Decode { provider: String, message: String },
}

/// AutoLeet errors.
#[derive(Debug, thiserror::Error)]
pub enum AutoleetError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("source directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("interpreter not found: {interpreter}")]
    InterpreterNotFound { interpreter: String },

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("code execution error: {0}")]
    CodeExecution(String),

    #[error("file handling error: {0}")]
    FileHandling(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("watch error: {0}")]
    Watch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AutoleetError {
    /// Whether this error must stop the whole process rather than a single job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AutoleetError::Configuration(_)
                | AutoleetError::DirectoryNotFound(_)
                | AutoleetError::InterpreterNotFound { .. }
                | AutoleetError::Watch(_)
        )
    }
}

impl From<notify::Error> for AutoleetError {
    fn from(err: notify::Error) -> Self {
        AutoleetError::Watch(err.to_string())
    }
}

/// Result type for AutoLeet operations.
pub type Result<T> = std::result::Result<T, AutoleetError>;
