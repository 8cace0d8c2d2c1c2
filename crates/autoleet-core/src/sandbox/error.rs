//! Error types for the sandbox module.

use std::path::PathBuf;

use crate::error::AutoleetError;

/// Errors produced by the sandbox layer.
///
/// A script that fails, times out or is rejected is not an error here; those
/// come back as an unsuccessful [`super::ExecutionResult`].
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("interpreter `{interpreter}` not found")]
    InterpreterNotFound { interpreter: String },

    #[error("cannot read script {}: {source}", path.display())]
    ReadScript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot prepare sandbox: {0}")]
    Setup(#[source] std::io::Error),

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

impl From<SandboxError> for AutoleetError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::InterpreterNotFound { interpreter } => {
                AutoleetError::InterpreterNotFound { interpreter }
            }
            SandboxError::InvalidConfig(msg) => AutoleetError::Configuration(msg),
            other => AutoleetError::CodeExecution(other.to_string()),
        }
    }
}
