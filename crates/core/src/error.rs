//! Error types for the RemoteMedia session core

use thiserror::Error;

/// Result type alias for session core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the session core
#[derive(Debug, Error)]
pub enum Error {
    /// A caller broke a protocol rule (bad request order, missing identity).
    /// Reported synchronously and never retried.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// An asynchronous operation against the remote graph failed
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// Invalid argument passed to an operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Lookup of a named object or component failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for [`Error::OperationFailed`]
    pub fn operation_failed(msg: impl Into<String>) -> Self {
        Error::OperationFailed(msg.into())
    }

    /// Shorthand for [`Error::InvariantViolation`]
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolation(msg.into())
    }

    /// Process exit code conventionally associated with this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) | Error::ConfigError(_) | Error::Parse(_) => 3,
            _ => 2,
        }
    }
}
