//! Error taxonomy for the orchestration core.
//!
//! Errors are recovered as close to their source as possible:
//! - [`ConfigError`] never escapes the config loader; it is logged and the
//!   documented default is used instead.
//! - [`DataError::ReadOnlyViolation`] is fatal to the operation that issued
//!   the statement, never to the process.
//! - [`ExternalServiceError`] is converted into a "not sent" / "unavailable"
//!   result at the call site.
//! - [`AgentError`] is what a run returns; the scheduler logs it and keeps the
//!   job armed.

use thiserror::Error;

/// A malformed configuration value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid boolean for {key}: {value:?}")]
    InvalidBool { key: String, value: String },

    #[error("invalid log level for {key}: {value:?}")]
    InvalidLogLevel { key: String, value: String },

    #[error("invalid capability value for {key}: {value:?}")]
    InvalidCapability { key: String, value: String },
}

/// Errors from the read-only data access path.
#[derive(Debug, Error)]
pub enum DataError {
    /// The statement is not a read. Raised before the backend is contacted.
    #[error("read-only violation: statement must begin with SELECT or WITH (got {0:?})")]
    ReadOnlyViolation(String),

    /// The underlying store failed (connection, timeout, rejected statement).
    #[error("data store error: {0}")]
    Backend(String),

    /// A row could not be decoded into the shape the caller expected.
    #[error("failed to decode row: {0}")]
    Decode(String),
}

impl From<rusqlite::Error> for DataError {
    fn from(e: rusqlite::Error) -> Self {
        DataError::Backend(e.to_string())
    }
}

impl From<reqwest::Error> for DataError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DataError::Backend(format!("request timeout: {}", e))
        } else if e.is_connect() {
            DataError::Backend(format!("connection failed: {}", e))
        } else {
            DataError::Backend(e.to_string())
        }
    }
}

/// Failure of an outbound call (delivery, language model, dependent agent).
#[derive(Debug, Clone, Error)]
#[error("{service} unavailable: {message}")]
pub struct ExternalServiceError {
    pub service: String,
    pub message: String,
}

impl ExternalServiceError {
    pub fn new(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// Error returned by an agent run or sub-operation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    External(#[from] ExternalServiceError),

    #[error("agent {agent} has no operation named {operation:?}")]
    UnknownOperation { agent: String, operation: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

/// Error returned by the manual trigger surface.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent {agent} failed: {source}")]
    Run {
        agent: String,
        #[source]
        source: AgentError,
    },
}
