//! Error types module
//!
//! Every failure surfaced by the transfer engine is an [`ArcaError`]. Provider
//! failures are wrapped at the point of catch into [`ArcaError::DataTransfer`]
//! together with the provider tag and the operation that failed, so callers and
//! stored task failure reasons always carry that context.
//!
//! `From<sqlx::Error>` is gated behind the `sqlx` feature.

use std::io;

use crate::models::ProviderTag;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Self-description of an error for callers that translate it (REST, CLI, task records).
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "DATA_TRANSFER_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether re-submitting the same request may succeed
    fn is_recoverable(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum ArcaError {
    /// A provider call failed (network, auth, signature, not-found-on-write-target).
    #[error("[{provider}] {operation} failed: {message}")]
    DataTransfer {
        provider: ProviderTag,
        operation: String,
        message: String,
    },

    /// Malformed caller input.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Task store failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invariant violation.
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type for engine operations
pub type ArcaResult<T> = Result<T, ArcaError>;

impl ArcaError {
    pub fn data_transfer(
        provider: ProviderTag,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ArcaError::DataTransfer {
            provider,
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        ArcaError::InvalidRequest(message.into())
    }

    /// Provider tag for transfer errors, if any.
    pub fn provider(&self) -> Option<ProviderTag> {
        match self {
            ArcaError::DataTransfer { provider, .. } => Some(*provider),
            _ => None,
        }
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for ArcaError {
    fn from(err: sqlx::Error) -> Self {
        ArcaError::Persistence(err.to_string())
    }
}

impl From<io::Error> for ArcaError {
    fn from(err: io::Error) -> Self {
        ArcaError::Unexpected(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for ArcaError {
    fn from(err: serde_json::Error) -> Self {
        ArcaError::Persistence(format!("JSON encoding error: {}", err))
    }
}

impl ErrorMetadata for ArcaError {
    fn error_code(&self) -> &'static str {
        match self {
            ArcaError::DataTransfer { .. } => "DATA_TRANSFER_ERROR",
            ArcaError::InvalidRequest(_) => "INVALID_REQUEST_ERROR",
            ArcaError::Persistence(_) => "PERSISTENCE_ERROR",
            ArcaError::Unexpected(_) => "UNEXPECTED_ERROR",
            ArcaError::NotFound(_) => "NOT_FOUND",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ArcaError::DataTransfer { .. } | ArcaError::Persistence(_)
        )
    }

    fn log_level(&self) -> LogLevel {
        match self {
            ArcaError::InvalidRequest(_) | ArcaError::NotFound(_) => LogLevel::Debug,
            ArcaError::DataTransfer { .. } => LogLevel::Warn,
            ArcaError::Persistence(_) | ArcaError::Unexpected(_) => LogLevel::Error,
        }
    }
}
