//! Error types for widecol
//!
//! Provides a unified error type for the cluster session, the store layer
//! and the HTTP front-end. Driver errors are folded into a few variants
//! that carry just what the retry loop and the HTTP layer act on.

use std::io;
use std::time::Duration;

use scylla::errors::{
    DbError, ExecutionError, NewSessionError, PrepareError, RequestAttemptError,
};
use thiserror::Error;

/// Result type alias using WidecolError
pub type Result<T> = std::result::Result<T, WidecolError>;

/// Unified error type for widecol operations
#[derive(Debug, Error)]
pub enum WidecolError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // -------------------------------------------------------------------------
    // Cluster Errors
    // -------------------------------------------------------------------------
    /// A request the cluster received and rejected, or failed to serve
    ///
    /// `transient` marks the coordinator's "try again" answers: unavailable
    /// replicas, overload, bootstrapping nodes and replica timeouts.
    #[error("Database error: {message}")]
    Database { message: String, transient: bool },

    #[error("No hosts available: {0}")]
    NoHostsAvailable(String),

    #[error("Statement timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    #[error("Request cancelled")]
    Cancelled,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Store Errors
    // -------------------------------------------------------------------------
    #[error("Schema error: {0}")]
    Schema(String),

    /// A result row that does not have the expected shape
    #[error("Column error: {0}")]
    Column(String),

    /// Caller-supplied input that can never succeed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // HTTP Errors
    // -------------------------------------------------------------------------
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WidecolError {
    /// Whether the failure is transient and the statement may be re-sent
    ///
    /// Only connection-level failures, per-statement timeouts and the
    /// coordinator's "try again" answers qualify. Anything the server
    /// rejected on its merits (syntax, invalid request, already exists) does not.
    pub fn is_retriable(&self) -> bool {
        match self {
            WidecolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::TimedOut
            ),
            WidecolError::Timeout(_) | WidecolError::NoHostsAvailable(_) => true,
            WidecolError::Database { transient, .. } => *transient,
            _ => false,
        }
    }
}

// =============================================================================
// Driver Error Conversions
// =============================================================================

fn is_transient(error: &DbError) -> bool {
    matches!(
        error,
        DbError::Unavailable { .. }
            | DbError::Overloaded { .. }
            | DbError::IsBootstrapping { .. }
            | DbError::ReadTimeout { .. }
            | DbError::WriteTimeout { .. }
    )
}

impl From<RequestAttemptError> for WidecolError {
    fn from(error: RequestAttemptError) -> Self {
        match error {
            RequestAttemptError::DbError(db, message) => WidecolError::Database {
                transient: is_transient(&db),
                message: format!("{} ({})", message, db),
            },
            RequestAttemptError::BrokenConnectionError(e) => {
                WidecolError::Io(io::Error::new(io::ErrorKind::ConnectionReset, e.to_string()))
            }
            other => WidecolError::Database {
                message: other.to_string(),
                transient: false,
            },
        }
    }
}

impl From<ExecutionError> for WidecolError {
    fn from(error: ExecutionError) -> Self {
        match error {
            ExecutionError::RequestTimeout(timeout) => WidecolError::Timeout(timeout),
            ExecutionError::EmptyPlan => {
                WidecolError::NoHostsAvailable("load balancing plan is empty".to_string())
            }
            ExecutionError::ConnectionPoolError(e) => WidecolError::NoHostsAvailable(e.to_string()),
            ExecutionError::LastAttemptError(e) => WidecolError::from(e),
            other => WidecolError::Database {
                message: other.to_string(),
                transient: false,
            },
        }
    }
}

impl From<PrepareError> for WidecolError {
    fn from(error: PrepareError) -> Self {
        match error {
            PrepareError::ConnectionPoolError(e) => WidecolError::NoHostsAvailable(e.to_string()),
            other => WidecolError::Database {
                message: format!("prepare failed: {}", other),
                transient: false,
            },
        }
    }
}

impl From<NewSessionError> for WidecolError {
    fn from(error: NewSessionError) -> Self {
        WidecolError::NoHostsAvailable(error.to_string())
    }
}
