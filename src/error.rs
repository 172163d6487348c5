//! Error types for bitable-dl
//!
//! This module provides the error taxonomy used across the pipeline:
//! - Configuration errors (missing credentials, unknown field names)
//! - Source/resolver transport and API errors (non-zero Feishu `code`)
//! - Persistence errors from the SQLite-backed config and history store
//! - Control-surface misuse (e.g. starting while a run is active)

use thiserror::Error;

/// Result type alias for bitable-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bitable-dl
///
/// Per-task transfer failures and per-batch resolver failures are handled where
/// they happen and never surface through this type at the run level; every error
/// that does reach the top-level handler finalizes the run.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "appId")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Network error (connection refused, TLS, timeouts, body decoding)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote API answered with a non-zero status code
    #[error("{operation} failed (code {code}): {message}")]
    Api {
        /// What was being attempted (e.g., "authentication", "fetch records page 2")
        operation: String,
        /// The API status code (or HTTP status when the body was not an API envelope)
        code: i64,
        /// The message returned by the API
        message: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Control operation not allowed in the current run phase
    #[error("cannot {operation} while {phase}")]
    InvalidState {
        /// The operation that was attempted (e.g., "start", "reset")
        operation: String,
        /// The phase that prevents the operation (e.g., "running")
        phase: String,
    },

    /// The transfer backend refused a submission
    #[error("transfer error: {0}")]
    Transfer(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a settings key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error came from talking to a remote service
    ///
    /// Used when logging so operators can tell source outages apart from
    /// local misconfiguration.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Api { .. })
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}
