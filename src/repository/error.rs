//! Repository-specific error types.
//!
//! All repository operations return [`RepositoryError`] on failure. The
//! variants map onto the caller-visible outcomes: validation (bad input),
//! not found (unknown name), and backend failure (transient or not).

use thiserror::Error;

use crate::model::{MetricKind, ModelError};

/// SQLSTATE class for connection exceptions.
const SQLSTATE_CONNECTION_EXCEPTION: &str = "08";

/// Errors that can occur in the repository layer.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No metric with this name and kind is stored.
    #[error("metric not found: {kind} '{name}'")]
    NotFound { kind: MetricKind, name: String },

    /// Update rejected by metric validation.
    #[error("invalid metric: {0}")]
    Validation(#[from] ModelError),

    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Snapshot file I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot file could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend cannot currently serve requests.
    #[error("storage not available: {0}")]
    Unavailable(String),

    /// Repository was stopped.
    #[error("repository is stopped")]
    Stopped,

    /// Internal error (e.g., task join failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl RepositoryError {
    pub(crate) fn not_found(kind: MetricKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Whether the caller's input caused the failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// True for pool/socket failures and SQLSTATE class `08`; constraint
    /// violations and bad arguments are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => is_transient_sqlx(e),
            Self::Unavailable(_) => true,
            _ => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| code.starts_with(SQLSTATE_CONNECTION_EXCEPTION)),
        _ => false,
    }
}
