//! Error types for deqar-ingest
//!
//! Only the submission orchestrator turns these into per-unit outcomes;
//! reconciliation conflicts are never errors, they become log entries.

use thiserror::Error;

/// Ingest error type
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed or contradictory input, detected before any write commits
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database failure inside a unit's transaction
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// deqar-common error
    #[error(transparent)]
    Common(#[from] deqar_common::Error),
}

impl IngestError {
    pub fn validation(message: impl Into<String>) -> Self {
        IngestError::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, IngestError::Validation(_))
    }

    /// True when the failure is SQLite lock contention worth retrying
    pub fn is_database_locked(&self) -> bool {
        match self {
            IngestError::Database(db_err) => db_err.to_string().contains("database is locked"),
            IngestError::Common(err) => err.is_database_locked(),
            _ => false,
        }
    }
}

/// Result type for ingest operations
pub type IngestResult<T> = Result<T, IngestError>;
