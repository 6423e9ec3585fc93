use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LensGraphError>;

#[derive(Debug, Error)]
pub enum LensGraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage operation error: {0}")]
    StorageOperation(#[from] redb::StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid record: {0}")]
    Record(#[from] RecordError),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Config error: {0}")]
    Config(String),
}

/// Errors surfaced by the paginated fetcher.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// Rate limits, timeouts and 5xx-style failures that outlived the retry budget.
    #[error("transient failure on {shape} after {attempts} attempts: {reason}")]
    Transient {
        shape: String,
        attempts: u32,
        reason: String,
    },

    /// Authorization failures and malformed payloads. Never retried.
    #[error("fatal failure on {shape}: {reason}")]
    Fatal { shape: String, reason: String },

    #[error("checkpoint persistence failed: {0}")]
    Checkpoint(String),

    #[error("invalid fetch request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// How the upstream classified a failed page request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UpstreamError {
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream request timed out")]
    Timeout,

    #[error("transient upstream error: {0}")]
    Transient(String),

    #[error("fatal upstream error: {0}")]
    Fatal(String),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, UpstreamError::Fatal(_))
    }
}

/// A raw upstream or snapshot record that does not fit its entity schema.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid {entity} record: {reason}")]
pub struct RecordError {
    pub entity: &'static str,
    pub reason: String,
}

impl RecordError {
    pub fn new(entity: &'static str, reason: impl Into<String>) -> Self {
        Self {
            entity,
            reason: reason.into(),
        }
    }
}
