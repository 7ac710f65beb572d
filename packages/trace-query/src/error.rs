//! Error types for the trace query engine

use thiserror::Error;

use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Unsupported index operation: {0}")]
    UnsupportedIndexOperation(String),

    #[error("Unrecognized index label '{label}' on bucket {bucket}")]
    UnrecognizedIndex { bucket: String, label: String },

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    // Subsystem wrappers, so the caller sees which part of the query failed.
    #[error("Shard '{prefix}' scan failed: {source}")]
    Shard {
        prefix: String,
        #[source]
        source: Box<QueryError>,
    },

    #[error("Index lookup for '{property}' failed: {source}")]
    Index {
        property: String,
        #[source]
        source: Box<QueryError>,
    },

    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl QueryError {
    /// Stable error code for callers and the CLI.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Storage(e) if e.is_not_found() => "NOT_FOUND",
            QueryError::Storage(_) => "STORAGE_UNAVAILABLE",
            QueryError::MalformedRecord(_) => "MALFORMED_RECORD",
            QueryError::UnsupportedIndexOperation(_) => "UNSUPPORTED_INDEX_OPERATION",
            QueryError::UnrecognizedIndex { .. } => "UNRECOGNIZED_INDEX",
            QueryError::InconsistentState(_) => "INCONSISTENT_STATE",
            QueryError::InvalidQuery(_) => "INVALID_QUERY",
            QueryError::Shard { source, .. } | QueryError::Index { source, .. } => source.code(),
            _ => "INTERNAL_ERROR",
        }
    }

    /// True when the underlying cause is a storage "not found" outcome.
    pub fn is_not_found(&self) -> bool {
        match self {
            QueryError::Storage(e) => e.is_not_found(),
            QueryError::Shard { source, .. } | QueryError::Index { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
