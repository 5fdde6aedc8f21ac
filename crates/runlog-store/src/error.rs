use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database at {path}: {message}")]
    Open { path: PathBuf, message: String },
    #[error("query failed: {0}")]
    Query(String),
    #[error("failed to decode column {column}: {message}")]
    Decode { column: String, message: String },
    #[error("sync failed: {0}")]
    Sync(String),
    #[error("sync timed out after {0:?}")]
    SyncTimeout(Duration),
    #[error("connection is closed")]
    Closed,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<libsql::Error> for StoreError {
    fn from(e: libsql::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}
