//! Error types for annotation-store

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Neither tier accepted the write
    #[error("Write failed in every tier: {0}")]
    WriteFailed(String),

    /// A manifest names a chunk that is not stored
    #[error("Chunk missing: key {key}, chunk {index}")]
    MissingChunk { key: String, index: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Raised by a capacity-bounded backend
    #[error("Quota exceeded writing {key}: need {needed} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        needed: u64,
        available: u64,
    },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Unsupported schema: {0}")]
    UnsupportedSchema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
}

impl StorageError {
    /// True for the capacity signal that triggers tier overflow
    pub fn is_quota(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}
