//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache not found: {0}")]
    CacheNotFound(String),

    #[error("Invalid cache name: {0}")]
    InvalidName(String),

    #[error("Corrupt entry: {0}")]
    Corrupt(String),
}
