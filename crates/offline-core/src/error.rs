//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] offline_storage::StorageError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] offline_proxy::ProxyError),

    #[error("Install failed fetching {path}: {reason}")]
    InstallFailed { path: String, reason: String },

    #[error("Generation not installed: {0}")]
    NotInstalled(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Deployment error: {0}")]
    Deployment(String),
}
