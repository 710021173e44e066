//! Offline Cache Storage Layer
//!
//! This crate provides the named cache stores used by Offline Cache.
//! Each store maps a request identity to a full response and belongs to
//! exactly one generation. Backends are available for local disk and
//! process memory.

pub mod backend;
pub mod entry;
pub mod error;
pub mod local;
pub mod memory;

pub use backend::{CacheStorage, validate_cache_name};
pub use entry::{CachedResponse, RequestKey};
pub use error::StorageError;
pub use local::LocalStorage;
pub use memory::MemoryStorage;
