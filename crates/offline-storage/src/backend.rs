//! Storage backend trait

use async_trait::async_trait;

use crate::entry::{CachedResponse, RequestKey};
use crate::error::StorageError;

/// Maximum length of a cache name
const MAX_CACHE_NAME_LEN: usize = 128;

/// Cache storage trait
///
/// A storage holds any number of named caches. Each cache is an
/// independent key/value store from [`RequestKey`] to [`CachedResponse`].
/// Implementations must tolerate concurrent `get`/`put` calls on the
/// same cache.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if absent. Returns `true` when it was created.
    async fn open(&self, cache: &str) -> Result<bool, StorageError>;

    /// Check whether a cache exists
    async fn has(&self, cache: &str) -> Result<bool, StorageError>;

    /// List the names of all existing caches
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Delete a cache and everything in it. Returns `false` if it did not exist.
    async fn delete(&self, cache: &str) -> Result<bool, StorageError>;

    /// Look up a stored response. A missing cache yields `None`.
    async fn get(
        &self,
        cache: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, StorageError>;

    /// Store a response, replacing any previous entry for the same key
    async fn put(
        &self,
        cache: &str,
        key: &RequestKey,
        response: CachedResponse,
    ) -> Result<(), StorageError>;

    /// List the request keys stored in a cache
    async fn entries(&self, cache: &str) -> Result<Vec<RequestKey>, StorageError>;
}

/// Validate a cache name.
///
/// Names become directory names on disk, so only ASCII alphanumerics,
/// `-`, `_` and `.` are accepted, and a name may not start with `.`.
pub fn validate_cache_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.len() > MAX_CACHE_NAME_LEN {
        return Err(StorageError::InvalidName(format!(
            "length must be 1-{} characters: {:?}",
            MAX_CACHE_NAME_LEN, name
        )));
    }

    if name.starts_with('.') {
        return Err(StorageError::InvalidName(format!(
            "must not start with '.': {}",
            name
        )));
    }

    if let Some(ch) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(StorageError::InvalidName(format!(
            "invalid character {:?} in {}",
            ch, name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_cache_names() {
        assert!(validate_cache_name("cache-1697040000000").is_ok());
        assert!(validate_cache_name("cache-v1.2.3_rc1").is_ok());
    }

    #[test]
    fn test_invalid_cache_names() {
        assert!(validate_cache_name("").is_err());
        assert!(validate_cache_name("..").is_err());
        assert!(validate_cache_name(".hidden").is_err());
        assert!(validate_cache_name("cache/../../etc").is_err());
        assert!(validate_cache_name("cache name").is_err());
        assert!(validate_cache_name(&"a".repeat(129)).is_err());
    }
}
