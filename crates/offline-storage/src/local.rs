//! Local disk storage backend

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::backend::{CacheStorage, validate_cache_name};
use crate::entry::{CachedResponse, RequestKey};
use crate::error::StorageError;

const ENTRY_EXTENSION: &str = "entry";

/// Sequence for temp file names, unique within the process
static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Metadata line at the head of each entry file
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: RequestKey,
    status: u16,
    headers: Vec<StoredHeader>,
    stored_at: DateTime<Utc>,
}

/// Header with its raw value bytes in base64
#[derive(Debug, Serialize, Deserialize)]
struct StoredHeader {
    name: String,
    value: String,
}

impl EntryMeta {
    fn new(key: &RequestKey, response: &CachedResponse) -> Self {
        Self {
            key: key.clone(),
            status: response.status,
            headers: response
                .headers
                .iter()
                .map(|(name, value)| StoredHeader {
                    name: name.clone(),
                    value: STANDARD.encode(value),
                })
                .collect(),
            stored_at: response.stored_at,
        }
    }

    fn into_response(self, body: Bytes) -> Result<CachedResponse, StorageError> {
        let headers = self
            .headers
            .into_iter()
            .map(|header| {
                STANDARD
                    .decode(&header.value)
                    .map(|value| (header.name, value))
                    .map_err(|e| StorageError::Corrupt(format!("header value: {}", e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CachedResponse {
            status: self.status,
            headers,
            body,
            stored_at: self.stored_at,
        })
    }
}

/// Local disk storage backend
///
/// Stores every cache in its own directory, one file per entry:
/// `<base_path>/caches/<cache name>/<key fingerprint>.entry`
///
/// An entry file holds a single JSON metadata line followed by the body.
/// Files are replaced whole by renaming a freshly written temp file, so a
/// reader sees either the previous entry or the new one, never a mix.
pub struct LocalStorage {
    caches_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage backend
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let caches_path = base_path.as_ref().join("caches");
        fs::create_dir_all(&caches_path).await?;

        info!("Initialized local cache storage at {:?}", caches_path);

        Ok(Self { caches_path })
    }

    fn cache_path(&self, cache: &str) -> Result<PathBuf, StorageError> {
        validate_cache_name(cache)?;
        Ok(self.caches_path.join(cache))
    }

    fn entry_path(&self, cache: &str, key: &RequestKey) -> Result<PathBuf, StorageError> {
        Ok(self
            .cache_path(cache)?
            .join(format!("{}.{}", key.fingerprint(), ENTRY_EXTENSION)))
    }

    /// Read only the metadata line of an entry file
    async fn read_meta(path: &Path) -> Result<Option<EntryMeta>, StorageError> {
        let file = match fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut line = Vec::new();
        BufReader::new(file).read_until(b'\n', &mut line).await?;
        if line.pop() != Some(b'\n') {
            return Err(StorageError::Corrupt(format!("{:?} has no metadata line", path)));
        }

        Ok(Some(serde_json::from_slice(&line)?))
    }
}

/// Write a file atomically using a uniquely named temp file and rename
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let temp_path = path.with_extension(format!(
        "{}-{}.tmp",
        std::process::id(),
        TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    ));

    let written = match fs::write(&temp_path, data).await {
        Ok(()) => fs::rename(&temp_path, path).await,
        Err(e) => Err(e),
    };

    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&temp_path).await
            && cleanup.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove temp file {:?}: {}", temp_path, cleanup);
        }
        return Err(StorageError::Io(e));
    }

    Ok(())
}

#[async_trait]
impl CacheStorage for LocalStorage {
    async fn open(&self, cache: &str) -> Result<bool, StorageError> {
        let path = self.cache_path(cache)?;
        if fs::try_exists(&path).await? {
            return Ok(false);
        }

        debug!("Creating cache directory {:?}", path);
        fs::create_dir_all(&path).await?;
        Ok(true)
    }

    async fn has(&self, cache: &str) -> Result<bool, StorageError> {
        let path = self.cache_path(cache)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.caches_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => warn!("Skipping non UTF-8 cache directory {:?}", raw),
            }
        }

        names.sort();
        Ok(names)
    }

    async fn delete(&self, cache: &str) -> Result<bool, StorageError> {
        let path = self.cache_path(cache)?;
        debug!("Deleting cache directory {:?}", path);

        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn get(
        &self,
        cache: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, StorageError> {
        let path = self.entry_path(cache, key)?;

        let data = match fs::read(&path).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let split = data
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| StorageError::Corrupt(format!("{:?} has no metadata line", path)))?;
        let meta: EntryMeta = serde_json::from_slice(&data[..split])?;

        if meta.key != *key {
            return Err(StorageError::Corrupt(format!(
                "{:?} holds {} instead of {}",
                path, meta.key, key
            )));
        }

        meta.into_response(data.slice(split + 1..)).map(Some)
    }

    async fn put(
        &self,
        cache: &str,
        key: &RequestKey,
        response: CachedResponse,
    ) -> Result<(), StorageError> {
        if !self.has(cache).await? {
            return Err(StorageError::CacheNotFound(cache.to_string()));
        }

        let path = self.entry_path(cache, key)?;
        debug!("Writing cache entry {} to {:?}", key, path);

        // serde_json escapes newlines inside strings, so the line break is the separator
        let mut data = serde_json::to_vec(&EntryMeta::new(key, &response))?;
        data.push(b'\n');
        data.extend_from_slice(&response.body);

        match write_atomic(&path, &data).await {
            // The cache directory was deleted underneath the write
            Err(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::CacheNotFound(cache.to_string()))
            }
            other => other,
        }
    }

    async fn entries(&self, cache: &str) -> Result<Vec<RequestKey>, StorageError> {
        let path = self.cache_path(cache)?;
        let mut dir = fs::read_dir(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::CacheNotFound(cache.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let file_path = entry.path();
            if file_path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(meta) = Self::read_meta(&file_path).await? {
                keys.push(meta.key);
            }
        }

        keys.sort();
        Ok(keys)
    }
}
