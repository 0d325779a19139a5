//! Change detection: skip files whose content and configuration did not change.
//!
//! A file is recorded only after it went through every rule without error, and
//! only by the coordinator. Workers never touch the cache.

use crate::config::ConfigurationError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Errors raised by cache storage backends
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error for {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupted cache entry {path}: {source}")]
    Corrupted {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// SHA-256 of arbitrary bytes, lowercase hex
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of a file's content
pub fn content_fingerprint(path: &Utf8Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(fingerprint_bytes(&bytes))
}

/// Stored state of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub content_fingerprint: String,
    pub config_fingerprint: String,
}

/// Durable key → record store with point lookups and point invalidation
pub trait CacheStorage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<CacheRecord>, CacheError>;
    fn save(&self, key: &str, record: &CacheRecord) -> Result<(), CacheError>;
    fn clean(&self, key: &str) -> Result<(), CacheError>;
    fn clear(&self) -> Result<(), CacheError>;
}

/// One JSON file per entry, sharded by the first two hex chars of the key hash
#[derive(Debug)]
pub struct FileCacheStorage {
    directory: Utf8PathBuf,
}

impl FileCacheStorage {
    pub fn new(directory: impl Into<Utf8PathBuf>) -> Result<Self, CacheError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|source| CacheError::Io {
            path: directory.clone(),
            source,
        })?;

        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Utf8Path {
        &self.directory
    }

    fn entry_path(&self, key: &str) -> Utf8PathBuf {
        let hash = fingerprint_bytes(key.as_bytes());
        self.directory
            .join(&hash[..2])
            .join(format!("{}.json", hash))
    }
}

impl CacheStorage for FileCacheStorage {
    fn load(&self, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| CacheError::Corrupted { path, source })
    }

    fn save(&self, key: &str, record: &CacheRecord) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        let io_error = |source| CacheError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        let json = serde_json::to_string(record).map_err(|source| CacheError::Corrupted {
            path: path.clone(),
            source,
        })?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(io_error)?;
        fs::rename(&tmp_path, &path).map_err(io_error)?;
        Ok(())
    }

    fn clean(&self, key: &str) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        if path.exists() {
            fs::remove_file(&path).map_err(|source| CacheError::Io { path, source })?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        if self.directory.exists() {
            fs::remove_dir_all(&self.directory).map_err(|source| CacheError::Io {
                path: self.directory.clone(),
                source,
            })?;
        }
        fs::create_dir_all(&self.directory).map_err(|source| CacheError::Io {
            path: self.directory.clone(),
            source,
        })?;

        tracing::debug!("Cleared cache directory: {}", self.directory);
        Ok(())
    }
}

/// In-process storage, gone when the process exits
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    records: Mutex<HashMap<String, CacheRecord>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn load(&self, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).cloned())
    }

    fn save(&self, key: &str, record: &CacheRecord) -> Result<(), CacheError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(key.to_string(), record.clone());
        Ok(())
    }

    fn clean(&self, key: &str) -> Result<(), CacheError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.clear();
        Ok(())
    }
}

/// The `cache_class` selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackend {
    #[default]
    File,
    Memory,
}

impl CacheBackend {
    pub fn create_storage(self, directory: &Utf8Path) -> Result<Box<dyn CacheStorage>, CacheError> {
        match self {
            CacheBackend::File => Ok(Box::new(FileCacheStorage::new(directory)?)),
            CacheBackend::Memory => Ok(Box::new(MemoryCacheStorage::new())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheBackend::File => "file",
            CacheBackend::Memory => "memory",
        }
    }
}

impl FromStr for CacheBackend {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(CacheBackend::File),
            "memory" => Ok(CacheBackend::Memory),
            _ => Err(ConfigurationError::UnknownCacheClass(s.to_string())),
        }
    }
}

/// Decides whether a file needs another pass
pub struct CacheIndex {
    storage: Box<dyn CacheStorage>,
    config_fingerprint: String,
}

impl CacheIndex {
    pub fn new(storage: Box<dyn CacheStorage>, config_fingerprint: impl Into<String>) -> Self {
        Self {
            storage,
            config_fingerprint: config_fingerprint.into(),
        }
    }

    pub fn config_fingerprint(&self) -> &str {
        &self.config_fingerprint
    }

    /// True unless a record exists and both fingerprints still match.
    ///
    /// Unreadable files and unreadable records count as changed, so the
    /// processing pass gets a chance to report the underlying problem.
    pub fn needs_processing(&self, file_path: &Utf8Path) -> bool {
        let record = match self.storage.load(file_path.as_str()) {
            Ok(Some(record)) => record,
            Ok(None) => return true,
            Err(e) => {
                tracing::warn!("Ignoring unreadable cache entry for {}: {}", file_path, e);
                return true;
            }
        };

        if record.config_fingerprint != self.config_fingerprint {
            return true;
        }

        match content_fingerprint(file_path) {
            Ok(current) => current != record.content_fingerprint,
            Err(_) => true,
        }
    }

    /// Store the current content fingerprint of a successfully processed file
    pub fn record(&self, file_path: &Utf8Path) -> Result<(), CacheError> {
        let content_fingerprint =
            content_fingerprint(file_path).map_err(|source| CacheError::Io {
                path: file_path.to_path_buf(),
                source,
            })?;

        self.storage.save(
            file_path.as_str(),
            &CacheRecord {
                content_fingerprint,
                config_fingerprint: self.config_fingerprint.clone(),
            },
        )
    }

    pub fn invalidate(&self, file_path: &Utf8Path) -> Result<(), CacheError> {
        self.storage.clean(file_path.as_str())
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        tracing::info!("Clearing change detection cache");
        self.storage.clear()
    }
}
