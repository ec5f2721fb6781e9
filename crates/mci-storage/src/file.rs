//! File-backed backend
//!
//! Layout: `<root>/<namespace>/<hex(key)>.json`. Keys are hex encoded so any
//! key (including `::` separators) maps to a portable file name.

use crate::error::StorageError;
use crate::namespace::Namespace;
use crate::store::KeyValueStore;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const EXTENSION: &str = "json";

/// JSON-file-per-key store rooted at a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create store rooted at `root` (created lazily on first write)
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: Namespace) -> PathBuf {
        self.root.join(namespace.as_str())
    }

    fn key_path(&self, namespace: Namespace, key: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.{EXTENSION}", hex::encode(key.as_bytes())))
    }

    fn decode_file_name(path: &Path) -> Option<String> {
        if path.extension()? != EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Value>, StorageError> {
        let path = self.key_path(namespace, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::serialization(key, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io_error(path, e)),
        }
    }

    async fn set(&self, namespace: Namespace, key: &str, value: Value) -> Result<(), StorageError> {
        let dir = self.namespace_dir(namespace);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io_error(&dir, e))?;

        let bytes = serde_json::to_vec_pretty(&value).map_err(|e| StorageError::serialization(key, e))?;
        let path = self.key_path(namespace, key);
        // Replace via rename so readers never see a partial record.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StorageError::io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::io_error(&path, e))
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), StorageError> {
        let path = self.key_path(namespace, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io_error(path, e)),
        }
    }

    async fn list_keys(&self, namespace: Namespace) -> Result<Vec<String>, StorageError> {
        let dir = self.namespace_dir(namespace);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io_error(dir, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io_error(&dir, e))?
        {
            if let Some(key) = Self::decode_file_name(&entry.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self, namespace: Namespace) -> Result<(), StorageError> {
        let dir = self.namespace_dir(namespace);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io_error(dir, e)),
        }
    }
}
