use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{OpenBackend, StorageBackend};
use super::StorageError;

/// Name of the JSON document holding every key.
pub const STORE_FILE: &str = "store.json";

/// Keeps the whole store in one JSON document inside a directory.
///
/// The document is rewritten on every mutation through a temp file and an atomic rename. The
/// in-memory copy is only swapped after the rename succeeds.
pub struct FsBackend {
    dir: PathBuf,
    file: PathBuf,
    data: RwLock<BTreeMap<String, Value>>,
}

impl FsBackend {
    /// Creates the directory if needed and loads the existing document, if any.
    pub async fn open(dir: &Path) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(dir).await?;
        let file = dir.join(STORE_FILE);
        let data = match tokio::fs::read(&file).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
                path: file.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %file.display(), "opened store");
        Ok(FsBackend {
            dir: dir.to_path_buf(),
            file,
            data: RwLock::new(data),
        })
    }

    /// Path of the JSON document.
    pub fn file(&self) -> &Path {
        &self.file
    }

    async fn persist(&self, data: &BTreeMap<String, Value>) -> Result<(), StorageError> {
        let body = serde_json::to_vec_pretty(data)?;
        let dir = self.dir.clone();
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&body)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&file).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Unavailable(e.to_string()))??;
        Ok(())
    }

    async fn mutate(&self, apply: impl FnOnce(&mut BTreeMap<String, Value>) -> bool) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        let mut next = data.clone();
        if !apply(&mut next) {
            return Ok(());
        }
        self.persist(&next).await?;
        *data = next;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.mutate(|data| {
            data.insert(key.to_string(), value);
            true
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.mutate(|data| data.remove(key).is_some()).await
    }

    async fn delete_many(&self, keys: &[&str]) -> Result<(), StorageError> {
        self.mutate(|data| {
            keys.iter()
                .fold(false, |changed, key| data.remove(*key).is_some() || changed)
        })
        .await
    }

    async fn list_all(&self) -> Result<BTreeMap<String, Value>, StorageError> {
        Ok(self.data.read().await.clone())
    }
}

/// Opens an [`FsBackend`] rooted at a directory.
pub struct FsOpener {
    dir: PathBuf,
}

impl FsOpener {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FsOpener { dir: dir.into() }
    }
}

#[async_trait]
impl OpenBackend for FsOpener {
    async fn open(&self) -> Result<Arc<dyn StorageBackend>, StorageError> {
        let backend = FsBackend::open(&self.dir).await?;
        Ok(Arc::new(backend))
    }
}
