//! # Store
//!
//! A small persistent key-value store of JSON values.
//!
//! [`Store`] is a cheap cloneable handle. The backing medium is opened lazily on first use, and
//! concurrent first callers share a single open: one [`OpenBackend::open`] runs, everyone else
//! waits for it. A failed open is not remembered, so the next call tries again.
//!
//! Two backends ship with the crate:
//!
//! - [`FsBackend`]: one JSON document in a data directory, rewritten atomically on every
//!   mutation.
//! - [`MemBackend`]: an in-process map, used in tests.

mod backend;
mod fs_backend;
mod mem_backend;

pub use backend::{OpenBackend, StorageBackend};
pub use fs_backend::{FsBackend, FsOpener, STORE_FILE};
pub use mem_backend::MemBackend;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

/// Failures of the persistent store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("value under {key:?} has an unexpected shape: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

struct Inner {
    opener: Box<dyn OpenBackend>,
    backend: OnceCell<Arc<dyn StorageBackend>>,
}

/// Shared handle to the key-value store. Clones refer to the same backend.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// A store that opens its backend through `opener` on first use.
    pub fn new(opener: impl OpenBackend + 'static) -> Self {
        Store {
            inner: Arc::new(Inner {
                opener: Box::new(opener),
                backend: OnceCell::new(),
            }),
        }
    }

    /// A store persisted under `dir`.
    pub fn open_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(FsOpener::new(dir.as_ref()))
    }

    /// A store backed by `backend`; the same backend can be shared between handles.
    pub fn with_backend(backend: Arc<MemBackend>) -> Self {
        Self::new(backend)
    }

    /// A fresh, empty in-memory store.
    pub fn in_memory() -> Self {
        Self::with_backend(MemBackend::new())
    }

    async fn backend(&self) -> Result<&Arc<dyn StorageBackend>, StorageError> {
        self.inner
            .backend
            .get_or_try_init(|| async {
                debug!("initializing store backend");
                self.inner.opener.open().await
            })
            .await
    }

    /// The value under `key`, or `None` if it was never set.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.backend().await?.get(key).await
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.backend().await?.set(key, value).await
    }

    /// Removes `key`. Removing a key that is not there succeeds.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.backend().await?.delete(key).await
    }

    /// Removes all of `keys` atomically.
    pub async fn delete_many(&self, keys: &[&str]) -> Result<(), StorageError> {
        self.backend().await?.delete_many(keys).await
    }

    /// Every key and value, ordered by key.
    pub async fn list_all(&self) -> Result<BTreeMap<String, Value>, StorageError> {
        self.backend().await?.list_all().await
    }

    /// Reads `key` and deserializes it into `T`.
    pub async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StorageError::Malformed {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Serializes `value` and stores it under `key`.
    pub async fn set_typed<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value)?;
        self.set(key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Counts opens, failing the first `fail_first` of them.
    struct CountingOpener {
        opens: Arc<AtomicUsize>,
        fail_first: usize,
        backend: Arc<MemBackend>,
    }

    #[async_trait]
    impl OpenBackend for CountingOpener {
        async fn open(&self) -> Result<Arc<dyn StorageBackend>, StorageError> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if n < self.fail_first {
                return Err(StorageError::Unavailable("not yet".to_string()));
            }
            Ok(self.backend.clone())
        }
    }

    fn counting(fail_first: usize) -> (Store, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let store = Store::new(CountingOpener {
            opens: opens.clone(),
            fail_first,
            backend: MemBackend::new(),
        });
        (store, opens)
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = Store::in_memory();
        assert_eq!(store.get("config").await.unwrap(), None);

        store.set("config", json!({"fg": "#000000"})).await.unwrap();
        assert_eq!(store.get("config").await.unwrap(), Some(json!({"fg": "#000000"})));

        store.set("config", json!(null)).await.unwrap();
        assert_eq!(store.get("config").await.unwrap(), Some(Value::Null));

        store.delete("config").await.unwrap();
        assert_eq!(store.get("config").await.unwrap(), None);
        store.delete("config").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_all() {
        let store = Store::in_memory();
        store.set("b", json!(2)).await.unwrap();
        store.set("a", json!(1)).await.unwrap();
        let all = store.list_all().await.unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_opens_once() {
        let (store, opens) = counting(0);
        let reads = (0..8).map(|_| {
            let store = store.clone();
            async move { store.get("missing").await }
        });
        let results = futures::future::join_all(reads).await;
        assert!(results.iter().all(|r| matches!(r, Ok(None))));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_open_is_retried() {
        let (store, opens) = counting(1);
        assert!(matches!(store.get("k").await, Err(StorageError::Unavailable(_))));
        store.set("k", json!("v")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!("v")));
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_value() {
        let backend = MemBackend::new();
        let store = Store::with_backend(backend.clone());
        store.set("k", json!(1)).await.unwrap();

        backend.set_simulate_write_error(true);
        assert!(store.set("k", json!(2)).await.is_err());
        assert!(store.delete("k").await.is_err());
        assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_durable_across_handles() {
        let dir = TempDir::new().unwrap();
        Store::open_dir(dir.path()).set("greeting", json!("hi")).await.unwrap();
        let reopened = Store::open_dir(dir.path());
        assert_eq!(reopened.get("greeting").await.unwrap(), Some(json!("hi")));
    }

    #[tokio::test]
    async fn test_typed_access() {
        let store = Store::in_memory();
        store.set_typed("list", &vec![1u32, 2, 3]).await.unwrap();
        let list: Option<Vec<u32>> = store.get_typed("list").await.unwrap();
        assert_eq!(list, Some(vec![1, 2, 3]));

        store.set("list", json!("not a list")).await.unwrap();
        let err = store.get_typed::<Vec<u32>>("list").await.unwrap_err();
        assert!(matches!(err, StorageError::Malformed { ref key, .. } if key == "list"));
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_open() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STORE_FILE), b"[1, 2").unwrap();
        let store = Store::open_dir(dir.path());
        assert!(matches!(store.get("any").await, Err(StorageError::Corrupt { .. })));
    }
}
