use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::backend::{OpenBackend, StorageBackend};
use super::StorageError;

/// In-memory storage backend for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemBackend {
    data: RwLock<BTreeMap<String, Value>>,
    simulate_write_error: AtomicBool,
}

impl MemBackend {
    /// An empty backend, shared so tests can flip write errors on a live store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enable write error simulation for testing error handling.
    pub fn set_simulate_write_error(&self, simulate: bool) {
        self.simulate_write_error.store(simulate, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.simulate_write_error.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("simulated write error".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.check_writable()?;
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[&str]) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut data = self.data.write().await;
        for key in keys {
            data.remove(*key);
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<BTreeMap<String, Value>, StorageError> {
        Ok(self.data.read().await.clone())
    }
}

#[async_trait]
impl OpenBackend for Arc<MemBackend> {
    async fn open(&self) -> Result<Arc<dyn StorageBackend>, StorageError> {
        Ok(self.clone())
    }
}
