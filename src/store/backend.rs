use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::StorageError;

/// Raw key-value I/O against one backing medium.
///
/// Every mutating call is all-or-nothing: when it returns an error, what `get` sees afterwards
/// is exactly what it saw before.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Returns `Ok(None)` for a key that was never set; absence is not an error.
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Deletes every key in one mutation: either all of them go or none do.
    async fn delete_many(&self, keys: &[&str]) -> Result<(), StorageError>;

    async fn list_all(&self) -> Result<BTreeMap<String, Value>, StorageError>;
}

/// Creates the backing store. Called at most once per successful [`super::Store`] initialization.
#[async_trait]
pub trait OpenBackend: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn StorageBackend>, StorageError>;
}
