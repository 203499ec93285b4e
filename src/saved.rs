//! The saved collection and the controller that adds to it.
//!
//! Saving runs a small state machine:
//!
//! ```text
//! idle --save--> saving --new entry persisted--> saved  --delay--> idle
//!                       --duplicate found------> exists --delay--> idle
//!                       --storage error--------> idle
//! ```
//!
//! Requests that arrive while the controller is not idle are ignored. The collection is
//! updated as one read-modify-write of the whole list, so two processes saving at the same
//! time can lose an entry.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::model::{SavedEntry, SAVED_KEY};
use crate::store::{StorageError, Store};

/// How long `saved` and `exists` stay visible before the controller returns to idle.
pub const DEFAULT_RESET_AFTER: Duration = Duration::from_secs(2);

/// Where the save controller is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveState {
    #[default]
    Idle,
    Saving,
    Saved,
    Exists,
}

/// Result of a [`SaveController::save`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// An entry with the same content, colors and watermark was already saved.
    Exists,
    /// The controller was busy.
    Ignored,
}

async fn load_entries(store: &Store) -> Result<Vec<SavedEntry>, StorageError> {
    Ok(store.get_typed(SAVED_KEY).await?.unwrap_or_default())
}

/// Adds entries to the saved collection, one save at a time.
pub struct SaveController {
    store: Store,
    state: Arc<watch::Sender<SaveState>>,
    reset_after: Duration,
}

impl SaveController {
    /// An idle controller over `store`, resetting after [`DEFAULT_RESET_AFTER`].
    pub fn new(store: Store) -> Self {
        let (state, _) = watch::channel(SaveState::Idle);
        SaveController {
            store,
            state: Arc::new(state),
            reset_after: DEFAULT_RESET_AFTER,
        }
    }

    /// Changes how long `saved` and `exists` are shown.
    pub fn with_reset_after(mut self, delay: Duration) -> Self {
        self.reset_after = delay;
        self
    }

    /// The current state.
    pub fn state(&self) -> SaveState {
        *self.state.borrow()
    }

    /// Receives every state change.
    pub fn subscribe(&self) -> watch::Receiver<SaveState> {
        self.state.subscribe()
    }

    /// Adds `entry` to the front of the collection unless an entry with the same identity exists.
    ///
    /// On a storage error the controller goes back to idle and the error is returned.
    pub async fn save(&self, entry: SavedEntry) -> Result<SaveOutcome, StorageError> {
        let started = self.state.send_if_modified(|state| {
            if *state != SaveState::Idle {
                return false;
            }
            *state = SaveState::Saving;
            true
        });
        if !started {
            debug!(state = ?self.state(), "save already in progress, ignoring");
            return Ok(SaveOutcome::Ignored);
        }

        match self.persist(entry).await {
            Ok(outcome) => {
                let shown = match outcome {
                    SaveOutcome::Exists => SaveState::Exists,
                    _ => SaveState::Saved,
                };
                self.state.send_replace(shown);
                self.schedule_reset(shown);
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "failed to save entry");
                self.state.send_replace(SaveState::Idle);
                Err(e)
            }
        }
    }

    async fn persist(&self, entry: SavedEntry) -> Result<SaveOutcome, StorageError> {
        let mut entries = load_entries(&self.store).await?;
        if entries.iter().any(|saved| saved.same_identity(&entry)) {
            info!(content = %entry.content, "entry already saved");
            return Ok(SaveOutcome::Exists);
        }
        entries.insert(0, entry);
        self.store.set_typed(SAVED_KEY, &entries).await?;
        info!(count = entries.len(), "saved entry");
        Ok(SaveOutcome::Saved)
    }

    fn schedule_reset(&self, shown: SaveState) {
        let state = self.state.clone();
        let delay = self.reset_after;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            state.send_if_modified(|current| {
                if *current != shown {
                    return false;
                }
                *current = SaveState::Idle;
                true
            });
        });
    }
}

/// Errors from [`SavedLibrary`] operations.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("no saved entry at index {index} (collection has {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Read and prune access to the saved collection.
#[derive(Clone)]
pub struct SavedLibrary {
    store: Store,
}

impl SavedLibrary {
    pub fn new(store: Store) -> Self {
        SavedLibrary { store }
    }

    /// Newest first. An absent collection is empty.
    pub async fn list(&self) -> Result<Vec<SavedEntry>, StorageError> {
        load_entries(&self.store).await
    }

    /// Removes and returns the entry at `index`, leaving the store untouched when it is out of range.
    pub async fn delete(&self, index: usize) -> Result<SavedEntry, LibraryError> {
        let mut entries = self.list().await?;
        if index >= entries.len() {
            return Err(LibraryError::IndexOutOfRange {
                index,
                len: entries.len(),
            });
        }
        let removed = entries.remove(index);
        self.store.set_typed(SAVED_KEY, &entries).await?;
        info!(index, content = %removed.content, "deleted saved entry");
        Ok(removed)
    }

    /// Replaces the collection with an empty one.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.set_typed(SAVED_KEY, &Vec::<SavedEntry>::new()).await?;
        info!("cleared saved entries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::store::{MemBackend, OpenBackend, StorageBackend};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::BTreeMap;

    const SHORT: Duration = Duration::from_millis(50);

    fn entry(content: &str) -> SavedEntry {
        SavedEntry::new(content, Color::BLACK, Color::WHITE, "")
    }

    fn controller(store: &Store) -> SaveController {
        SaveController::new(store.clone()).with_reset_after(SHORT)
    }

    async fn wait_idle(controller: &SaveController) {
        let mut rx = controller.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == SaveState::Idle))
            .await
            .unwrap()
            .unwrap();
    }

    /// Delays reads so a save stays in flight long enough to be interrupted.
    struct SlowBackend(Arc<MemBackend>);

    #[async_trait]
    impl StorageBackend for SlowBackend {
        async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
            tokio::time::sleep(SHORT).await;
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
            self.0.set(key, value).await
        }
        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.0.delete(key).await
        }
        async fn delete_many(&self, keys: &[&str]) -> Result<(), StorageError> {
            self.0.delete_many(keys).await
        }
        async fn list_all(&self) -> Result<BTreeMap<String, Value>, StorageError> {
            self.0.list_all().await
        }
    }

    struct SlowOpener;

    #[async_trait]
    impl OpenBackend for SlowOpener {
        async fn open(&self) -> Result<Arc<dyn StorageBackend>, StorageError> {
            Ok(Arc::new(SlowBackend(MemBackend::new())))
        }
    }

    #[tokio::test]
    async fn test_duplicate_with_new_timestamp_is_detected() {
        let store = Store::in_memory();
        let controller = controller(&store);

        let first = entry("https://example.com");
        assert_eq!(controller.save(first.clone()).await.unwrap(), SaveOutcome::Saved);
        assert_eq!(controller.state(), SaveState::Saved);
        wait_idle(&controller).await;

        let mut again = first.clone();
        again.created_at += 10_000;
        assert_eq!(controller.save(again).await.unwrap(), SaveOutcome::Exists);
        assert_eq!(controller.state(), SaveState::Exists);

        let library = SavedLibrary::new(store);
        assert_eq!(library.list().await.unwrap(), vec![first]);
    }

    #[tokio::test]
    async fn test_saves_are_newest_first() {
        let store = Store::in_memory();
        let controller = controller(&store);
        for content in ["one", "two", "three"] {
            controller.save(entry(content)).await.unwrap();
            wait_idle(&controller).await;
        }
        let listed = SavedLibrary::new(store).list().await.unwrap();
        let contents: Vec<_> = listed.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["three", "two", "one"]);
    }

    #[tokio::test]
    async fn test_reentrant_save_is_ignored() {
        let store = Store::new(SlowOpener);
        let controller = controller(&store);

        let (first, second) = tokio::join!(controller.save(entry("a")), controller.save(entry("b")));
        assert_eq!(first.unwrap(), SaveOutcome::Saved);
        assert_eq!(second.unwrap(), SaveOutcome::Ignored);

        // Still showing "saved", so another request is ignored too
        assert_eq!(controller.save(entry("c")).await.unwrap(), SaveOutcome::Ignored);
        assert_eq!(SavedLibrary::new(store).list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_state_returns_to_idle_after_delay() {
        let controller = controller(&Store::in_memory());
        let mut rx = controller.subscribe();
        controller.save(entry("x")).await.unwrap();

        assert_eq!(*rx.borrow_and_update(), SaveState::Saved);
        tokio::time::timeout(Duration::from_secs(2), rx.changed()).await.unwrap().unwrap();
        assert_eq!(*rx.borrow(), SaveState::Idle);
    }

    #[tokio::test]
    async fn test_storage_error_resets_to_idle() {
        let backend = MemBackend::new();
        let store = Store::with_backend(backend.clone());
        let controller = controller(&store);

        backend.set_simulate_write_error(true);
        assert!(controller.save(entry("x")).await.is_err());
        assert_eq!(controller.state(), SaveState::Idle);

        backend.set_simulate_write_error(false);
        assert_eq!(controller.save(entry("x")).await.unwrap(), SaveOutcome::Saved);
    }

    #[tokio::test]
    async fn test_library_delete_and_clear() {
        let store = Store::in_memory();
        let controller = controller(&store);
        for content in ["a", "b", "c"] {
            controller.save(entry(content)).await.unwrap();
            wait_idle(&controller).await;
        }
        let library = SavedLibrary::new(store.clone());

        let removed = library.delete(1).await.unwrap();
        assert_eq!(removed.content, "b");

        let err = library.delete(5).await.unwrap_err();
        assert!(matches!(err, LibraryError::IndexOutOfRange { index: 5, len: 2 }));
        assert_eq!(library.list().await.unwrap().len(), 2);

        library.clear().await.unwrap();
        assert!(library.list().await.unwrap().is_empty());
        assert_eq!(store.get(SAVED_KEY).await.unwrap(), Some(serde_json::json!([])));
    }
}
