//! Persisted session defaults.
//!
//! Every change to the [`Config`] is written to the store immediately.

use tracing::{info, warn};

use crate::model::{Config, CONFIG_KEY, SAVED_KEY};
use crate::store::{StorageError, Store};

/// Read and write access to the stored [`Config`].
#[derive(Clone)]
pub struct Preferences {
    store: Store,
}

impl Preferences {
    pub fn new(store: Store) -> Self {
        Preferences { store }
    }

    /// The stored config, or the defaults (persisted on the way out) when nothing is stored yet.
    pub async fn load(&self) -> Result<Config, StorageError> {
        if let Some(config) = self.store.get_typed(CONFIG_KEY).await? {
            return Ok(config);
        }
        let config = Config::default();
        self.store.set_typed(CONFIG_KEY, &config).await?;
        Ok(config)
    }

    /// Like [`Preferences::load`], but a storage failure is logged and the defaults are used.
    pub async fn load_or_default(&self) -> Config {
        match self.load().await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "failed to load preferences, using defaults");
                Config::default()
            }
        }
    }

    /// Applies `change` to the current config and persists the result.
    pub async fn update(&self, change: impl FnOnce(&mut Config)) -> Result<Config, StorageError> {
        let mut config = self.load().await?;
        change(&mut config);
        self.store.set_typed(CONFIG_KEY, &config).await?;
        Ok(config)
    }

    /// Replaces the stored config with the defaults.
    pub async fn reset(&self) -> Result<Config, StorageError> {
        let config = Config::default();
        self.store.set_typed(CONFIG_KEY, &config).await?;
        info!("reset preferences to defaults");
        Ok(config)
    }

    /// Deletes the config and every saved entry in one store mutation.
    pub async fn clear_all_data(&self) -> Result<(), StorageError> {
        self.store.delete_many(&[CONFIG_KEY, SAVED_KEY]).await?;
        info!("cleared all stored data");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::store::{MemBackend, STORE_FILE};
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_initializes_defaults() {
        let store = Store::in_memory();
        let prefs = Preferences::new(store.clone());
        assert_eq!(prefs.load().await.unwrap(), Config::default());
        assert_eq!(
            store.get(CONFIG_KEY).await.unwrap(),
            Some(json!({"bg": "#ffffff", "fg": "#000000", "watermark": ""}))
        );
    }

    #[tokio::test]
    async fn test_update_round_trips_through_store() {
        let dir = TempDir::new().unwrap();
        let prefs = Preferences::new(Store::open_dir(dir.path()));
        prefs
            .update(|c| {
                c.dark = Color::rgb(0x33, 0x00, 0x99);
                c.watermark = "https://cdn.example/logo.png".to_string();
            })
            .await
            .unwrap();

        let reopened = Preferences::new(Store::open_dir(dir.path()));
        let config = reopened.load().await.unwrap();
        assert_eq!(config.dark, Color::rgb(0x33, 0x00, 0x99));
        assert_eq!(config.light, Color::WHITE);
        assert_eq!(config.watermark, "https://cdn.example/logo.png");
    }

    #[tokio::test]
    async fn test_reset_restores_defaults() {
        let prefs = Preferences::new(Store::in_memory());
        prefs.update(|c| c.light = Color::rgb(1, 1, 1)).await.unwrap();
        prefs.reset().await.unwrap();
        assert_eq!(prefs.load().await.unwrap(), Config::default());
    }

    #[tokio::test]
    async fn test_load_or_default_absorbs_corrupt_store() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STORE_FILE), b"{not json").unwrap();
        let prefs = Preferences::new(Store::open_dir(dir.path()));
        assert!(prefs.load().await.is_err());
        assert_eq!(prefs.load_or_default().await, Config::default());
    }

    #[tokio::test]
    async fn test_failed_clear_all_data_keeps_both_keys() {
        let backend = MemBackend::new();
        let store = Store::with_backend(backend.clone());
        let prefs = Preferences::new(store.clone());
        prefs.load().await.unwrap();
        store.set(SAVED_KEY, json!([])).await.unwrap();

        backend.set_simulate_write_error(true);
        assert!(prefs.clear_all_data().await.is_err());
        assert!(store.get(CONFIG_KEY).await.unwrap().is_some());
        assert!(store.get(SAVED_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_all_data_removes_both_keys() {
        let store = Store::in_memory();
        let prefs = Preferences::new(store.clone());
        prefs.load().await.unwrap();
        store.set(SAVED_KEY, json!([])).await.unwrap();
        store.set("unrelated", json!(1)).await.unwrap();

        prefs.clear_all_data().await.unwrap();
        assert_eq!(store.get(CONFIG_KEY).await.unwrap(), None);
        assert_eq!(store.get(SAVED_KEY).await.unwrap(), None);
        assert_eq!(store.get("unrelated").await.unwrap(), Some(json!(1)));
    }
}
