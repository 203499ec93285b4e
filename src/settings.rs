//! Process-level settings read from `settings.toml`.
//!
//! The file lives in the platform config directory and every field is optional. Two
//! environment variables override the file: `QRKEEP_DATA_DIR` and `QRKEEP_WATERMARK_FETCH`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::qrcode::EcLevel;
use crate::render::DEFAULT_SIZE;
use crate::watermark::FetchMode;

/// File name of the settings file inside the config directory.
pub const SETTINGS_FILE: &str = "settings.toml";
/// Overrides `data_dir`.
pub const ENV_DATA_DIR: &str = "QRKEEP_DATA_DIR";
/// Overrides `watermark_fetch`; accepts `cors`, `opaque` or `no-cors`.
pub const ENV_WATERMARK_FETCH: &str = "QRKEEP_WATERMARK_FETCH";

/// Problems reading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("could not determine a home directory for settings and data")]
    NoProjectDirs,
}

/// Settings for one process. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where the store lives. Defaults to the platform data directory.
    pub data_dir: Option<PathBuf>,
    /// Fetch mode used when loading watermarks for display.
    pub watermark_fetch: FetchMode,
    /// Origin that cross-origin watermark hosts must grant access to.
    pub origin: Option<String>,
    pub http_timeout_secs: u64,
    pub default_size: u32,
    pub default_level: EcLevel,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: None,
            watermark_fetch: FetchMode::default(),
            origin: None,
            http_timeout_secs: 10,
            default_size: DEFAULT_SIZE,
            default_level: EcLevel::default(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "qrkeep", "qrkeep")
}

impl Settings {
    /// `<config dir>/settings.toml`, if the platform has a config directory.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
    }

    /// Loads settings from `path` (or the default location) and applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overrides fields from environment variables, looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), SettingsError> {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(mode) = lookup(ENV_WATERMARK_FETCH).filter(|v| !v.is_empty()) {
            self.watermark_fetch = mode.parse().map_err(|message| SettingsError::InvalidValue {
                field: ENV_WATERMARK_FETCH.to_string(),
                message,
            })?;
        }
        Ok(())
    }

    /// Rejects zero sizes and timeouts and an unparseable origin.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.default_size == 0 {
            return Err(SettingsError::InvalidValue {
                field: "default_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.http_timeout_secs == 0 {
            return Err(SettingsError::InvalidValue {
                field: "http_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        self.origin_url()?;
        Ok(())
    }

    /// The configured data directory, or the platform default.
    pub fn data_dir(&self) -> Result<PathBuf, SettingsError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => project_dirs()
                .map(|dirs| dirs.data_dir().to_path_buf())
                .ok_or(SettingsError::NoProjectDirs),
        }
    }

    /// The configured origin parsed as a URL.
    pub fn origin_url(&self) -> Result<Option<Url>, SettingsError> {
        self.origin
            .as_deref()
            .map(|origin| {
                Url::parse(origin).map_err(|e| SettingsError::InvalidValue {
                    field: "origin".to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::from_file(&dir.path().join(SETTINGS_FILE)).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.default_size, 256);
        assert_eq!(settings.watermark_fetch, FetchMode::Cors);
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            "watermark_fetch = \"opaque\"\ndefault_level = \"H\"\norigin = \"https://qr.example\"\n",
        )
        .unwrap();
        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.watermark_fetch, FetchMode::Opaque);
        assert_eq!(settings.default_level, EcLevel::High);
        assert_eq!(settings.http_timeout_secs, 10);
        assert_eq!(settings.origin_url().unwrap().unwrap().host_str(), Some("qr.example"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "default_size = \"big\"").unwrap();
        assert!(matches!(Settings::from_file(&path), Err(SettingsError::Parse { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(|key| match key {
                ENV_DATA_DIR => Some("/tmp/qrkeep-data".to_string()),
                ENV_WATERMARK_FETCH => Some("no-cors".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(settings.data_dir().unwrap(), PathBuf::from("/tmp/qrkeep-data"));
        assert_eq!(settings.watermark_fetch, FetchMode::Opaque);

        let err = settings
            .apply_env(|key| (key == ENV_WATERMARK_FETCH).then(|| "sideways".to_string()))
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { .. }));
    }

    #[test]
    fn test_validation() {
        let zero = Settings {
            default_size: 0,
            ..Settings::default()
        };
        assert!(zero.validate().is_err());

        let bad_origin = Settings {
            origin: Some("not a url".to_string()),
            ..Settings::default()
        };
        assert!(bad_origin.validate().is_err());
        assert!(Settings::default().validate().is_ok());
    }
}
