//! Persisted records and the store keys they live under.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::render::SymbolRequest;

/// Store key holding the [`Config`].
pub const CONFIG_KEY: &str = "config";

/// Store key holding the saved collection, newest first.
pub const SAVED_KEY: &str = "savedQrs";

/// Defaults for new sessions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "bg", default = "default_light")]
    pub light: Color,
    #[serde(rename = "fg", default = "default_dark")]
    pub dark: Color,
    /// Empty when no watermark is configured.
    #[serde(default)]
    pub watermark: String,
}

fn default_light() -> Color {
    Color::WHITE
}

fn default_dark() -> Color {
    Color::BLACK
}

impl Default for Config {
    fn default() -> Self {
        Config {
            light: default_light(),
            dark: default_dark(),
            watermark: String::new(),
        }
    }
}

impl Config {
    /// Applies the configured colors and watermark to a request for `content`.
    pub fn request(&self, content: impl Into<String>) -> SymbolRequest {
        SymbolRequest::new(content)
            .with_colors(self.dark, self.light)
            .with_watermark(self.watermark.clone())
    }
}

/// One saved symbol. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedEntry {
    #[serde(rename = "value")]
    pub content: String,
    #[serde(rename = "bg")]
    pub light: Color,
    #[serde(rename = "fg")]
    pub dark: Color,
    #[serde(default)]
    pub watermark: String,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "timestamp")]
    pub created_at: i64,
}

impl SavedEntry {
    /// A new entry stamped with the current time.
    pub fn new(content: impl Into<String>, dark: Color, light: Color, watermark: impl Into<String>) -> Self {
        SavedEntry {
            content: content.into(),
            light,
            dark,
            watermark: watermark.into(),
            created_at: Utc::now().timestamp_millis(),
        }
    }

    /// The entry describing `request`. Size and level are not part of an entry.
    pub fn from_request(request: &SymbolRequest) -> Self {
        Self::new(
            request.content.clone(),
            request.dark,
            request.light,
            request.watermark_source().unwrap_or_default(),
        )
    }

    /// Two entries describe the same symbol when everything but the timestamp matches.
    pub fn same_identity(&self, other: &SavedEntry) -> bool {
        self.content == other.content
            && self.dark == other.dark
            && self.light == other.light
            && self.watermark == other.watermark
    }

    /// Creation time, or `None` if the stored timestamp is out of range.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.created_at).single()
    }

    /// A request that redraws the entry at the default size and level.
    pub fn to_request(&self) -> SymbolRequest {
        SymbolRequest::new(self.content.clone())
            .with_colors(self.dark, self.light)
            .with_watermark(self.watermark.clone())
    }
}
