//! Wires settings, store and pipeline into the operations a front end needs.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::canvas::{Canvas, DrawOutcome};
use crate::error::Result;
use crate::export::Exporter;
use crate::model::{Config, SavedEntry};
use crate::pipeline::{Frame, Pipeline};
use crate::preferences::Preferences;
use crate::render::SymbolRequest;
use crate::saved::{SaveController, SaveOutcome, SavedLibrary};
use crate::settings::Settings;
use crate::store::Store;
use crate::watermark::{ImageLoader, UriImageLoader, WatermarkCache};

/// The assembled application: one store, one watermark cache and the components sharing them.
pub struct App {
    settings: Settings,
    canvas: Canvas,
    exporter: Exporter,
    preferences: Preferences,
    library: SavedLibrary,
    saver: SaveController,
}

impl App {
    /// Opens the store under the configured data directory and loads watermarks over the network.
    pub fn new(settings: Settings) -> Result<Self> {
        let store = Store::open_dir(settings.data_dir()?);
        let mut loader = UriImageLoader::new(settings.http_timeout())?;
        if let Some(origin) = settings.origin_url()? {
            loader = loader.with_origin(&origin);
        }
        Ok(Self::with_parts(settings, store, Arc::new(loader)))
    }

    /// Builds the application from an already opened store and a custom image loader.
    pub fn with_parts(settings: Settings, store: Store, loader: Arc<dyn ImageLoader>) -> Self {
        let cache = Arc::new(WatermarkCache::new(loader));
        let pipeline = Pipeline::new(cache, settings.watermark_fetch);
        App {
            exporter: Exporter::new(pipeline.clone()),
            canvas: Canvas::new(pipeline),
            preferences: Preferences::new(store.clone()),
            library: SavedLibrary::new(store.clone()),
            saver: SaveController::new(store),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn library(&self) -> &SavedLibrary {
        &self.library
    }

    pub fn saver(&self) -> &SaveController {
        &self.saver
    }

    /// A request for `content` using the configured size, level, colors and watermark.
    pub fn request(&self, content: impl Into<String>, config: &Config) -> SymbolRequest {
        config
            .request(content)
            .with_size(self.settings.default_size)
            .with_level(self.settings.default_level)
    }

    /// A request for `content` from the stored defaults, or the built-in defaults when the store
    /// cannot be read.
    pub async fn default_request(&self, content: impl Into<String>) -> SymbolRequest {
        let config = self.preferences.load_or_default().await;
        self.request(content, &config)
    }

    /// Draws `request` on the canvas and returns the frame now showing.
    pub async fn generate(&self, request: SymbolRequest) -> Result<Option<Frame>> {
        match self.canvas.draw(request).await? {
            DrawOutcome::Committed(frame) => Ok(Some(frame)),
            DrawOutcome::Superseded => {
                debug!("pass superseded, using the latest frame");
                Ok(self.canvas.frame().await)
            }
        }
    }

    /// Draws `request` and exports the result to `path`.
    pub async fn generate_to_file(&self, request: SymbolRequest, path: &Path) -> Result<Option<Frame>> {
        let frame = self.generate(request).await?;
        if let Some(frame) = &frame {
            self.exporter.export_to_file(frame, path).await?;
        }
        Ok(frame)
    }

    /// Runs the save controller for `request`.
    pub async fn save(&self, request: &SymbolRequest) -> Result<SaveOutcome> {
        Ok(self.saver.save(SavedEntry::from_request(request)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::watermark::{FetchMode, ResourceLoadError, WatermarkImage};
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};

    struct FixedLoader;

    #[async_trait]
    impl ImageLoader for FixedLoader {
        async fn load(&self, _source: &str, mode: FetchMode) -> std::result::Result<WatermarkImage, ResourceLoadError> {
            let pixels = RgbaImage::from_pixel(8, 8, Rgba([10, 200, 10, 255]));
            Ok(WatermarkImage::new(pixels, mode == FetchMode::Cors))
        }
    }

    fn app(settings: Settings) -> App {
        App::with_parts(settings, Store::in_memory(), Arc::new(FixedLoader))
    }

    #[tokio::test]
    async fn test_request_uses_settings_and_config() {
        let settings = Settings {
            default_size: 300,
            default_level: crate::qrcode::EcLevel::Quartile,
            ..Settings::default()
        };
        let app = app(settings);
        let config = app
            .preferences()
            .update(|c| c.dark = Color::rgb(0x12, 0x34, 0x56))
            .await
            .unwrap();

        let request = app.request("hello", &config);
        assert_eq!(request.size, 300);
        assert_eq!(request.level, crate::qrcode::EcLevel::Quartile);
        assert_eq!(request.dark, Color::rgb(0x12, 0x34, 0x56));
        assert!(request.watermark.is_none());
    }

    #[tokio::test]
    async fn test_generate_to_file_with_opaque_display_mode() {
        let settings = Settings {
            watermark_fetch: FetchMode::Opaque,
            ..Settings::default()
        };
        let app = app(settings);
        let request = SymbolRequest::new("https://example.com").with_watermark("https://cdn.example/w.png");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");

        let frame = app.generate_to_file(request, &path).await.unwrap().unwrap();
        assert!(frame.surface.is_tainted());
        assert_eq!(image::open(&path).unwrap().width(), 256);
    }
}
