//! The logical canvas: the latest committed frame plus a guard against stale passes.
//!
//! Every call to [`Canvas::draw`] starts a new generation. A pass only commits its pixels if no
//! newer pass has started in the meantime, so a slow watermark load can never overwrite a
//! surface that a faster, newer pass already produced. Superseded passes still run to
//! completion; their output is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::pipeline::{Frame, Pipeline};
use crate::qrcode::EncodingError;
use crate::render::SymbolRequest;

/// What became of a [`Canvas::draw`] pass.
#[derive(Clone, Debug)]
pub enum DrawOutcome {
    Committed(Frame),
    /// A newer pass started before this one finished.
    Superseded,
}

/// A logical drawing surface fed by a [`Pipeline`].
pub struct Canvas {
    pipeline: Pipeline,
    generation: AtomicU64,
    current: RwLock<Option<Frame>>,
}

impl Canvas {
    /// An empty canvas; nothing is shown until the first committed draw.
    pub fn new(pipeline: Pipeline) -> Self {
        Canvas {
            pipeline,
            generation: AtomicU64::new(0),
            current: RwLock::new(None),
        }
    }

    /// Regenerates the canvas for `request`.
    ///
    /// On an encoding error the previously committed frame stays visible and the error is
    /// returned, unless the pass was already superseded.
    pub async fn draw(&self, request: SymbolRequest) -> Result<DrawOutcome, EncodingError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.pipeline.run_for_display(&request).await;

        let mut current = self.current.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "discarding superseded pass");
            return Ok(DrawOutcome::Superseded);
        }
        let frame = Frame {
            request,
            surface: Arc::new(result?),
        };
        *current = Some(frame.clone());
        Ok(DrawOutcome::Committed(frame))
    }

    /// The most recently committed frame.
    pub async fn frame(&self) -> Option<Frame> {
        self.current.read().await.clone()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::watermark::{FetchMode, ImageLoader, ResourceLoadError, WatermarkCache, WatermarkImage};
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;

    struct SlowLoader(Duration);

    #[async_trait]
    impl ImageLoader for SlowLoader {
        async fn load(&self, _source: &str, _mode: FetchMode) -> Result<WatermarkImage, ResourceLoadError> {
            tokio::time::sleep(self.0).await;
            Ok(WatermarkImage::new(RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])), true))
        }
    }

    fn canvas() -> Canvas {
        let cache = Arc::new(WatermarkCache::new(Arc::new(SlowLoader(Duration::from_millis(100)))));
        Canvas::new(Pipeline::new(cache, FetchMode::Cors))
    }

    #[tokio::test]
    async fn test_stale_pass_does_not_overwrite_newer_frame() {
        let canvas = canvas();
        let slow = SymbolRequest::new("first").with_watermark("https://cdn.example/logo.png");
        let fast = SymbolRequest::new("second");

        let (old, new) = tokio::join!(canvas.draw(slow), canvas.draw(fast.clone()));
        assert!(matches!(old.unwrap(), DrawOutcome::Superseded));
        assert!(matches!(new.unwrap(), DrawOutcome::Committed(_)));

        let frame = canvas.frame().await.unwrap();
        assert_eq!(frame.request, fast);
    }

    #[tokio::test]
    async fn test_encoding_error_keeps_last_good_frame() {
        let canvas = canvas();
        let good = SymbolRequest::new("good").with_colors(Color::BLACK, Color::WHITE);
        canvas.draw(good.clone()).await.unwrap();

        let err = canvas.draw(SymbolRequest::new("")).await.unwrap_err();
        assert_eq!(err, EncodingError::EmptyContent);
        assert_eq!(canvas.frame().await.unwrap().request, good);
    }

    #[tokio::test]
    async fn test_sequential_draws_replace_frame() {
        let canvas = canvas();
        assert!(canvas.frame().await.is_none());
        canvas.draw(SymbolRequest::new("one")).await.unwrap();
        canvas.draw(SymbolRequest::new("two").with_size(128)).await.unwrap();
        let frame = canvas.frame().await.unwrap();
        assert_eq!(frame.request.content, "two");
        assert_eq!(frame.surface.size(), 128);
    }
}
