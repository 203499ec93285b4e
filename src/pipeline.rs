//! The render + composite pass shared by the live canvas and the export fallback.

use std::sync::Arc;

use tracing::debug;

use crate::qrcode::EncodingError;
use crate::render::{render, RasterSurface, SymbolRequest};
use crate::watermark::{composite, FetchMode, WatermarkCache};

/// A finished pass: the request and the surface it produced.
#[derive(Clone, Debug)]
pub struct Frame {
    pub request: SymbolRequest,
    pub surface: Arc<RasterSurface>,
}

/// Produces decorated surfaces from requests.
#[derive(Clone)]
pub struct Pipeline {
    cache: Arc<WatermarkCache>,
    display_mode: FetchMode,
}

impl Pipeline {
    /// A pipeline drawing watermarks from `cache`, using `display_mode` for on-screen passes.
    pub fn new(cache: Arc<WatermarkCache>, display_mode: FetchMode) -> Self {
        Pipeline {
            cache,
            display_mode,
        }
    }

    /// The fetch mode used for on-screen passes.
    pub fn display_mode(&self) -> FetchMode {
        self.display_mode
    }

    /// Renders the request and composites its watermark fetched in `mode`.
    pub async fn run(&self, request: &SymbolRequest, mode: FetchMode) -> Result<RasterSurface, EncodingError> {
        let surface = render(request)?;
        let surface = composite(surface, request, mode, &self.cache).await;
        debug!(size = surface.size(), tainted = surface.is_tainted(), %mode, "pipeline pass finished");
        Ok(surface)
    }

    /// Runs the pass in the display fetch mode.
    pub async fn run_for_display(&self, request: &SymbolRequest) -> Result<RasterSurface, EncodingError> {
        self.run(request, self.display_mode).await
    }
}
