//! Rasterizing module grids into styled pixel surfaces.

use image::{ImageBuffer, Rgba, RgbaImage};
use tracing::debug;

use crate::color::Color;
use crate::qrcode::{encode, EcLevel, EncodingError, ModuleGrid};

/// Default edge length of a rendered symbol, in pixels.
pub const DEFAULT_SIZE: u32 = 256;

/// Width of the light border around the grid, in modules.
pub const QUIET_ZONE_MODULES: u32 = 2;

/// Everything needed to produce one symbol image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolRequest {
    pub content: String,
    pub size: u32,
    pub dark: Color,
    pub light: Color,
    pub level: EcLevel,
    pub watermark: Option<String>,
}

impl SymbolRequest {
    /// A request with the default size, colors and level and no watermark.
    pub fn new(content: impl Into<String>) -> Self {
        SymbolRequest {
            content: content.into(),
            size: DEFAULT_SIZE,
            dark: Color::BLACK,
            light: Color::WHITE,
            level: EcLevel::default(),
            watermark: None,
        }
    }

    /// Sets the edge length of the output in pixels.
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Sets the colors of dark and light modules.
    pub fn with_colors(mut self, dark: Color, light: Color) -> Self {
        self.dark = dark;
        self.light = light;
        self
    }

    /// Sets the error correction level.
    pub fn with_level(mut self, level: EcLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the watermark source. An empty string clears it.
    pub fn with_watermark(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        self.watermark = if source.trim().is_empty() { None } else { Some(source) };
        self
    }

    /// The watermark source, if one is set and non-blank.
    pub fn watermark_source(&self) -> Option<&str> {
        self.watermark.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// A square RGBA pixel buffer plus the taint flag set by compositing non-origin-clean images.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterSurface {
    pixels: RgbaImage,
    tainted: bool,
}

impl RasterSurface {
    /// Edge length in pixels.
    pub fn size(&self) -> u32 {
        self.pixels.width()
    }

    /// The pixel at `(x, y)`. Panics when out of bounds, like [`RgbaImage::get_pixel`].
    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.pixels.get_pixel(x, y)
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Whether a cross-origin image without read permission was drawn onto this surface.
    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut RgbaImage {
        &mut self.pixels
    }

    pub(crate) fn mark_tainted(&mut self) {
        self.tainted = true;
    }
}

/// Encodes the request's content and paints it onto a fresh `size`x`size` surface.
///
/// # Errors
///
/// Returns an [`EncodingError`] when the size is zero, the content is empty, or the content
/// does not fit any symbol version at the requested level.
///
/// # Example
///
/// ```rust
/// use qrkeep::render::{render, SymbolRequest};
///
/// let surface = render(&SymbolRequest::new("https://example.com")).unwrap();
/// assert_eq!(surface.size(), 256);
/// ```
pub fn render(request: &SymbolRequest) -> Result<RasterSurface, EncodingError> {
    if request.size == 0 {
        return Err(EncodingError::ZeroSize);
    }
    let grid = encode(&request.content, request.level)?;
    debug!(
        version = grid.version(),
        modules = grid.dimension(),
        level = %request.level,
        size = request.size,
        "encoded symbol"
    );
    Ok(paint_grid(&grid, request.size, request.dark, request.light))
}

/// Paints `grid` scaled to exactly `size` pixels, quiet zone included.
///
/// Pixels are visited in row-major order; the module under each pixel is found by
/// fractional scaling so the output always matches `size` regardless of the grid dimension.
pub fn paint_grid(grid: &ModuleGrid, size: u32, dark: Color, light: Color) -> RasterSurface {
    let modules = grid.dimension() as f64;
    let scale = f64::from(size) / (modules + 2.0 * f64::from(QUIET_ZONE_MODULES));
    let margin = f64::from(QUIET_ZONE_MODULES) * scale;
    let inner_end = f64::from(size) - margin;
    let last = grid.dimension() - 1;

    let dark = dark.to_rgba();
    let light = light.to_rgba();
    let mut img: RgbaImage = ImageBuffer::new(size, size);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let (px, py) = (f64::from(x), f64::from(y));
        let inside = px >= margin && py >= margin && px < inner_end && py < inner_end;
        *pixel = if inside {
            let mx = (((px - margin) / scale) as usize).min(last);
            let my = (((py - margin) / scale) as usize).min(last);
            if grid.is_dark(mx, my) {
                dark
            } else {
                light
            }
        } else {
            light
        };
    }

    RasterSurface {
        pixels: img,
        tainted: false,
    }
}
