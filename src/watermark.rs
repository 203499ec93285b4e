//! Watermark loading and compositing.
//!
//! A watermark is any image reachable through an http(s) URL, a local path, a `file://` URL
//! or a base64 `data:` URI. Loading is the only genuinely slow step of producing a symbol, so
//! loaded images are kept in a [`WatermarkCache`]: a source that is already loaded resolves
//! immediately, one that is still loading is awaited by every caller, and a failed load is
//! retried on the next request.
//!
//! Images carry an *origin-clean* flag. Drawing an image that is not origin-clean taints the
//! surface, after which it can no longer be exported directly (see [`crate::export`]).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use reqwest::header::{HeaderMap, ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};
use url::Url;

use crate::color::Color;
use crate::render::{RasterSurface, SymbolRequest};

/// Upper bound of the watermark edge, in pixels.
pub const MAX_FOOTPRINT: f64 = 60.0;

/// Extra radius of the light backdrop beyond the watermark clip.
pub const BACKDROP_MARGIN: f64 = 5.0;

/// Opacity of the watermark over its backdrop.
pub const WATERMARK_OPACITY: f32 = 0.9;

/// How a cross-origin watermark is requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Anonymous CORS request: the image only loads when the server grants read access, and
    /// it never taints the surface.
    #[default]
    Cors,
    /// Plain request: any reachable image loads, but cross-origin images taint the surface.
    Opaque,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMode::Cors => f.write_str("cors"),
            FetchMode::Opaque => f.write_str("opaque"),
        }
    }
}

impl FromStr for FetchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cors" => Ok(FetchMode::Cors),
            "opaque" | "no-cors" => Ok(FetchMode::Opaque),
            other => Err(format!("unknown fetch mode '{other}' (expected cors or opaque)")),
        }
    }
}

/// Why a watermark could not be loaded. Never fatal; the symbol is drawn without it.
#[derive(Debug, Error)]
pub enum ResourceLoadError {
    #[error("unsupported watermark scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("invalid watermark source '{0}'")]
    InvalidSource(String),

    #[error("failed to fetch watermark: {0}")]
    Http(#[from] reqwest::Error),

    #[error("watermark request returned {0}")]
    Status(reqwest::StatusCode),

    #[error("cross-origin watermark {0} did not grant read access")]
    CorsDenied(String),

    #[error("failed to read watermark file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed data URI: {0}")]
    DataUri(String),

    #[error("failed to decode watermark image: {0}")]
    Decode(#[from] image::ImageError),
}

/// A decoded watermark and whether its pixels may be read back after drawing.
#[derive(Clone, Debug)]
pub struct WatermarkImage {
    pixels: RgbaImage,
    origin_clean: bool,
}

impl WatermarkImage {
    /// Wraps decoded pixels with their origin-clean flag.
    pub fn new(pixels: RgbaImage, origin_clean: bool) -> Self {
        WatermarkImage {
            pixels,
            origin_clean,
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// `false` when drawing this image must taint the surface.
    pub fn is_origin_clean(&self) -> bool {
        self.origin_clean
    }
}

/// Fetches and decodes watermark sources.
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, source: &str, mode: FetchMode) -> Result<WatermarkImage, ResourceLoadError>;
}

/// The production loader: http(s) through `reqwest`, local files, and base64 data URIs.
///
/// Local files and data URIs are always origin-clean. An http(s) image is origin-clean when it
/// shares the configured origin, or when it was fetched in [`FetchMode::Cors`] and the response
/// allows the origin (or `*`).
pub struct UriImageLoader {
    client: reqwest::Client,
    origin: Option<url::Origin>,
}

impl UriImageLoader {
    /// A loader with a request timeout and no configured origin.
    pub fn new(timeout: Duration) -> Result<Self, ResourceLoadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(UriImageLoader {
            client,
            origin: None,
        })
    }

    /// Sets the origin the application itself is served from.
    pub fn with_origin(mut self, origin: &Url) -> Self {
        self.origin = Some(origin.origin());
        self
    }

    async fn load_http(&self, url: Url, mode: FetchMode) -> Result<WatermarkImage, ResourceLoadError> {
        let same_origin = self.origin.as_ref().is_some_and(|o| *o == url.origin());

        let mut request = self.client.get(url.clone());
        if mode == FetchMode::Cors && !same_origin {
            if let Some(origin) = &self.origin {
                request = request.header(ORIGIN, origin.ascii_serialization());
            }
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ResourceLoadError::Status(response.status()));
        }

        let readable = same_origin
            || (mode == FetchMode::Cors && self.grants_access(response.headers()));
        if mode == FetchMode::Cors && !readable {
            return Err(ResourceLoadError::CorsDenied(url.to_string()));
        }

        let bytes = response.bytes().await?;
        let pixels = image::load_from_memory(&bytes)?.to_rgba8();
        debug!(%url, %mode, readable, "fetched watermark");
        Ok(WatermarkImage::new(pixels, readable))
    }

    fn grants_access(&self, headers: &HeaderMap) -> bool {
        let Some(allowed) = headers
            .get(ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };
        let allowed = allowed.trim();
        allowed == "*"
            || self
                .origin
                .as_ref()
                .is_some_and(|o| o.ascii_serialization() == allowed)
    }

    async fn load_file(&self, path: PathBuf) -> Result<WatermarkImage, ResourceLoadError> {
        let bytes = tokio::fs::read(&path).await?;
        let pixels = image::load_from_memory(&bytes)?.to_rgba8();
        debug!(path = %path.display(), "read watermark file");
        Ok(WatermarkImage::new(pixels, true))
    }
}

#[async_trait]
impl ImageLoader for UriImageLoader {
    async fn load(&self, source: &str, mode: FetchMode) -> Result<WatermarkImage, ResourceLoadError> {
        let source = source.trim();
        if source.starts_with("data:") {
            let bytes = decode_data_uri(source)?;
            let pixels = image::load_from_memory(&bytes)?.to_rgba8();
            return Ok(WatermarkImage::new(pixels, true));
        }

        match Url::parse(source) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => self.load_http(url, mode).await,
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| ResourceLoadError::InvalidSource(source.to_string()))?;
                self.load_file(path).await
            }
            // Single-letter schemes are Windows drive letters
            Ok(url) if url.scheme().len() == 1 => self.load_file(PathBuf::from(source)).await,
            Ok(url) => Err(ResourceLoadError::UnsupportedScheme(url.scheme().to_string())),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                self.load_file(PathBuf::from(source)).await
            }
            Err(_) => Err(ResourceLoadError::InvalidSource(source.to_string())),
        }
    }
}

fn decode_data_uri(source: &str) -> Result<Vec<u8>, ResourceLoadError> {
    let rest = source
        .strip_prefix("data:")
        .ok_or_else(|| ResourceLoadError::DataUri("missing data: prefix".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ResourceLoadError::DataUri("missing ',' separator".into()))?;
    if !meta.ends_with(";base64") {
        return Err(ResourceLoadError::DataUri(
            "only base64-encoded payloads are supported".into(),
        ));
    }
    STANDARD
        .decode(payload.trim())
        .map_err(|e| ResourceLoadError::DataUri(e.to_string()))
}

type CacheSlot = Arc<OnceCell<Arc<WatermarkImage>>>;
type CacheKey = (String, FetchMode);

/// How many decoded watermarks a cache keeps by default.
pub const DEFAULT_CACHE_CAPACITY: usize = 8;

#[derive(Default)]
struct Slots {
    map: HashMap<CacheKey, CacheSlot>,
    /// Least recently used first.
    order: VecDeque<CacheKey>,
}

impl Slots {
    fn touch(&mut self, key: CacheKey, capacity: usize) -> CacheSlot {
        if let Some(pos) = self.order.iter().position(|k| *k == key) {
            self.order.remove(pos);
        }
        let slot = self.map.entry(key.clone()).or_default().clone();
        self.order.push_back(key);
        while self.order.len() > capacity {
            if let Some(evicted) = self.order.pop_front() {
                debug!(source = %evicted.0, mode = %evicted.1, "evicting cached watermark");
                self.map.remove(&evicted);
            }
        }
        slot
    }
}

/// Loaded watermarks keyed by source and fetch mode.
///
/// At most `capacity` entries are kept; the least recently requested one is dropped first.
pub struct WatermarkCache {
    loader: Arc<dyn ImageLoader>,
    capacity: usize,
    slots: Mutex<Slots>,
}

impl WatermarkCache {
    /// A cache holding up to [`DEFAULT_CACHE_CAPACITY`] watermarks.
    pub fn new(loader: Arc<dyn ImageLoader>) -> Self {
        Self::with_capacity(loader, DEFAULT_CACHE_CAPACITY)
    }

    /// A cache holding at most `capacity` entries (at least one).
    pub fn with_capacity(loader: Arc<dyn ImageLoader>, capacity: usize) -> Self {
        WatermarkCache {
            loader,
            capacity: capacity.max(1),
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Number of sources currently cached, loaded or in flight.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Resolves once the image is loaded. Concurrent callers for the same source share one load.
    pub async fn get(&self, source: &str, mode: FetchMode) -> Result<Arc<WatermarkImage>, ResourceLoadError> {
        let slot = self
            .slots
            .lock()
            .await
            .touch((source.to_string(), mode), self.capacity);
        let image = slot
            .get_or_try_init(|| async {
                self.loader.load(source, mode).await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(image))
    }
}

/// Edge length of the watermark for a surface of `size` pixels.
pub fn footprint(size: u32) -> f64 {
    MAX_FOOTPRINT.min(0.25 * f64::from(size))
}

/// Draws the request's watermark, if any, onto `surface`.
///
/// A missing source returns the surface untouched. A source that fails to load is logged and
/// likewise leaves the surface untouched.
pub async fn composite(
    mut surface: RasterSurface,
    request: &SymbolRequest,
    mode: FetchMode,
    cache: &WatermarkCache,
) -> RasterSurface {
    let Some(source) = request.watermark_source() else {
        return surface;
    };
    match cache.get(source, mode).await {
        Ok(image) => draw_watermark(&mut surface, &image, request.light),
        Err(err) => warn!(source, error = %err, "watermark unavailable, keeping plain symbol"),
    }
    surface
}

/// Paints the light backdrop disc and the clipped, translucent watermark at the center.
pub fn draw_watermark(surface: &mut RasterSurface, image: &WatermarkImage, light: Color) {
    let size = surface.size();
    let side = footprint(size);
    let center = f64::from(size) / 2.0;
    let clip_radius = side / 2.0;

    fill_disc(surface.pixels_mut(), center, clip_radius + BACKDROP_MARGIN, light.to_rgba());

    let edge = (side.round() as u32).max(1);
    let scaled = imageops::resize(image.pixels(), edge, edge, FilterType::Triangle);
    let offset = size.saturating_sub(edge) / 2;
    let pixels = surface.pixels_mut();
    for (sx, sy, src) in scaled.enumerate_pixels() {
        let (x, y) = (offset + sx, offset + sy);
        if x >= size || y >= size || !within(x, y, center, clip_radius) {
            continue;
        }
        let alpha = f32::from(src[3]) / 255.0 * WATERMARK_OPACITY;
        blend(pixels.get_pixel_mut(x, y), src, alpha);
    }

    if !image.is_origin_clean() {
        surface.mark_tainted();
    }
}

fn within(x: u32, y: u32, center: f64, radius: f64) -> bool {
    let dx = f64::from(x) + 0.5 - center;
    let dy = f64::from(y) + 0.5 - center;
    dx * dx + dy * dy <= radius * radius
}

fn fill_disc(pixels: &mut RgbaImage, center: f64, radius: f64, color: Rgba<u8>) {
    let (width, height) = pixels.dimensions();
    let low = (center - radius).floor().max(0.0) as u32;
    let high_x = ((center + radius).ceil() as u32).min(width);
    let high_y = ((center + radius).ceil() as u32).min(height);
    for y in low..high_y {
        for x in low..high_x {
            if within(x, y, center, radius) {
                pixels.put_pixel(x, y, color);
            }
        }
    }
}

fn blend(dst: &mut Rgba<u8>, src: &Rgba<u8>, alpha: f32) {
    for c in 0..3 {
        let mixed = f32::from(src[c]) * alpha + f32::from(dst[c]) * (1.0 - alpha);
        dst[c] = mixed.round().clamp(0.0, 255.0) as u8;
    }
    let out_alpha = alpha + f32::from(dst[3]) / 255.0 * (1.0 - alpha);
    dst[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
}
