//! # qrkeep
//!
//! Render QR codes with an optional watermark, export them as PNG, and keep a library of the ones
//! worth keeping.
//!
//! `qrkeep` encodes text into QR Code Model 2 symbols (versions 1 to 40, four error correction
//! levels), paints them onto an RGBA surface with a quiet zone, and optionally places a circular
//! watermark image in the middle. Watermarks can come from http(s) URLs, local files or data URIs.
//! A surface that picked up a cross-origin image it was not allowed to read is *tainted*; exporting
//! it transparently renders the symbol again with a CORS fetch.
//!
//! Saved symbols and session defaults live in a small JSON key-value store.
//!
//! ## Features
//!
//! - Encode data in numeric, alphanumeric or byte mode.
//! - Four error correction levels: Low, Medium, Quartile, High.
//! - Watermarks with a light backdrop disc, fetched once per source and fetch mode.
//! - Stale render passes never overwrite a newer one.
//! - Saved collection without duplicates, newest first.
//!
//! ## Example
//!
//! Render a symbol and write it to disk:
//!
//! ```rust,no_run
//! use qrkeep::{render, Color, EcLevel, SymbolRequest};
//!
//! let request = SymbolRequest::new("https://example.com")
//!     .with_colors(Color::BLACK, Color::WHITE)
//!     .with_level(EcLevel::Medium);
//! let surface = render(&request).expect("content fits");
//! let png = qrkeep::export::serialize(&surface).expect("surface is clean");
//! std::fs::write("qrcode.png", png).expect("failed to write file");
//! ```
//!
//! Save it to a store, skipping duplicates:
//!
//! ```rust,no_run
//! use qrkeep::{SaveController, SaveOutcome, SavedEntry, Color, Store};
//!
//! # async fn run() -> Result<(), qrkeep::store::StorageError> {
//! let store = Store::open_dir("data");
//! let saver = SaveController::new(store);
//! let entry = SavedEntry::new("https://example.com", Color::BLACK, Color::WHITE, "");
//! assert_eq!(saver.save(entry).await?, SaveOutcome::Saved);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`qrcode`]: Core QR code encoding.
//! - [`render`]: Painting module grids onto pixel surfaces.
//! - [`watermark`]: Loading, caching and compositing watermark images.
//! - [`canvas`]: The live surface and its stale-pass guard.
//! - [`export`]: PNG export with the taint fallback.
//! - [`store`]: The persistent key-value store.
//! - [`saved`]: The saved collection and the save controller.
//! - [`preferences`]: Persisted session defaults.
//! - [`settings`]: Process-level settings.

pub mod app;
pub mod canvas;
pub mod color;
pub mod error;
pub mod export;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod preferences;
pub mod qrcode;
pub mod render;
pub mod saved;
pub mod settings;
pub mod store;
pub mod watermark;

pub use app::App;
pub use canvas::{Canvas, DrawOutcome};
pub use color::Color;
pub use error::{Error, Result};
pub use export::{ExportError, Exporter};
pub use model::{Config, SavedEntry};
pub use pipeline::{Frame, Pipeline};
pub use preferences::Preferences;
pub use qrcode::{encode, EcLevel, EncodingError, ModuleGrid};
pub use render::{render, RasterSurface, SymbolRequest};
pub use saved::{SaveController, SaveOutcome, SaveState, SavedLibrary};
pub use settings::Settings;
pub use store::Store;
pub use watermark::{FetchMode, UriImageLoader, WatermarkCache};
