//! PNG export with a taint fallback.
//!
//! Export is two explicit stages. The displayed surface is serialized directly; if that is
//! refused because a cross-origin watermark tainted it, the request is rendered again into a
//! fresh surface with the watermark fetched in [`FetchMode::Cors`], and that surface is
//! serialized instead. Only when the second stage fails too is an error reported.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use image::ImageFormat;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

use crate::pipeline::{Frame, Pipeline};
use crate::qrcode::EncodingError;
use crate::render::RasterSurface;
use crate::watermark::FetchMode;

/// File name used when the caller does not pick one.
pub const DEFAULT_FILENAME: &str = "qrcode.png";

/// Reasons a frame could not be exported.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("surface was tainted by a cross-origin watermark and cannot be read back")]
    Tainted,

    #[error("failed to encode PNG: {0}")]
    Encode(#[from] image::ImageError),

    #[error("failed to render symbol: {0}")]
    Encoding(#[from] EncodingError),

    #[error("fallback export failed: {0}")]
    FallbackFailed(#[source] Box<ExportError>),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Serializes a surface to PNG bytes, refusing tainted surfaces.
pub fn serialize(surface: &RasterSurface) -> Result<Vec<u8>, ExportError> {
    if surface.is_tainted() {
        return Err(ExportError::Tainted);
    }
    let mut buf = Cursor::new(Vec::new());
    surface.pixels().write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Turns committed frames into PNG bytes or files.
pub struct Exporter {
    pipeline: Pipeline,
}

impl Exporter {
    /// An exporter that re-runs `pipeline` when a frame is tainted.
    ///
    /// Use the same pipeline as the canvas so the fallback shares its watermark cache.
    pub fn new(pipeline: Pipeline) -> Self {
        Exporter { pipeline }
    }

    /// Returns PNG bytes for the frame, taking the fallback path when the surface is tainted.
    pub async fn export(&self, frame: &Frame) -> Result<Vec<u8>, ExportError> {
        match serialize(&frame.surface) {
            Err(ExportError::Tainted) => {
                warn!("surface is tainted, re-rendering with a CORS watermark fetch");
                self.fallback(frame).await
            }
            other => other,
        }
    }

    async fn fallback(&self, frame: &Frame) -> Result<Vec<u8>, ExportError> {
        let fresh = self
            .pipeline
            .run(&frame.request, FetchMode::Cors)
            .await
            .map_err(|e| ExportError::FallbackFailed(Box::new(e.into())))?;
        serialize(&fresh).map_err(|e| ExportError::FallbackFailed(Box::new(e)))
    }

    /// Exports the frame into `path`. Nothing is written unless export succeeds, and the file
    /// appears atomically.
    pub async fn export_to_file(&self, frame: &Frame, path: &Path) -> Result<(), ExportError> {
        let bytes = self.export(frame).await?;
        let io_err = |source: std::io::Error| ExportError::Io {
            path: path.to_path_buf(),
            source,
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        info!(path = %path.display(), bytes = bytes.len(), "exported symbol");
        Ok(())
    }
}
