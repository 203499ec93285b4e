use thiserror::Error;

use crate::color::ColorParseError;
use crate::export::ExportError;
use crate::qrcode::EncodingError;
use crate::saved::LibraryError;
use crate::settings::SettingsError;
use crate::store::StorageError;
use crate::watermark::ResourceLoadError;

/// Any failure the library can report.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    ResourceLoad(#[from] ResourceLoadError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Color(#[from] ColorParseError),
}

pub type Result<T> = std::result::Result<T, Error>;
