use std::{io, path::PathBuf};

use thiserror::Error;

/// Failure to obtain a decoded raster from an [`crate::raster::ImageSource`].
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read image file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to fetch image from {url}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("image request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("malformed data URL: {0}")]
    DataUrl(String),
    #[error("failed to decode image")]
    Decode(#[from] image::ImageError),
    #[error("image has zero size ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
}

#[derive(Debug, Error)]
pub enum TryOnError {
    #[error("hand photo could not be loaded")]
    HandPhoto(#[source] LoadError),
    #[error("design photo could not be loaded")]
    DesignPhoto(#[source] LoadError),
    #[error("failed to encode composite image")]
    Encode(#[source] image::ImageError),
    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TryOnError {
    /// True when one of the input photos was unreachable or undecodable.
    pub fn is_decode(&self) -> bool {
        matches!(self, TryOnError::HandPhoto(_) | TryOnError::DesignPhoto(_))
    }

    pub fn load_error(&self) -> Option<&LoadError> {
        match self {
            TryOnError::HandPhoto(err) | TryOnError::DesignPhoto(err) => Some(err),
            _ => None,
        }
    }
}
