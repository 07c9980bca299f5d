//! Listing images: download, validation and maintenance
//!
//! Images live under `images.path`, one directory per listing id. Paths
//! recorded on listings are relative to that root (`<listing_id>/<file>`).

mod fetcher;
mod optimize;

pub use fetcher::{image_file_name, image_stem, ImageBatch, ImageFetcher};
pub use optimize::OptimizeStats;

use std::path::PathBuf;
use thiserror::Error;

/// Image pipeline errors
///
/// Only [`ImageError::Destination`] escapes [`ImageFetcher::download`]; the
/// other variants describe single-image failures, which are logged and counted.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Cannot create image directory {path}: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    #[error("Invalid image from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Failed to encode {path}: {message}")]
    Encode { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
