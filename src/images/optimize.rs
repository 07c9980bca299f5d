//! Downscaling pass over stored images

use crate::images::fetcher::write_jpeg;
use crate::images::{ImageError, ImageFetcher};
use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Counts from one [`ImageFetcher::optimize`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub resized: u32,
    pub untouched: u32,
    pub failed: u32,
}

impl ImageFetcher {
    /// Shrinks a listing's images to at most `images.max_width` pixels wide
    ///
    /// JPEG files are re-encoded at `images.quality`; other formats keep their
    /// format. Images already within the width are left alone, so running the
    /// pass twice changes nothing the second time.
    pub async fn optimize(&self, listing_id: &str) -> Result<OptimizeStats, ImageError> {
        let dir = self.root.join(listing_id);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            warn!("No image directory for {}", listing_id);
            return Ok(OptimizeStats::default());
        }

        let max_width = self.max_width;
        let quality = self.quality;
        let stats = tokio::task::spawn_blocking(move || optimize_dir(&dir, max_width, quality))
            .await
            .map_err(|e| ImageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        info!(
            "Optimized images of {}: {} resized, {} untouched, {} failed",
            listing_id, stats.resized, stats.untouched, stats.failed
        );
        Ok(stats)
    }
}

fn optimize_dir(dir: &Path, max_width: u32, quality: u8) -> Result<OptimizeStats, ImageError> {
    let mut stats = OptimizeStats::default();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match optimize_file(&path, max_width, quality) {
            Ok(true) => stats.resized += 1,
            Ok(false) => stats.untouched += 1,
            Err(e) => {
                warn!("Could not optimize {}: {}", path.display(), e);
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}

/// Returns true when the file was rewritten
fn optimize_file(path: &Path, max_width: u32, quality: u8) -> Result<bool, ImageError> {
    let decode_err = |e: image::ImageError| ImageError::Decode {
        url: path.display().to_string(),
        message: e.to_string(),
    };

    // Formats are sniffed from content; the extension may not match
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader.format();
    let (width, height) = reader.into_dimensions().map_err(decode_err)?;
    if width <= max_width {
        return Ok(false);
    }

    let image = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(decode_err)?;
    let new_height = ((height as f64) * (max_width as f64) / (width as f64)).round().max(1.0) as u32;
    let resized = image.resize_exact(max_width, new_height, FilterType::Lanczos3);
    debug!("{}: {}x{} -> {}x{}", path.display(), width, height, max_width, new_height);

    match format {
        Some(ImageFormat::Jpeg) | None => write_jpeg(&resized, path, quality)?,
        Some(format) => resized
            .save_with_format(path, format)
            .map_err(|e| ImageError::Encode {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?,
    }
    Ok(true)
}
