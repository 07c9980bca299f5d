//! Concurrent image downloader

use crate::config::ImageConfig;
use crate::images::ImageError;
use crate::HarvestError;
use futures::stream::{self, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Extensions a stored image can have
const STORED_EXTENSIONS: &[&str] = &["jpg", "png", "gif"];

/// Quality used when transcoding WEBP downloads
const TRANSCODE_QUALITY: u8 = 90;

/// Outcome of downloading one listing's images
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageBatch {
    /// Stored images, relative to the image root, in input order
    pub paths: Vec<String>,
    pub failed: u32,
}

/// Downloads listing images into per-listing directories
pub struct ImageFetcher {
    client: Client,
    pub(crate) root: PathBuf,
    max_per_car: usize,
    concurrency: usize,
    timeout: Duration,
    pub(crate) max_width: u32,
    pub(crate) quality: u8,
}

/// Content-addressed file stem for an image URL: 16 hex chars of `sha256(url)`
pub fn image_stem(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    digest[..16].to_string()
}

/// File name for an image stored in `format`
///
/// The extension follows the decoded payload, not the URL. WEBP is stored as
/// JPEG since those are transcoded.
pub fn image_file_name(stem: &str, format: ImageFormat) -> String {
    let extension = match format {
        ImageFormat::Png => "png",
        ImageFormat::Gif => "gif",
        _ => "jpg",
    };
    format!("{}.{}", stem, extension)
}

/// Name of an already stored image for `stem`, whatever its format
async fn stored_name(dir: &Path, stem: &str) -> Option<String> {
    for extension in STORED_EXTENSIONS {
        let name = format!("{}.{}", stem, extension);
        if tokio::fs::try_exists(dir.join(&name)).await.unwrap_or(false) {
            return Some(name);
        }
    }
    None
}

impl ImageFetcher {
    pub fn new(config: &ImageConfig, user_agent: &str) -> Result<Self, HarvestError> {
        let timeout = Duration::from_secs(config.timeout.max(1));
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            root: PathBuf::from(&config.path),
            max_per_car: config.max_per_car,
            concurrency: config.max_concurrent_downloads.max(1),
            timeout,
            max_width: config.max_width.max(1),
            quality: config.quality.clamp(1, 100),
        })
    }

    /// Downloads up to `max_per_car` images for a listing
    ///
    /// Individual failures are logged and counted in [`ImageBatch::failed`];
    /// only a destination that cannot be created is an error.
    pub async fn download(&self, urls: &[String], listing_id: &str) -> Result<ImageBatch, ImageError> {
        let urls: Vec<String> = urls.iter().take(self.max_per_car).cloned().collect();
        if urls.is_empty() {
            return Ok(ImageBatch::default());
        }

        let dir = self.root.join(listing_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ImageError::Destination {
                path: dir.clone(),
                source,
            })?;

        let results: Vec<Result<String, ImageError>> = stream::iter(urls)
            .map(|url| {
                let dir = dir.clone();
                async move { self.fetch_one(&url, listing_id, &dir).await }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut batch = ImageBatch::default();
        for result in results {
            match result {
                Ok(path) => batch.paths.push(path),
                Err(e) => {
                    warn!("Image skipped: {}", e);
                    batch.failed += 1;
                }
            }
        }

        info!(
            "Stored {} image(s) for {}, {} failed",
            batch.paths.len(),
            listing_id,
            batch.failed
        );
        Ok(batch)
    }

    async fn fetch_one(&self, url: &str, listing_id: &str, dir: &Path) -> Result<String, ImageError> {
        let stem = image_stem(url);
        if let Some(name) = stored_name(dir, &stem).await {
            let relative = format!("{}/{}", listing_id, name);
            debug!("Image already stored: {}", relative);
            return Ok(relative);
        }

        let bytes = tokio::time::timeout(self.timeout, self.get_bytes(url))
            .await
            .map_err(|_| ImageError::Timeout {
                url: url.to_string(),
            })??;

        let url = url.to_string();
        let dir = dir.to_path_buf();
        let name = tokio::task::spawn_blocking(move || store_image(&bytes, &dir, &stem, &url))
            .await
            .map_err(|e| ImageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        Ok(format!("{}/{}", listing_id, name))
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let fetch_err = |e: reqwest::Error| ImageError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(fetch_err)?
            .error_for_status()
            .map_err(fetch_err)?;
        Ok(response.bytes().await.map_err(fetch_err)?.to_vec())
    }

    /// Removes image directories of listings not in `active_ids`
    ///
    /// Returns the number of directories removed.
    pub async fn clean_unused(&self, active_ids: &HashSet<String>) -> Result<usize, ImageError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if active_ids.contains(&name) {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    info!("Removed images of inactive listing {}", name);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove images of {}: {}", name, e),
            }
        }
        Ok(removed)
    }
}

/// Validates downloaded bytes and writes them into `dir`, returning the file name
///
/// WEBP images are transcoded to JPEG; anything else is stored verbatim once
/// it decodes.
fn store_image(bytes: &[u8], dir: &Path, stem: &str, url: &str) -> Result<String, ImageError> {
    let decode_err = |e: image::ImageError| ImageError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    };
    let format = image::guess_format(bytes).map_err(decode_err)?;
    let decoded = image::load_from_memory_with_format(bytes, format).map_err(decode_err)?;

    let name = image_file_name(stem, format);
    let target = dir.join(&name);
    if format == ImageFormat::WebP {
        write_jpeg(&decoded, &target, TRANSCODE_QUALITY)?;
    } else {
        std::fs::write(&target, bytes)?;
    }
    Ok(name)
}

/// Encodes `image` as JPEG at `quality`, dropping any alpha channel
pub(crate) fn write_jpeg(image: &DynamicImage, target: &Path, quality: u8) -> Result<(), ImageError> {
    let encode_err = |e: image::ImageError| ImageError::Encode {
        path: target.to_path_buf(),
        message: e.to_string(),
    };
    let mut writer = BufWriter::new(File::create(target)?);
    let encoder = JpegEncoder::new_with_quality(&mut writer, quality);
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(encode_err)?;
    writer.flush()?;
    Ok(())
}
