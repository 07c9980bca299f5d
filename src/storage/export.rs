//! Snapshot export of the listing collection

use crate::model::Listing;
use crate::storage::traits::{ListingStore, PersistenceResult};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Export file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    /// The keyed collection, verbatim
    Json,
    /// One row per listing; collection fields JSON-encoded in one cell
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

const CSV_HEADER: &[&str] = &[
    "id",
    "source",
    "url",
    "title",
    "brand",
    "model",
    "year",
    "price",
    "mileage",
    "fuel_type",
    "transmission",
    "location",
    "description",
    "features",
    "remote_images",
    "local_images",
    "seller_type",
    "seller_name",
    "seller_phone",
    "created_at",
    "updated_at",
];

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn display<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn csv_row(listing: &Listing) -> PersistenceResult<Vec<String>> {
    Ok(vec![
        listing.id.clone(),
        listing.source.clone(),
        listing.url.clone(),
        text(&listing.title),
        text(&listing.brand),
        text(&listing.model),
        display(listing.year),
        display(listing.price),
        display(listing.mileage),
        text(&listing.fuel_type),
        text(&listing.transmission),
        text(&listing.location),
        text(&listing.description),
        serde_json::to_string(&listing.features)?,
        serde_json::to_string(&listing.remote_images)?,
        serde_json::to_string(&listing.local_images)?,
        text(&listing.seller_type),
        text(&listing.seller_name),
        text(&listing.seller_phone),
        display(listing.created_at.map(|t| t.to_rfc3339())),
        display(listing.updated_at.map(|t| t.to_rfc3339())),
    ])
}

/// Writes every stored listing to `path`, returning the number exported
pub fn export(
    store: &dyn ListingStore,
    format: ExportFormat,
    path: &Path,
) -> PersistenceResult<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let listings = store.all()?;

    match format {
        ExportFormat::Json => {
            let keyed: BTreeMap<&str, &Listing> =
                listings.iter().map(|l| (l.id.as_str(), l)).collect();
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, &keyed)?;
            writer.flush()?;
        }
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_path(path)?;
            writer.write_record(CSV_HEADER)?;
            for listing in &listings {
                writer.write_record(csv_row(listing)?)?;
            }
            writer.flush()?;
        }
    }

    tracing::info!("Exported {} listings to {}", listings.len(), path.display());
    Ok(listings.len())
}
