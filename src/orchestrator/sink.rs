//! Listing sink backed by the shared store

use crate::crawler::{ListingSink, SinkOutcome};
use crate::images::ImageFetcher;
use crate::model::Listing;
use crate::storage::{self, PersistenceResult, SharedStore, UpsertOutcome};
use async_trait::async_trait;
use tracing::{debug, error, warn};

/// Attaches images, then upserts into the store
///
/// A failed write is retried once before the listing is given up on.
pub struct StoreSink {
    store: SharedStore,
    images: Option<ImageFetcher>,
}

impl StoreSink {
    pub fn new(store: SharedStore, images: Option<ImageFetcher>) -> Self {
        Self { store, images }
    }

    fn upsert(&self, listing: Listing) -> PersistenceResult<UpsertOutcome> {
        storage::lock(&self.store).upsert(listing)
    }

    fn persist(&self, listing: Listing) -> bool {
        let id = listing.id.clone();
        match self.upsert(listing.clone()) {
            Ok(outcome) => {
                debug!("{:?} {}", outcome, id);
                true
            }
            Err(first) => {
                warn!("Write failed for {}, retrying: {}", id, first);
                match self.upsert(listing) {
                    Ok(outcome) => {
                        debug!("{:?} {} on retry", outcome, id);
                        true
                    }
                    Err(e) => {
                        error!("Dropping {} after failed retry: {}", id, e);
                        false
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ListingSink for StoreSink {
    async fn accept(&mut self, mut listing: Listing) -> SinkOutcome {
        let mut outcome = SinkOutcome::default();

        if let Some(fetcher) = &self.images {
            if !listing.remote_images.is_empty() {
                match fetcher.download(&listing.remote_images, &listing.id).await {
                    Ok(batch) => {
                        outcome.images = batch.paths.len() as u32;
                        outcome.images_failed = batch.failed;
                        listing.local_images = batch.paths;
                    }
                    Err(e) => {
                        warn!("No images stored for {}: {}", listing.id, e);
                        outcome.images_failed = listing.remote_images.len() as u32;
                    }
                }
            }
        }

        outcome.persisted = self.persist(listing);
        outcome
    }
}
