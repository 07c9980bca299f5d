//! Storage module for persisting listings and job records
//!
//! Two interchangeable backends implement [`ListingStore`]:
//! - [`JsonStore`], one JSON document keyed by listing id
//! - [`SqliteStorage`], a `listings` table plus a `jobs` table
//!
//! The orchestrator shares one store behind a mutex, so writes from
//! concurrently crawled sources are serialized.

mod export;
mod json;
mod schema;
mod sqlite;
mod traits;

pub use export::{export, ExportFormat};
pub use json::JsonStore;
pub use sqlite::SqliteStorage;
pub use traits::{ListingQuery, ListingStore, PersistenceError, PersistenceResult, UpsertOutcome};

use crate::config::{StorageBackend, StorageConfig};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A store shared between concurrently crawled sources
pub type SharedStore = Arc<Mutex<Box<dyn ListingStore>>>;

/// Opens the configured backend
pub fn open_store(config: &StorageConfig) -> PersistenceResult<Box<dyn ListingStore>> {
    let path = Path::new(&config.path);
    let store: Box<dyn ListingStore> = match config.backend {
        StorageBackend::Json => Box::new(JsonStore::open(path)?),
        StorageBackend::Sqlite => Box::new(SqliteStorage::new(path)?),
    };
    tracing::debug!("Opened {:?} store at {}", config.backend, path.display());
    Ok(store)
}

/// Wraps a store for sharing
pub fn shared(store: Box<dyn ListingStore>) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Locks a shared store, recovering from poisoning
pub fn lock(store: &SharedStore) -> MutexGuard<'_, Box<dyn ListingStore>> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}
