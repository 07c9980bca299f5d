//! Storage traits and error types
//!
//! This module defines the trait interface for listing stores and the
//! associated error types.

use crate::model::{Listing, ScrapeJob};
use crate::ParseError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt store {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] ParseError),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<csv::Error> for PersistenceError {
    fn from(e: csv::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Filter over stored listings
///
/// Every `Some` field narrows the result; string matches are
/// case-insensitive, `keyword` looks in title and description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingQuery {
    pub source: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    pub max_mileage: Option<u64>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub location: Option<String>,
    pub keyword: Option<String>,
    /// Only listings touched at or after this instant
    pub updated_since: Option<DateTime<Utc>>,
}

fn eq_ignore_case(value: &Option<String>, wanted: &Option<String>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => value
            .as_deref()
            .map_or(false, |v| v.eq_ignore_ascii_case(wanted)),
    }
}

fn contains_ignore_case(value: Option<&str>, needle: &str) -> bool {
    value.map_or(false, |v| v.to_lowercase().contains(&needle.to_lowercase()))
}

impl ListingQuery {
    /// Returns true when the listing passes every set filter
    ///
    /// A listing with an unknown value never matches a filter on that value.
    pub fn matches(&self, listing: &Listing) -> bool {
        if let Some(source) = &self.source {
            if &listing.source != source {
                return false;
            }
        }
        if !eq_ignore_case(&listing.brand, &self.brand)
            || !eq_ignore_case(&listing.fuel_type, &self.fuel_type)
            || !eq_ignore_case(&listing.transmission, &self.transmission)
        {
            return false;
        }
        if let Some(model) = &self.model {
            if !contains_ignore_case(listing.model.as_deref(), model) {
                return false;
            }
        }
        if let Some(location) = &self.location {
            if !contains_ignore_case(listing.location.as_deref(), location) {
                return false;
            }
        }
        if let Some(keyword) = &self.keyword {
            if !contains_ignore_case(listing.title.as_deref(), keyword)
                && !contains_ignore_case(listing.description.as_deref(), keyword)
            {
                return false;
            }
        }

        let within = |value: Option<f64>, min: Option<f64>, max: Option<f64>| match value {
            Some(v) => min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m),
            None => min.is_none() && max.is_none(),
        };
        if !within(listing.price, self.min_price, self.max_price)
            || !within(
                listing.year.map(f64::from),
                self.min_year.map(f64::from),
                self.max_year.map(f64::from),
            )
            || !within(
                listing.mileage.map(|m| m as f64),
                None,
                self.max_mileage.map(|m| m as f64),
            )
        {
            return false;
        }

        match (self.updated_since, listing.updated_at) {
            (Some(since), Some(updated)) => updated >= since,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Trait for listing store backends
///
/// Implementations are shared behind a mutex by the orchestrator, so every
/// method runs with exclusive access.
pub trait ListingStore: Send {
    /// Inserts or merges a listing keyed by its id
    ///
    /// The store stamps `created_at` on insert and `updated_at` on every call;
    /// see [`Listing::merged`] for the field rules.
    fn upsert(&mut self, listing: Listing) -> PersistenceResult<UpsertOutcome>;

    /// Gets a listing by id
    fn get(&self, id: &str) -> PersistenceResult<Option<Listing>>;

    /// Gets listings matching a query, ordered by id
    fn query(&self, query: &ListingQuery) -> PersistenceResult<Vec<Listing>>;

    /// Gets every listing, ordered by id
    fn all(&self) -> PersistenceResult<Vec<Listing>> {
        self.query(&ListingQuery::default())
    }

    /// Counts stored listings
    fn count(&self) -> PersistenceResult<u64>;

    /// Gets every listing id
    fn ids(&self) -> PersistenceResult<Vec<String>>;

    /// Inserts or replaces a job record
    fn save_job(&mut self, job: &ScrapeJob) -> PersistenceResult<()>;

    /// Gets every job record, oldest first
    fn jobs(&self) -> PersistenceResult<Vec<ScrapeJob>>;
}

/// Applies the upsert timestamp rules to an incoming record
pub(crate) fn stamp(
    existing: Option<&Listing>,
    mut incoming: Listing,
    now: DateTime<Utc>,
) -> (Listing, UpsertOutcome) {
    match existing {
        Some(existing) => (Listing::merged(existing, incoming, now), UpsertOutcome::Updated),
        None => {
            incoming.created_at = Some(now);
            incoming.updated_at = Some(now);
            (incoming, UpsertOutcome::Inserted)
        }
    }
}
