//! JSON document store
//!
//! The listing collection is one JSON object keyed by id; jobs go to a
//! sibling `*.jobs.json` file. Every write replaces the file atomically via a
//! temporary file and a rename.

use crate::model::{Listing, ScrapeJob};
use crate::storage::traits::{
    stamp, ListingQuery, ListingStore, PersistenceError, PersistenceResult, UpsertOutcome,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub struct JsonStore {
    path: PathBuf,
    jobs_path: PathBuf,
    listings: BTreeMap<String, Listing>,
    jobs: Vec<ScrapeJob>,
}

impl JsonStore {
    /// Opens the store at `path`, loading existing documents
    pub fn open(path: &Path) -> PersistenceResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let jobs_path = path.with_extension("jobs.json");

        Ok(Self {
            listings: read_document(path)?.unwrap_or_default(),
            jobs: read_document(&jobs_path)?.unwrap_or_default(),
            path: path.to_path_buf(),
            jobs_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> PersistenceResult<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| PersistenceError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

/// Writes `value` next to `path` and renames it into place
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> PersistenceResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let content = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl ListingStore for JsonStore {
    fn upsert(&mut self, listing: Listing) -> PersistenceResult<UpsertOutcome> {
        listing.validate()?;

        let (record, outcome) = stamp(self.listings.get(&listing.id), listing, Utc::now());
        let previous = self.listings.insert(record.id.clone(), record.clone());

        if let Err(e) = write_atomic(&self.path, &self.listings) {
            // Keep memory consistent with the file
            match previous {
                Some(previous) => self.listings.insert(record.id, previous),
                None => self.listings.remove(&record.id),
            };
            return Err(e);
        }
        Ok(outcome)
    }

    fn get(&self, id: &str) -> PersistenceResult<Option<Listing>> {
        Ok(self.listings.get(id).cloned())
    }

    fn query(&self, query: &ListingQuery) -> PersistenceResult<Vec<Listing>> {
        Ok(self
            .listings
            .values()
            .filter(|l| query.matches(l))
            .cloned()
            .collect())
    }

    fn count(&self) -> PersistenceResult<u64> {
        Ok(self.listings.len() as u64)
    }

    fn ids(&self) -> PersistenceResult<Vec<String>> {
        Ok(self.listings.keys().cloned().collect())
    }

    fn save_job(&mut self, job: &ScrapeJob) -> PersistenceResult<()> {
        match self.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => self.jobs.push(job.clone()),
        }
        write_atomic(&self.jobs_path, &self.jobs)
    }

    fn jobs(&self) -> PersistenceResult<Vec<ScrapeJob>> {
        Ok(self.jobs.clone())
    }
}
