//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the ListingStore trait.

use crate::model::{JobCounters, JobStatus, Listing, ScrapeJob, Termination};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    stamp, ListingQuery, ListingStore, PersistenceError, PersistenceResult, UpsertOutcome,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const LISTING_COLUMNS: &str = "id, source, url, title, brand, model, year, price, mileage, \
     fuel_type, transmission, location, description, seller_type, seller_name, seller_phone, \
     attributes, created_at, updated_at";

const JOB_COLUMNS: &str = "id, source, status, created_at, started_at, ended_at, error, \
     listings_count, images_count, counters, termination, config_hash";

/// Collection fields stored in the `attributes` JSON column
#[derive(Debug, Default, Serialize, Deserialize)]
struct Attributes {
    #[serde(default)]
    features: BTreeMap<String, String>,
    #[serde(default)]
    remote_images: Vec<String>,
    #[serde(default)]
    local_images: Vec<String>,
}

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> PersistenceResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> PersistenceResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_optional_time(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_time(idx, &v)).transpose()
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<Listing> {
    let attributes: String = row.get(16)?;
    let attributes: Attributes =
        serde_json::from_str(&attributes).map_err(|e| conversion_error(16, e))?;
    let created_at: String = row.get(17)?;
    let updated_at: String = row.get(18)?;

    Ok(Listing {
        id: row.get(0)?,
        source: row.get(1)?,
        url: row.get(2)?,
        title: row.get(3)?,
        brand: row.get(4)?,
        model: row.get(5)?,
        year: row.get(6)?,
        price: row.get(7)?,
        mileage: row
            .get::<_, Option<i64>>(8)?
            .and_then(|m| u64::try_from(m).ok()),
        fuel_type: row.get(9)?,
        transmission: row.get(10)?,
        location: row.get(11)?,
        description: row.get(12)?,
        seller_type: row.get(13)?,
        seller_name: row.get(14)?,
        seller_phone: row.get(15)?,
        features: attributes.features,
        remote_images: attributes.remote_images,
        local_images: attributes.local_images,
        created_at: Some(parse_time(17, &created_at)?),
        updated_at: Some(parse_time(18, &updated_at)?),
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ScrapeJob> {
    let status: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    let counters: String = row.get(9)?;
    let termination: Option<String> = row.get(10)?;

    Ok(ScrapeJob {
        id: row.get(0)?,
        source: row.get(1)?,
        status: JobStatus::from_db_string(&status).unwrap_or(JobStatus::Failed),
        created_at: parse_time(3, &created_at)?,
        started_at: parse_optional_time(4, row.get(4)?)?,
        ended_at: parse_optional_time(5, row.get(5)?)?,
        error: row.get(6)?,
        listings_count: row.get(7)?,
        images_count: row.get(8)?,
        counters: serde_json::from_str::<JobCounters>(&counters)
            .map_err(|e| conversion_error(9, e))?,
        termination: termination.as_deref().and_then(Termination::from_db_string),
        config_hash: row.get(11)?,
    })
}

fn select_listing(conn: &Connection, id: &str) -> rusqlite::Result<Option<Listing>> {
    conn.query_row(
        &format!("SELECT {} FROM listings WHERE id = ?1", LISTING_COLUMNS),
        params![id],
        listing_from_row,
    )
    .optional()
}

fn write_listing(conn: &Connection, listing: &Listing) -> PersistenceResult<()> {
    let attributes = serde_json::to_string(&Attributes {
        features: listing.features.clone(),
        remote_images: listing.remote_images.clone(),
        local_images: listing.local_images.clone(),
    })?;
    let created_at = listing.created_at.unwrap_or_else(Utc::now).to_rfc3339();
    let updated_at = listing.updated_at.unwrap_or_else(Utc::now).to_rfc3339();

    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO listings ({}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            LISTING_COLUMNS
        ),
        params![
            listing.id,
            listing.source,
            listing.url,
            listing.title,
            listing.brand,
            listing.model,
            listing.year,
            listing.price,
            listing.mileage.map(|m| m as i64),
            listing.fuel_type,
            listing.transmission,
            listing.location,
            listing.description,
            listing.seller_type,
            listing.seller_name,
            listing.seller_phone,
            attributes,
            created_at,
            updated_at,
        ],
    )?;
    Ok(())
}

impl ListingStore for SqliteStorage {
    fn upsert(&mut self, listing: Listing) -> PersistenceResult<UpsertOutcome> {
        listing.validate()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = select_listing(&tx, &listing.id)?;
        let (record, outcome) = stamp(existing.as_ref(), listing, Utc::now());
        write_listing(&tx, &record)?;
        tx.commit()?;

        Ok(outcome)
    }

    fn get(&self, id: &str) -> PersistenceResult<Option<Listing>> {
        Ok(select_listing(&self.conn, id)?)
    }

    fn query(&self, query: &ListingQuery) -> PersistenceResult<Vec<Listing>> {
        // Narrow on indexed columns in SQL; text filters run on the rows
        let mut clauses = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(source) = &query.source {
            values.push(source.clone().into());
            clauses.push(format!("source = ?{}", values.len()));
        }
        if let Some(min) = query.min_price {
            values.push(min.into());
            clauses.push(format!("price >= ?{}", values.len()));
        }
        if let Some(max) = query.max_price {
            values.push(max.into());
            clauses.push(format!("price <= ?{}", values.len()));
        }
        if let Some(min) = query.min_year {
            values.push(i64::from(min).into());
            clauses.push(format!("year >= ?{}", values.len()));
        }
        if let Some(max) = query.max_year {
            values.push(i64::from(max).into());
            clauses.push(format!("year <= ?{}", values.len()));
        }
        if let Some(max) = query.max_mileage {
            values.push((max as i64).into());
            clauses.push(format!("mileage <= ?{}", values.len()));
        }

        let mut sql = format!("SELECT {} FROM listings", LISTING_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values), listing_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows.into_iter().filter(|l| query.matches(l)).collect())
    }

    fn count(&self) -> PersistenceResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM listings", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn ids(&self) -> PersistenceResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM listings ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn save_job(&mut self, job: &ScrapeJob) -> PersistenceResult<()> {
        let counters = serde_json::to_string(&job.counters)?;
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO jobs ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.source,
                job.status.to_db_string(),
                job.created_at.to_rfc3339(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.ended_at.map(|t| t.to_rfc3339()),
                job.error,
                job.listings_count,
                job.images_count,
                counters,
                job.termination.map(|t| t.to_db_string()),
                job.config_hash,
            ],
        )?;
        Ok(())
    }

    fn jobs(&self) -> PersistenceResult<Vec<ScrapeJob>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM jobs ORDER BY created_at, id",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map([], job_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| match e {
                rusqlite::Error::FromSqlConversionFailure(_, _, inner) => PersistenceError::Corrupt {
                    path: "jobs".to_string(),
                    message: inner.to_string(),
                },
                other => PersistenceError::Sqlite(other),
            })?;
        Ok(jobs)
    }
}
