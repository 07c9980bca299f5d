//! Database schema definitions
//!
//! Listings keep their scalar fields in columns; collection fields live in
//! the JSON `attributes` column.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS listings (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    url TEXT NOT NULL,
    title TEXT,
    brand TEXT,
    model TEXT,
    year INTEGER,
    price REAL,
    mileage INTEGER,
    fuel_type TEXT,
    transmission TEXT,
    location TEXT,
    description TEXT,
    seller_type TEXT,
    seller_name TEXT,
    seller_phone TEXT,
    attributes TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_listings_source ON listings(source);
CREATE INDEX IF NOT EXISTS idx_listings_brand ON listings(brand);
CREATE INDEX IF NOT EXISTS idx_listings_updated ON listings(updated_at);

-- One row per source crawl
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    ended_at TEXT,
    error TEXT,
    listings_count INTEGER NOT NULL DEFAULT 0,
    images_count INTEGER NOT NULL DEFAULT 0,
    counters TEXT NOT NULL DEFAULT '{}',
    termination TEXT,
    config_hash TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_source ON jobs(source);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
