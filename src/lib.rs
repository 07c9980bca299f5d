//! Car-Harvest: a used-vehicle listing harvester
//!
//! This crate crawls several used-car marketplaces, normalizes their listings into a
//! common record, downloads listing images and persists everything into an
//! idempotent keyed store.

pub mod config;
pub mod crawler;
pub mod images;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod sites;
pub mod storage;

use thiserror::Error;

/// Main error type for Car-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error for {url} after {attempts} attempt(s): {message}")]
    Network {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] storage::PersistenceError),

    #[error("Image error: {0}")]
    Image(#[from] images::ImageError),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Invalid job transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: model::JobStatus,
        to: model::JobStatus,
    },

    #[error("Crawl cancelled")]
    Cancelled,

    #[error("Source task aborted: {0}")]
    Task(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector or pattern: {0}")]
    InvalidSelector(String),
}

/// Extraction errors raised while turning markup into listing fields
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("Missing required field '{field}' in {context}")]
    MissingField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid value for '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Result type alias for Car-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{JobStatus, Listing, ScrapeJob};
pub use orchestrator::{Orchestrator, RunReport};
pub use sites::{SearchFilters, SiteScraper};
