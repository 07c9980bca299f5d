//! Configuration module for Car-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use car_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Pages per source: {}", config.scraping.max_pages_per_source);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, ImageConfig, ProxyConfig, SchedulingConfig, ScrapingConfig, SearchParams,
    SiteConfig, StorageBackend, StorageConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
