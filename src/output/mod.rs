//! Output module for run reports and store statistics
//!
//! This module handles:
//! - Rendering the report of an orchestrator run
//! - Listing recorded scrape jobs
//! - Computing statistics over the stored listings

pub mod stats;
mod summary;

pub use stats::{compute_statistics, load_statistics, print_statistics, StoreStatistics};
pub use summary::{format_jobs, format_run_report};
