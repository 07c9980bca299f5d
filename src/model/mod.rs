//! Domain records shared by scrapers, storage and the orchestrator

mod job;
mod listing;

pub use job::{JobCounters, JobStatus, ScrapeJob, Termination};
pub use listing::{Listing, ListingDetail, PartialListing, MIN_YEAR};
