//! Crawler module: everything between a scraper and the network
//!
//! This module contains the crawl machinery, including:
//! - transports (plain HTTP and, with the `browser` feature, headless Chrome)
//! - per-session identity, rate limiting and retry backoff
//! - search-result pagination
//! - the per-source crawl loop feeding a [`ListingSink`]

#[cfg(feature = "browser")]
mod browser;
mod coordinator;
mod fetcher;
mod identity;
mod pagination;
mod session;
mod throttle;

#[cfg(feature = "browser")]
pub use browser::BrowserTransport;
pub use coordinator::{crawl_source, CollectSink, CrawlOutcome, ListingSink, SinkOutcome};
pub use fetcher::{build_http_client, HttpTransport, Transport, TransportError, TransportSettings};
pub use identity::{pick_proxy, pick_user_agent, FALLBACK_USER_AGENTS};
pub use pagination::{PageResult, Paginator};
pub use session::{CrawlSession, SessionSettings};
pub use throttle::{jittered, RateLimiter, RetryPolicy};
