//! Orchestrator: runs the configured sources and records their jobs
//!
//! Each source gets its own [`CrawlSession`] and [`ScrapeJob`]. Sources are
//! driven concurrently up to `scraping.max_concurrent_sources`; nothing that
//! goes wrong in one source reaches another. A source already being crawled
//! by this orchestrator is skipped rather than started twice.

mod schedule;
mod sink;

pub use schedule::{next_run, POLL_INTERVAL};
pub use sink::StoreSink;

use crate::config::Config;
use crate::crawler::{crawl_source, CrawlOutcome, CrawlSession, SessionSettings};
use crate::images::{ImageFetcher, OptimizeStats};
use crate::model::{JobStatus, ScrapeJob, Termination};
use crate::sites::{ScraperRegistry, SearchFilters};
use crate::storage::{self, SharedStore};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// How one source fared in a run
#[derive(Debug, Clone)]
pub enum SourceOutcome {
    /// The source ran; its job is terminal
    Finished(ScrapeJob),
    /// Another run of the source was still in progress
    Busy,
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: String,
    pub outcome: SourceOutcome,
}

impl SourceReport {
    pub fn job(&self) -> Option<&ScrapeJob> {
        match &self.outcome {
            SourceOutcome::Finished(job) => Some(job),
            SourceOutcome::Busy => None,
        }
    }
}

/// Aggregated result of one [`Orchestrator::run`]
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// One entry per requested source, sorted by source name
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn jobs(&self) -> impl Iterator<Item = &ScrapeJob> {
        self.sources.iter().filter_map(SourceReport::job)
    }

    pub fn listings(&self) -> u32 {
        self.jobs().map(|job| job.listings_count).sum()
    }

    pub fn images(&self) -> u32 {
        self.jobs().map(|job| job.images_count).sum()
    }

    pub fn failed_sources(&self) -> Vec<&str> {
        self.jobs()
            .filter(|job| job.status == JobStatus::Failed)
            .map(|job| job.source.as_str())
            .collect()
    }

    pub fn busy_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|report| matches!(report.outcome, SourceOutcome::Busy))
            .map(|report| report.source.as_str())
            .collect()
    }
}

/// Marks a source as running until dropped
struct RunningGuard {
    running: Arc<Mutex<HashSet<String>>>,
    source: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.source);
    }
}

/// Cloning is cheap: clones share the store, running set and cancel token
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    config_hash: Option<String>,
    registry: ScraperRegistry,
    store: SharedStore,
    running: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Builds the scraper registry for the configured sources
    pub fn new(
        config: Config,
        config_hash: Option<String>,
        store: SharedStore,
    ) -> Result<Self, HarvestError> {
        let registry = ScraperRegistry::from_config(&config)?;
        Ok(Self {
            config: Arc::new(config),
            config_hash,
            registry,
            store,
            running: Arc::new(Mutex::new(HashSet::new())),
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops crawls at their next page boundary
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Crawls `source`, or every configured source when `None`
    ///
    /// Only an unknown source name is an error; per-source failures are
    /// recorded on that source's job.
    pub async fn run(&self, source: Option<&str>) -> Result<RunReport, HarvestError> {
        let sources: Vec<String> = match source {
            Some(name) if self.registry.get(name).is_none() => {
                return Err(HarvestError::UnknownSource(name.to_string()));
            }
            Some(name) => vec![name.to_string()],
            None => self.registry.names().map(str::to_string).collect(),
        };

        let started_at = Utc::now();
        let width = self.config.scraping.max_concurrent_sources.max(1);
        info!("Starting run over {} source(s), {} at a time", sources.len(), width);

        let mut reports: Vec<SourceReport> = stream::iter(sources)
            .map(|source| self.run_source(source))
            .buffer_unordered(width)
            .collect()
            .await;
        reports.sort_by(|a, b| a.source.cmp(&b.source));

        let report = RunReport {
            started_at,
            ended_at: Utc::now(),
            sources: reports,
        };
        info!("Run finished: {}", report.one_line());
        Ok(report)
    }

    fn claim(&self, source: &str) -> Option<RunningGuard> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(source.to_string()) {
            return None;
        }
        Some(RunningGuard {
            running: self.running.clone(),
            source: source.to_string(),
        })
    }

    async fn run_source(&self, source: String) -> SourceReport {
        let Some(_guard) = self.claim(&source) else {
            warn!("{} is already running, skipping", source);
            return SourceReport {
                source,
                outcome: SourceOutcome::Busy,
            };
        };

        let span = info_span!("source", source = %source);
        let job = self.run_job(&source).instrument(span).await;
        SourceReport {
            source,
            outcome: SourceOutcome::Finished(job),
        }
    }

    async fn run_job(&self, source: &str) -> ScrapeJob {
        let mut job = ScrapeJob::new(source, self.config_hash.clone());
        self.save_job(&job);

        if let Err(e) = job.start() {
            error!("{}", e);
        }
        self.save_job(&job);

        // Own task per source, so a panic fails this job only
        let this = self.clone();
        let name = source.to_string();
        let task = tokio::spawn(async move { this.crawl(&name).await }.in_current_span());
        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(HarvestError::Task(e.to_string())),
        };
        let transition = match result {
            Ok(outcome) => {
                job.counters = outcome.counters;
                job.termination = outcome.termination;
                job.listings_count = outcome.listings;
                job.images_count = outcome.images;
                if outcome.termination == Some(Termination::Cancelled) {
                    job.fail(HarvestError::Cancelled.to_string())
                } else {
                    job.complete()
                }
            }
            Err(e) => {
                error!("Crawl failed: {}", e);
                job.fail(e.to_string())
            }
        };
        if let Err(e) = transition {
            error!("{}", e);
        }
        self.save_job(&job);

        info!(
            "Job {} {}: {} listing(s), {} image(s)",
            job.id, job.status, job.listings_count, job.images_count
        );
        job
    }

    /// Opens a session for `source`, crawls it and always closes the session
    async fn crawl(&self, source: &str) -> Result<CrawlOutcome, HarvestError> {
        let scraper = self
            .registry
            .get(source)
            .ok_or_else(|| HarvestError::UnknownSource(source.to_string()))?;
        let settings = SessionSettings::from_config(&self.config, source, scraper.consent_selector());

        let images = if self.config.images.download {
            Some(ImageFetcher::new(&self.config.images, &settings.transport.user_agent)?)
        } else {
            None
        };

        let mut session = if scraper.uses_browser() {
            CrawlSession::open_browser(settings).await?
        } else {
            CrawlSession::open_http(settings)?
        };

        let mut sink = StoreSink::new(self.store.clone(), images);
        let filters = SearchFilters::from(&self.config.search_params);
        let outcome = crawl_source(
            scraper.as_ref(),
            &mut session,
            &filters,
            self.config.scraping.max_pages_per_source,
            self.cancel.clone(),
            &mut sink,
        )
        .await;

        session.close().await;
        Ok(outcome)
    }

    fn save_job(&self, job: &ScrapeJob) {
        if let Err(e) = storage::lock(&self.store).save_job(job) {
            warn!("Failed to record job {}: {}", job.id, e);
        }
    }

    fn image_fetcher(&self) -> Result<ImageFetcher, HarvestError> {
        let user_agent = crate::crawler::pick_user_agent(&self.config.user_agents);
        ImageFetcher::new(&self.config.images, &user_agent)
    }

    /// Runs the optimize pass over the images of every stored listing
    pub async fn optimize_images(&self) -> Result<OptimizeStats, HarvestError> {
        let fetcher = self.image_fetcher()?;
        let ids = storage::lock(&self.store).ids()?;

        let mut total = OptimizeStats::default();
        for id in ids {
            let stats = fetcher.optimize(&id).await?;
            total.resized += stats.resized;
            total.untouched += stats.untouched;
            total.failed += stats.failed;
        }
        Ok(total)
    }

    /// Removes image directories of listings no longer in the store
    pub async fn clean_images(&self) -> Result<usize, HarvestError> {
        let fetcher = self.image_fetcher()?;
        let active: HashSet<String> = storage::lock(&self.store).ids()?.into_iter().collect();
        Ok(fetcher.clean_unused(&active).await?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{ListingDetail, PartialListing};
    use crate::sites::SiteScraper;
    use crate::storage::{shared, JsonStore};
    use crate::ParseError;
    use scraper::{ElementRef, Html, Selector};
    use tempfile::TempDir;

    pub(crate) fn orchestrator() -> Orchestrator {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::open(&dir.into_path().join("cars.json")).unwrap();
        Orchestrator::new(Config::default(), None, shared(Box::new(store))).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_source_is_rejected() {
        let result = orchestrator().run(Some("mobile.de")).await;
        assert!(matches!(result, Err(HarvestError::UnknownSource(name)) if name == "mobile.de"));
    }

    #[test]
    fn test_source_runs_are_single_flight() {
        let orchestrator = orchestrator();
        let guard = orchestrator.claim("lacentrale");
        assert!(guard.is_some());
        assert!(orchestrator.claim("lacentrale").is_none());
        assert!(orchestrator.claim("leboncoin").is_some());

        drop(guard);
        assert!(orchestrator.claim("lacentrale").is_some());
    }

    #[tokio::test]
    async fn test_busy_source_is_reported() {
        let orchestrator = orchestrator();
        let _guard = orchestrator.claim("lacentrale");

        let report = orchestrator.run(Some("lacentrale")).await.unwrap();
        assert_eq!(report.busy_sources(), vec!["lacentrale"]);
        assert_eq!(report.jobs().count(), 0);
        assert!(storage::lock(orchestrator.store()).jobs().unwrap().is_empty());
    }

    /// Scraper whose crawl blows up as soon as its session is set up
    struct PanickingScraper {
        card: Selector,
    }

    impl SiteScraper for PanickingScraper {
        fn source(&self) -> &str {
            "broken"
        }
        fn build_search_url(&self, _filters: &SearchFilters, page: u32) -> String {
            format!("http://127.0.0.1:1/?page={}", page)
        }
        fn card_selector(&self) -> &Selector {
            &self.card
        }
        fn parse_listing_card(&self, _card: ElementRef<'_>) -> Result<PartialListing, ParseError> {
            Err(ParseError::MissingField {
                field: "url",
                context: "card".into(),
            })
        }
        fn has_next_page(&self, _document: &Html) -> bool {
            false
        }
        fn parse_detail(&self, _url: &str, _document: &Html) -> Result<ListingDetail, ParseError> {
            Err(ParseError::MissingField {
                field: "description",
                context: "detail".into(),
            })
        }
        fn native_id(&self, _url: &str) -> Option<String> {
            None
        }
        fn consent_selector(&self) -> Option<&str> {
            panic!("selector table missing")
        }
    }

    #[tokio::test]
    async fn test_panicking_source_fails_only_its_job() {
        let mut orchestrator = orchestrator();
        orchestrator.registry.register(Arc::new(PanickingScraper {
            card: Selector::parse("div.card").unwrap(),
        }));
        // Keeps lacentrale off the network
        orchestrator.cancel_token().cancel();

        let report = orchestrator.run(None).await.unwrap();
        assert_eq!(report.sources.len(), 2);

        let broken = report.sources[0].job().unwrap();
        assert_eq!(broken.source, "broken");
        assert_eq!(broken.status, JobStatus::Failed);
        assert!(broken.error.as_deref().unwrap().contains("Source task aborted"));

        let lacentrale = report.sources[1].job().unwrap();
        assert_eq!(lacentrale.source, "lacentrale");
        assert_eq!(lacentrale.termination, Some(Termination::Cancelled));

        let stored = storage::lock(orchestrator.store()).jobs().unwrap();
        assert!(stored.iter().all(|job| job.status == JobStatus::Failed));
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_run_fails_the_job() {
        let orchestrator = orchestrator();
        orchestrator.cancel_token().cancel();

        let report = orchestrator.run(None).await.unwrap();
        let job = report.jobs().next().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.termination, Some(Termination::Cancelled));
        assert_eq!(job.counters.pages_fetched, 0);

        let stored = storage::lock(orchestrator.store()).jobs().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, JobStatus::Failed);
    }
}
