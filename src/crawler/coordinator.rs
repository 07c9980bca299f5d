//! Per-source crawl loop
//!
//! Walks the search pages of one source, fetches every card's detail page,
//! assembles the listing and hands it to a [`ListingSink`]. Per-card and
//! per-detail failures are counted, never propagated.

use crate::crawler::pagination::{PageResult, Paginator};
use crate::crawler::CrawlSession;
use crate::model::{JobCounters, Listing, ListingDetail, PartialListing, Termination};
use crate::sites::{parse_detail_page, SearchFilters, SiteScraper};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// What the sink did with one listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkOutcome {
    pub persisted: bool,
    pub images: u32,
    pub images_failed: u32,
}

/// Destination for assembled listings
#[async_trait]
pub trait ListingSink: Send {
    async fn accept(&mut self, listing: Listing) -> SinkOutcome;
}

/// Collects listings in memory
#[derive(Debug, Default)]
pub struct CollectSink {
    pub listings: Vec<Listing>,
}

#[async_trait]
impl ListingSink for CollectSink {
    async fn accept(&mut self, listing: Listing) -> SinkOutcome {
        self.listings.push(listing);
        SinkOutcome {
            persisted: true,
            ..Default::default()
        }
    }
}

/// Result of one source's crawl
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlOutcome {
    pub counters: JobCounters,
    pub termination: Option<Termination>,
    /// Listings the sink persisted
    pub listings: u32,
    pub images: u32,
}

/// Crawls one source until its pagination loop terminates
pub async fn crawl_source(
    scraper: &dyn SiteScraper,
    session: &mut CrawlSession,
    filters: &SearchFilters,
    max_pages: u32,
    cancel: CancellationToken,
    sink: &mut dyn ListingSink,
) -> CrawlOutcome {
    let mut outcome = CrawlOutcome::default();
    let mut paginator = Paginator::new(scraper, filters, max_pages, cancel);

    while let Some(result) = paginator.next_page(session).await {
        let page = match result {
            PageResult::Parsed(page) => page,
            PageResult::Failed { .. } => {
                outcome.counters.pages_failed += 1;
                continue;
            }
        };
        outcome.counters.pages_fetched += 1;
        outcome.counters.cards_dropped += page.dropped;

        for card in page.cards {
            let id = scraper.derive_id(&card.url);
            let span = info_span!("listing", listing = %id);
            let Some(listing) = build_listing(scraper, session, id, card, &mut outcome.counters)
                .instrument(span.clone())
                .await
            else {
                continue;
            };

            let accepted = sink.accept(listing).instrument(span).await;
            if accepted.persisted {
                outcome.listings += 1;
            } else {
                outcome.counters.persist_errors += 1;
            }
            outcome.images += accepted.images;
            outcome.counters.images_failed += accepted.images_failed;
        }
    }

    outcome.termination = paginator.termination();
    info!(
        "{}: crawl finished after {} page(s) and {} request(s) ({:?}), {} listing(s)",
        scraper.source(),
        paginator.page(),
        session.requests(),
        outcome.termination,
        outcome.listings
    );
    outcome
}

/// Fetches the detail page and assembles the listing
///
/// A detail page that cannot be fetched leaves a card-only listing; one that
/// fetches but cannot be parsed drops the listing.
async fn build_listing(
    scraper: &dyn SiteScraper,
    session: &mut CrawlSession,
    id: String,
    card: PartialListing,
    counters: &mut JobCounters,
) -> Option<Listing> {
    let detail: Option<ListingDetail> = match session.fetch(&card.url).await {
        Ok(html) => match parse_detail_page(scraper, &card.url, &html) {
            Ok(detail) => Some(detail),
            Err(e) => {
                warn!("Dropping listing, detail page unparsable: {}", e);
                counters.details_failed += 1;
                return None;
            }
        },
        Err(e) => {
            warn!("Keeping card data only, detail fetch failed: {}", e);
            counters.details_failed += 1;
            None
        }
    };

    let listing = Listing::assemble(id, scraper.source(), card, detail);
    if let Err(e) = listing.validate() {
        warn!("Dropping invalid listing: {}", e);
        counters.cards_dropped += 1;
        return None;
    }
    debug!("Assembled {}", listing.id);
    Some(listing)
}
