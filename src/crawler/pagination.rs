//! Search-result pagination
//!
//! Pages are numbered from 1. The loop ends on the first of:
//! 1. a page that yields zero cards
//! 2. a page without a next-page affordance
//! 3. `max_pages` reached
//!
//! A page whose fetch fails after retries is reported and skipped; the loop
//! continues with the next page number. Cancellation is checked before each
//! page, never in the middle of one.

use crate::crawler::CrawlSession;
use crate::model::Termination;
use crate::sites::{parse_search_page, SearchFilters, SearchPage, SiteScraper};
use crate::HarvestError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One step of the pagination loop
#[derive(Debug)]
pub enum PageResult {
    Parsed(SearchPage),
    Failed { page: u32, error: HarvestError },
}

/// Drives a scraper's search pages through a session
pub struct Paginator<'a> {
    scraper: &'a dyn SiteScraper,
    filters: &'a SearchFilters,
    max_pages: u32,
    cancel: CancellationToken,
    page: u32,
    termination: Option<Termination>,
}

impl<'a> Paginator<'a> {
    pub fn new(
        scraper: &'a dyn SiteScraper,
        filters: &'a SearchFilters,
        max_pages: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scraper,
            filters,
            max_pages: max_pages.max(1),
            cancel,
            page: 0,
            termination: None,
        }
    }

    /// Why the loop stopped, once it has
    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    /// Last page number attempted
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Fetches and parses the next page, or returns `None` when the loop is over
    pub async fn next_page(&mut self, session: &mut CrawlSession) -> Option<PageResult> {
        if self.termination.is_some() {
            return None;
        }
        if self.cancel.is_cancelled() {
            info!("{}: cancelled before page {}", self.scraper.source(), self.page + 1);
            self.termination = Some(Termination::Cancelled);
            return None;
        }

        self.page += 1;
        let page = self.page;
        let url = self.scraper.build_search_url(self.filters, page);
        debug!("{}: fetching page {} ({})", self.scraper.source(), page, url);

        let html = match session.fetch(&url).await {
            Ok(html) => html,
            Err(error) => {
                warn!("{}: skipping page {}: {}", self.scraper.source(), page, error);
                if page >= self.max_pages {
                    self.termination = Some(Termination::PageCap);
                }
                return Some(PageResult::Failed { page, error });
            }
        };

        let html = match session.scroll_to_load().await {
            Ok(Some(rendered)) => rendered,
            Ok(None) => html,
            Err(e) => {
                warn!("{}: scrolling page {} failed: {}", self.scraper.source(), page, e);
                html
            }
        };

        let parsed = parse_search_page(self.scraper, page, &html);
        self.termination = if parsed.cards.is_empty() {
            Some(Termination::EmptyPage)
        } else if !parsed.has_next {
            Some(Termination::NoNextPage)
        } else if page >= self.max_pages {
            Some(Termination::PageCap)
        } else {
            None
        };

        info!(
            "{}: page {} yielded {} card(s), {} dropped",
            self.scraper.source(),
            page,
            parsed.cards.len(),
            parsed.dropped
        );
        Some(PageResult::Parsed(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use crate::crawler::session::tests::{test_settings, ScriptedTransport};
    use crate::crawler::TransportError;
    use crate::sites::LaCentrale;
    use std::sync::atomic::Ordering;

    fn page(cards: usize, next: bool) -> Result<String, TransportError> {
        let mut html = String::new();
        for i in 0..cards {
            html.push_str(&format!(
                r#"<div class="searchCard"><a class="searchCard__link" href="/auto-occasion-annonce-{}.html"></a></div>"#,
                i
            ));
        }
        if next {
            html.push_str(r##"<a class="pagination__next" href="#">next</a>"##);
        }
        Ok(html)
    }

    async fn drain(
        script: Vec<Result<String, TransportError>>,
        max_pages: u32,
        cancel: CancellationToken,
    ) -> (Vec<PageResult>, Option<Termination>, u32) {
        let scraper = LaCentrale::new(&SiteConfig::builtin("lacentrale").unwrap(), vec![]).unwrap();
        let filters = SearchFilters::default();
        let transport = ScriptedTransport::new(script);
        let calls = transport.calls.clone();
        let mut session = CrawlSession::with_transport(test_settings(1), Box::new(transport));

        let mut paginator = Paginator::new(&scraper, &filters, max_pages, cancel);
        let mut results = Vec::new();
        while let Some(result) = paginator.next_page(&mut session).await {
            results.push(result);
        }
        (results, paginator.termination(), calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_stops_without_next_page() {
        let script = vec![page(2, true), page(2, true), page(1, false), page(5, true)];
        let (results, termination, calls) = drain(script, 10, CancellationToken::new()).await;
        assert_eq!(results.len(), 3);
        assert_eq!(calls, 3);
        assert_eq!(termination, Some(Termination::NoNextPage));
    }

    #[tokio::test]
    async fn test_stops_on_empty_page() {
        let script = vec![page(2, true), page(0, true)];
        let (_, termination, calls) = drain(script, 10, CancellationToken::new()).await;
        assert_eq!(calls, 2);
        assert_eq!(termination, Some(Termination::EmptyPage));
    }

    #[tokio::test]
    async fn test_stops_at_page_cap() {
        let (_, termination, calls) = drain(vec![page(2, true)], 2, CancellationToken::new()).await;
        assert_eq!(calls, 2);
        assert_eq!(termination, Some(Termination::PageCap));
    }

    #[tokio::test]
    async fn test_failed_page_is_skipped() {
        let script = vec![
            page(2, true),
            Err(TransportError::Status {
                status: 500,
                url: "x".into(),
            }),
            page(1, false),
        ];
        let (results, termination, _) = drain(script, 10, CancellationToken::new()).await;
        assert!(matches!(results[1], PageResult::Failed { page: 2, .. }));
        assert!(matches!(&results[2], PageResult::Parsed(p) if p.page == 3));
        assert_eq!(termination, Some(Termination::NoNextPage));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_page() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (results, termination, calls) = drain(vec![page(2, true)], 10, cancel).await;
        assert!(results.is_empty());
        assert_eq!(calls, 0);
        assert_eq!(termination, Some(Termination::Cancelled));
    }
}
