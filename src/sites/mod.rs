//! Site scrapers
//!
//! Each marketplace implements [`SiteScraper`]: a pure translation from that
//! site's query grammar and markup to listing drafts. Scrapers never perform
//! I/O; fetching, retries and rate limiting live in
//! [`CrawlSession`](crate::crawler::CrawlSession).

mod autoscout24;
pub mod extract;
mod lacentrale;
mod leboncoin;
mod leparking;

pub use autoscout24::AutoScout24;
pub use lacentrale::LaCentrale;
pub use leboncoin::Leboncoin;
pub use leparking::LeParking;

use crate::config::{Config, SearchParams, SiteConfig};
use crate::model::{ListingDetail, PartialListing};
use crate::{ConfigError, HarvestError, ParseError};
use extract::{apply_feature_overrides, derive_listing_id};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// Source names with a built-in scraper
pub const KNOWN_SOURCES: &[&str] = &["lacentrale", "leboncoin", "leparking", "autoscout24"];

/// Search filters, encoded per site by [`SiteScraper::build_search_url`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub brands: Vec<String>,
    pub models: Vec<String>,
    pub max_price: Option<u64>,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    pub max_km: Option<u64>,
    pub fuel_types: Vec<String>,
    pub transmissions: Vec<String>,
}

impl From<&SearchParams> for SearchFilters {
    fn from(params: &SearchParams) -> Self {
        Self {
            brands: params.brands.clone(),
            models: params.models.clone(),
            max_price: params.max_price,
            min_year: params.min_year,
            max_year: params.max_year,
            max_km: params.max_km,
            fuel_types: params.fuel_types.clone(),
            transmissions: params.transmission.clone(),
        }
    }
}

/// Contract implemented by every marketplace
///
/// All methods are synchronous and side-effect free. Parse methods receive
/// already-fetched markup.
pub trait SiteScraper: Send + Sync {
    /// Source name, also the id prefix
    fn source(&self) -> &str;

    /// Builds the search URL for a 1-based page number
    fn build_search_url(&self, filters: &SearchFilters, page: u32) -> String;

    /// Selector matching one listing card on a search page
    fn card_selector(&self) -> &Selector;

    /// Extracts the card fields; the URL is absolute
    fn parse_listing_card(&self, card: ElementRef<'_>) -> Result<PartialListing, ParseError>;

    /// True when the search page offers a next page
    fn has_next_page(&self, document: &Html) -> bool;

    /// Extracts description, images, features and seller info from a detail page
    fn parse_detail(&self, url: &str, document: &Html) -> Result<ListingDetail, ParseError>;

    /// Site-native listing id found in the URL
    fn native_id(&self, url: &str) -> Option<String>;

    /// Deterministic listing id for a URL
    fn derive_id(&self, url: &str) -> String {
        derive_listing_id(self.source(), url, self.native_id(url).as_deref())
    }

    /// Render pages through the headless browser
    fn uses_browser(&self) -> bool {
        false
    }

    /// Cookie-consent button to dismiss in browser sessions
    fn consent_selector(&self) -> Option<&str> {
        None
    }
}

/// Outcome of parsing one search page
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub page: u32,
    pub cards: Vec<PartialListing>,
    /// Cards dropped because of a parse error
    pub dropped: u32,
    pub has_next: bool,
}

/// Parses a search page, containing per-card failures
///
/// The `Html` tree is built and dropped inside this call so it never crosses
/// an await point.
pub fn parse_search_page(scraper: &dyn SiteScraper, page: u32, html: &str) -> SearchPage {
    let document = Html::parse_document(html);
    let mut result = SearchPage {
        page,
        has_next: scraper.has_next_page(&document),
        ..Default::default()
    };

    for card in document.select(scraper.card_selector()) {
        match scraper.parse_listing_card(card) {
            Ok(partial) => result.cards.push(partial),
            Err(e) => {
                tracing::warn!("Dropping card on page {}: {}", page, e);
                result.dropped += 1;
            }
        }
    }

    result
}

/// Parses a detail page and applies feature-key overrides
pub fn parse_detail_page(
    scraper: &dyn SiteScraper,
    url: &str,
    html: &str,
) -> Result<ListingDetail, ParseError> {
    let document = Html::parse_document(html);
    let mut detail = scraper.parse_detail(url, &document)?;
    apply_feature_overrides(&mut detail);
    Ok(detail)
}

/// Builds the scraper for a source from configuration
pub fn build_scraper(source: &str, config: &Config) -> Result<Arc<dyn SiteScraper>, HarvestError> {
    let site = config
        .site_config(source)
        .ok_or_else(|| HarvestError::UnknownSource(source.to_string()))?;
    let brands = config.search_params.brands.clone();

    let scraper: Arc<dyn SiteScraper> = match source {
        "lacentrale" => Arc::new(LaCentrale::new(&site, brands)?),
        "leboncoin" => Arc::new(Leboncoin::new(&site, brands)?),
        "leparking" => Arc::new(LeParking::new(&site, brands)?),
        "autoscout24" => Arc::new(AutoScout24::new(&site, brands)?),
        other => return Err(HarvestError::UnknownSource(other.to_string())),
    };
    Ok(scraper)
}

/// Scrapers keyed by source name
#[derive(Clone, Default)]
pub struct ScraperRegistry {
    scrapers: BTreeMap<String, Arc<dyn SiteScraper>>,
}

impl ScraperRegistry {
    /// Builds a scraper for every enabled source
    pub fn from_config(config: &Config) -> Result<Self, HarvestError> {
        let mut registry = Self::default();
        for source in &config.sources {
            registry.register(build_scraper(source, config)?);
        }
        Ok(registry)
    }

    /// Adds or replaces a scraper under its own source name
    pub fn register(&mut self, scraper: Arc<dyn SiteScraper>) {
        self.scrapers.insert(scraper.source().to_string(), scraper);
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn SiteScraper>> {
        self.scrapers.get(source).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scrapers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.scrapers.is_empty()
    }
}

/// Common construction data for the built-in scrapers
pub(crate) struct SiteBase {
    pub base: Url,
    pub search_url: String,
    pub card: Selector,
    pub detail: Selector,
    pub use_browser: bool,
    pub brands: Vec<String>,
}

impl SiteBase {
    pub fn new(
        site: &SiteConfig,
        default_card: &str,
        default_detail: &str,
        brands: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let base = Url::parse(&site.base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", site.base_url, e)))?;
        let card_css = site.listing_selector.as_deref().unwrap_or(default_card);
        let detail_css = site.detail_selector.as_deref().unwrap_or(default_detail);
        Ok(Self {
            base,
            search_url: site.search_url.clone(),
            card: extract::compile_selector(card_css)?,
            detail: extract::compile_selector(detail_css)?,
            use_browser: site.use_browser,
            brands,
        })
    }

    /// Root element of a detail page
    pub fn detail_root<'a>(&self, url: &str, document: &'a Html) -> Result<ElementRef<'a>, ParseError> {
        document
            .select(&self.detail)
            .next()
            .ok_or_else(|| ParseError::MissingField {
                field: "detail",
                context: url.to_string(),
            })
    }

    /// Appends query pairs to the search URL
    pub fn search_url_with(&self, pairs: &[(&str, String)]) -> String {
        let mut url = self.search_url.clone();
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())))
            .finish();
        if !encoded.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&encoded);
        }
        url
    }

    /// Absolute href of the first `selector` match under `card`
    pub fn card_link(&self, card: ElementRef<'_>, selector: Option<&Selector>) -> Result<String, ParseError> {
        let href = match selector {
            Some(selector) => card
                .select(selector)
                .find_map(|link| link.value().attr("href")),
            None => card.value().attr("href"),
        };
        href.and_then(|href| extract::absolutize(&self.base, href))
            .ok_or_else(|| ParseError::MissingField {
                field: "url",
                context: "listing card".to_string(),
            })
    }

    /// Image sources under `selector`, ignoring inline data URIs
    pub fn image_urls(&self, document: &Html, selector: &Selector) -> Vec<String> {
        let mut urls: Vec<String> = document
            .select(selector)
            .filter_map(|img| {
                img.value()
                    .attr("src")
                    .filter(|src| !src.trim().is_empty())
                    .or_else(|| img.value().attr("data-src"))
            })
            .filter(|src| !src.starts_with("data:"))
            .filter_map(|src| extract::absolutize(&self.base, src))
            .collect();
        let mut seen = std::collections::HashSet::new();
        urls.retain(|url| seen.insert(url.clone()));
        urls
    }
}

/// Finds the first `selector` match anywhere in the document
pub(crate) fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document.select(selector).find_map(extract::element_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_builds_all_known_sources() {
        let mut config = Config::default();
        config.sources = KNOWN_SOURCES.iter().map(|s| s.to_string()).collect();

        let registry = ScraperRegistry::from_config(&config).unwrap();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["autoscout24", "lacentrale", "leboncoin", "leparking"]);
        assert_eq!(registry.get("leboncoin").unwrap().source(), "leboncoin");
        assert!(registry.get("ebay").is_none());
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        let config = Config::default();
        assert!(matches!(
            build_scraper("mobile.de", &config),
            Err(HarvestError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_search_filters_from_params() {
        let params = SearchParams {
            brands: vec!["Renault".into()],
            transmission: vec!["Automatique".into()],
            max_km: Some(100000),
            ..Default::default()
        };
        let filters = SearchFilters::from(&params);
        assert_eq!(filters.brands, vec!["Renault"]);
        assert_eq!(filters.transmissions, vec!["Automatique"]);
        assert_eq!(filters.max_km, Some(100000));
    }

    #[test]
    fn test_parse_search_page_contains_card_errors() {
        let config = Config::default();
        let scraper = build_scraper("lacentrale", &config).unwrap();
        let html = r#"
            <div class="searchCard">
                <a class="searchCard__link" href="/auto-occasion-annonce-1.html"></a>
                <h3 class="searchCard__title">Renault Clio</h3>
            </div>
            <div class="searchCard"><h3 class="searchCard__title">No link</h3></div>
        "#;

        let page = parse_search_page(scraper.as_ref(), 1, html);
        assert_eq!(page.cards.len(), 1);
        assert_eq!(page.dropped, 1);
        assert!(!page.has_next);
    }
}
