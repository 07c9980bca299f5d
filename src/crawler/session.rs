//! Crawl session: one transport, one identity, one request cadence
//!
//! A session is used serially by one source's crawl. It owns the transport,
//! applies the jittered rate limit before every request and retries transient
//! failures with exponential backoff.

use crate::config::Config;
use crate::crawler::fetcher::{HttpTransport, Transport, TransportSettings};
use crate::crawler::identity::{pick_proxy, pick_user_agent};
use crate::crawler::throttle::{RateLimiter, RetryPolicy};
use crate::HarvestError;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything a session needs, resolved for one source
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub source: String,
    pub transport: TransportSettings,
    /// Base delay between requests, before jitter
    pub request_delay: Duration,
    pub retry: RetryPolicy,
    pub max_scrolls: u32,
    pub scroll_pause: Duration,
}

impl SessionSettings {
    /// Resolves settings for `source`, drawing the session's user agent and proxy
    pub fn from_config(config: &Config, source: &str, consent_selector: Option<&str>) -> Self {
        let scraping = &config.scraping;
        Self {
            source: source.to_string(),
            transport: TransportSettings {
                user_agent: pick_user_agent(&config.user_agents),
                proxy: pick_proxy(&config.proxy),
                timeout: scraping.timeout(),
                headless: scraping.headless,
                consent_selector: consent_selector.map(str::to_string),
            },
            request_delay: config.request_delay(source),
            retry: RetryPolicy::new(scraping.max_retries, scraping.backoff_base()),
            max_scrolls: scraping.max_scrolls,
            scroll_pause: scraping.scroll_pause(),
        }
    }
}

/// Per-source transport lifecycle and request discipline
pub struct CrawlSession {
    settings: SessionSettings,
    transport: Option<Box<dyn Transport>>,
    limiter: RateLimiter,
    requests: u64,
}

impl CrawlSession {
    /// Opens a plain HTTP session
    pub fn open_http(settings: SessionSettings) -> Result<Self, HarvestError> {
        let transport = HttpTransport::new(&settings.transport)?;
        Ok(Self::with_transport(settings, Box::new(transport)))
    }

    /// Opens a headless browser session
    #[cfg(feature = "browser")]
    pub async fn open_browser(settings: SessionSettings) -> Result<Self, HarvestError> {
        let transport = crate::crawler::browser::BrowserTransport::launch(&settings.transport)
            .await
            .map_err(|e| HarvestError::Browser(e.to_string()))?;
        Ok(Self::with_transport(settings, Box::new(transport)))
    }

    /// Opens a headless browser session
    #[cfg(not(feature = "browser"))]
    pub async fn open_browser(_settings: SessionSettings) -> Result<Self, HarvestError> {
        Err(HarvestError::Browser(
            "built without the `browser` feature".to_string(),
        ))
    }

    /// Wraps an existing transport
    pub fn with_transport(settings: SessionSettings, transport: Box<dyn Transport>) -> Self {
        debug!(
            "Opening session for {} (delay {:?}, {} attempt(s))",
            settings.source, settings.request_delay, settings.retry.max_attempts
        );
        Self {
            limiter: RateLimiter::new(settings.request_delay),
            settings,
            transport: Some(transport),
            requests: 0,
        }
    }

    /// Number of transport calls made, retries included
    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Fetches `url`, retrying transient failures
    ///
    /// Permanent failures return at once; transient ones are retried until the
    /// attempt budget is spent. Both surface as [`HarvestError::Network`].
    pub async fn fetch(&mut self, url: &str) -> Result<String, HarvestError> {
        let Some(transport) = self.transport.as_ref() else {
            return Err(HarvestError::Network {
                url: url.to_string(),
                attempts: 0,
                message: "session is closed".to_string(),
            });
        };
        let retry = self.settings.retry;

        let mut attempt = 0;
        loop {
            self.limiter.wait().await;
            attempt += 1;
            self.requests += 1;

            match transport.get(url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                    let delay = retry.backoff(attempt - 1);
                    warn!(
                        "Fetch failed for {} (attempt {}/{}): {}, retrying in {:?}",
                        url, attempt, retry.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!("Giving up on {} after {} attempt(s): {}", url, attempt, e);
                    return Err(HarvestError::Network {
                        url: url.to_string(),
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Scrolls the current page until its height settles
    ///
    /// Stops when the height is unchanged twice in a row or after
    /// `max_scrolls` scrolls. Returns the refreshed HTML, or `None` when the
    /// transport cannot scroll.
    pub async fn scroll_to_load(&mut self) -> Result<Option<String>, HarvestError> {
        let Some(transport) = self.transport.as_ref() else {
            return Ok(None);
        };
        if !transport.can_scroll() {
            return Ok(None);
        }
        let browser_err = |e: crate::crawler::TransportError| HarvestError::Browser(e.to_string());

        let mut height = transport.document_height().await.map_err(browser_err)?;
        let mut unchanged = 0;
        for _ in 0..self.settings.max_scrolls {
            transport.scroll_to_bottom().await.map_err(browser_err)?;
            tokio::time::sleep(self.settings.scroll_pause).await;

            let new_height = transport.document_height().await.map_err(browser_err)?;
            if new_height == height {
                unchanged += 1;
                if unchanged >= 2 {
                    break;
                }
            } else {
                unchanged = 0;
                height = new_height;
            }
        }

        transport.content().await.map(Some).map_err(browser_err)
    }

    /// Releases the transport; safe to call more than once
    pub async fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("Error closing {} session: {}", self.settings.source, e);
            }
            debug!(
                "Closed {} session after {} request(s)",
                self.settings.source, self.requests
            );
        }
    }
}
