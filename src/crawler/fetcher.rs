//! Page transports
//!
//! This module defines the [`Transport`] capability used by
//! [`CrawlSession`](crate::crawler::CrawlSession):
//! - fetching a URL and returning its HTML
//! - optional scroll-to-load primitives for rendered pages
//! - error classification into transient and permanent failures
//!
//! [`HttpTransport`] is the plain reqwest implementation; the headless browser
//! adapter lives in `crawler::browser`.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single transport call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("failed to read body: {0}")]
    Body(String),

    #[error("browser failure: {0}")]
    Browser(String),

    #[error("transport is closed")]
    Closed,
}

impl TransportError {
    /// Returns true when retrying the same request may succeed
    ///
    /// | Condition | Transient |
    /// |-----------|-----------|
    /// | Timeout, connect error, truncated body | yes |
    /// | HTTP 429, HTTP 5xx | yes |
    /// | Other HTTP 4xx | no |
    /// | Browser navigation failure | yes |
    /// | Closed transport | no |
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connect(_) | Self::Body(_) | Self::Browser(_) => true,
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            Self::Closed => false,
        }
    }
}

/// Identity and limits applied to one transport
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub user_agent: String,
    pub proxy: Option<String>,
    pub timeout: Duration,
    pub headless: bool,
    /// Cookie-consent button clicked once per browser session
    pub consent_selector: Option<String>,
}

/// Capability used by a crawl session to load pages
#[async_trait]
pub trait Transport: Send + Sync {
    /// Loads `url` and returns its HTML
    async fn get(&self, url: &str) -> Result<String, TransportError>;

    /// True when the transport renders pages and can scroll them
    fn can_scroll(&self) -> bool {
        false
    }

    /// Height of the current document in pixels
    async fn document_height(&self) -> Result<u64, TransportError> {
        Ok(0)
    }

    /// Scrolls the current document to the bottom
    async fn scroll_to_bottom(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// HTML of the current document, after any scrolling
    async fn content(&self) -> Result<String, TransportError> {
        Err(TransportError::Closed)
    }

    /// Releases the underlying resources; calling it twice is a no-op
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Builds an HTTP client presenting the session identity
pub fn build_http_client(settings: &TransportSettings) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7"),
    );

    let mut builder = Client::builder()
        .user_agent(settings.user_agent.as_str())
        .default_headers(headers)
        .timeout(settings.timeout)
        .connect_timeout(settings.timeout.min(Duration::from_secs(10)))
        .cookie_store(true)
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = &settings.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }

    builder.build()
}

fn classify(url: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(url.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_body() || e.is_decode() {
        TransportError::Body(e.to_string())
    } else {
        TransportError::Connect(e.to_string())
    }
}

/// Plain HTTP transport
pub struct HttpTransport {
    client: Client,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(build_http_client(settings)?))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<String, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let response = self.client.get(url).send().await.map_err(|e| classify(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.text().await.map_err(|e| classify(url, e))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
