//! Headless Chrome transport
//!
//! The `headless_chrome` API is blocking, so every call runs on the blocking
//! thread pool. Dropping the transport drops the `Browser`, which kills the
//! Chrome process.

use crate::crawler::fetcher::{Transport, TransportError, TransportSettings};
use anyhow::Context;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// How long to look for a cookie-consent button
const CONSENT_WAIT: Duration = Duration::from_secs(3);

pub struct BrowserTransport {
    browser: Mutex<Option<Browser>>,
    tab: Arc<Tab>,
    consent_selector: Option<String>,
    consent_done: Arc<AtomicBool>,
}

fn browser_error(e: anyhow::Error) -> TransportError {
    TransportError::Browser(format!("{:#}", e))
}

async fn blocking<T, F>(f: F) -> Result<T, TransportError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransportError::Browser(format!("browser task failed: {}", e)))?
        .map_err(browser_error)
}

impl BrowserTransport {
    /// Launches Chrome with the session identity
    pub async fn launch(settings: &TransportSettings) -> Result<Self, TransportError> {
        let settings = settings.clone();
        let consent_selector = settings.consent_selector.clone();

        let (browser, tab) = blocking(move || {
            let options = LaunchOptions::default_builder()
                .headless(settings.headless)
                .window_size(Some((1920, 1080)))
                .proxy_server(settings.proxy.as_deref())
                .idle_browser_timeout(settings.timeout.max(Duration::from_secs(60)))
                .build()
                .context("Failed to build launch options")?;
            let browser = Browser::new(options).context("Failed to launch Chrome browser")?;

            let tab = browser.new_tab().context("Failed to open tab")?;
            tab.set_default_timeout(settings.timeout);
            tab.set_user_agent(&settings.user_agent, Some("fr-FR,fr;q=0.9"), None)
                .context("Failed to set user agent")?;
            Ok((browser, tab))
        })
        .await?;

        info!("Launched headless Chrome");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            tab,
            consent_selector,
            consent_done: Arc::new(AtomicBool::new(false)),
        })
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        match self.browser.lock() {
            Ok(guard) if guard.is_some() => Ok(()),
            _ => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl Transport for BrowserTransport {
    async fn get(&self, url: &str) -> Result<String, TransportError> {
        self.ensure_open()?;
        let tab = self.tab.clone();
        let url = url.to_string();
        let consent = self.consent_selector.clone();
        let consent_done = self.consent_done.clone();

        blocking(move || {
            tab.navigate_to(&url)
                .with_context(|| format!("Failed to navigate to {}", url))?
                .wait_until_navigated()
                .context("Navigation did not complete")?;

            // The banner only shows on the first page of a session
            if let Some(selector) = consent.filter(|_| !consent_done.load(Ordering::Acquire)) {
                consent_done.store(true, Ordering::Release);
                match tab.wait_for_element_with_custom_timeout(&selector, CONSENT_WAIT) {
                    Ok(button) => {
                        if button.click().is_ok() {
                            debug!("Dismissed cookie banner ({})", selector);
                        }
                    }
                    Err(_) => debug!("No cookie banner found ({})", selector),
                }
            }

            tab.get_content().context("Failed to read page content")
        })
        .await
    }

    fn can_scroll(&self) -> bool {
        true
    }

    async fn document_height(&self) -> Result<u64, TransportError> {
        self.ensure_open()?;
        let tab = self.tab.clone();
        blocking(move || {
            let result = tab
                .evaluate("document.body.scrollHeight", false)
                .context("Failed to read document height")?;
            Ok(result.value.and_then(|v| v.as_u64()).unwrap_or(0))
        })
        .await
    }

    async fn scroll_to_bottom(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        let tab = self.tab.clone();
        blocking(move || {
            tab.evaluate("window.scrollTo(0, document.body.scrollHeight)", false)
                .context("Failed to scroll")?;
            Ok(())
        })
        .await
    }

    async fn content(&self) -> Result<String, TransportError> {
        self.ensure_open()?;
        let tab = self.tab.clone();
        blocking(move || tab.get_content().context("Failed to read page content")).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        let browser = match self.browser.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(browser) = browser {
            // Dropping the browser kills the Chrome process
            blocking(move || {
                drop(browser);
                Ok(())
            })
            .await?;
            info!("Closed headless Chrome");
        }
        Ok(())
    }
}
