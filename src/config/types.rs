use crate::ConfigError;
use chrono::NaiveTime;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for Car-Harvest
///
/// Every section is optional in the TOML file; missing sections fall back to
/// the defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enabled source names, in run order
    pub sources: Vec<String>,

    /// User-agent pool; one value is drawn per crawl session
    pub user_agents: Vec<String>,

    pub search_params: SearchParams,
    pub scraping: ScrapingConfig,
    pub images: ImageConfig,
    pub proxy: ProxyConfig,
    pub scheduling: SchedulingConfig,
    pub storage: StorageConfig,

    /// Per-site overrides, keyed by source name
    pub site_configs: BTreeMap<String, SiteConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: vec!["lacentrale".to_string()],
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0".to_string(),
            ],
            search_params: SearchParams::fallback(),
            scraping: ScrapingConfig::default(),
            images: ImageConfig::default(),
            proxy: ProxyConfig::default(),
            scheduling: SchedulingConfig::default(),
            storage: StorageConfig::default(),
            site_configs: SiteConfig::builtin_all(),
        }
    }
}

impl Config {
    /// Returns the site configuration for a source
    ///
    /// Explicit entries win; otherwise the built-in entry for known sources is used.
    pub fn site_config(&self, source: &str) -> Option<SiteConfig> {
        self.site_configs
            .get(source)
            .cloned()
            .or_else(|| SiteConfig::builtin(source))
    }

    /// Delay between two requests to a source, before jitter
    pub fn request_delay(&self, source: &str) -> Duration {
        let secs = self
            .site_config(source)
            .and_then(|site| site.rate_limit)
            .unwrap_or(self.scraping.delay_between_requests);
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Search filters applied to every source
///
/// Fields left out of a `[search_params]` table mean "no filter"; the
/// fallback filters only apply when the whole table is missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub brands: Vec<String>,
    pub models: Vec<String>,
    pub max_price: Option<u64>,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    pub max_km: Option<u64>,
    pub fuel_types: Vec<String>,
    pub transmission: Vec<String>,
}

impl SearchParams {
    fn fallback() -> Self {
        Self {
            brands: vec![
                "Renault".to_string(),
                "Peugeot".to_string(),
                "Citroen".to_string(),
                "Volkswagen".to_string(),
            ],
            models: Vec::new(),
            max_price: Some(30000),
            min_year: Some(2015),
            max_year: Some(2023),
            max_km: None,
            fuel_types: Vec::new(),
            transmission: Vec::new(),
        }
    }
}

/// Crawl behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    /// Base delay between requests, in seconds (jittered x0.5..x1.5)
    pub delay_between_requests: f64,

    /// Total attempts per request, including the first
    pub max_retries: u32,

    /// Backoff base in seconds; attempt n waits base * 2^n
    pub retry_backoff_base: f64,

    /// Request timeout in seconds
    pub timeout: u64,

    pub max_pages_per_source: u32,
    pub headless: bool,

    /// Scroll-to-load bounds for browser sessions
    pub max_scrolls: u32,
    pub scroll_pause: f64,

    /// Number of sources crawled at the same time
    pub max_concurrent_sources: usize,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            delay_between_requests: 2.0,
            max_retries: 3,
            retry_backoff_base: 1.0,
            timeout: 30,
            max_pages_per_source: 5,
            headless: true,
            max_scrolls: 3,
            scroll_pause: 1.0,
            max_concurrent_sources: 1,
        }
    }
}

impl ScrapingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs_f64(self.retry_backoff_base.max(0.0))
    }

    pub fn scroll_pause(&self) -> Duration {
        Duration::from_secs_f64(self.scroll_pause.max(0.0))
    }
}

/// Image download configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub download: bool,
    pub max_per_car: usize,
    pub path: String,
    pub max_concurrent_downloads: usize,

    /// Per-image timeout in seconds
    pub timeout: u64,

    /// Optimize pass: maximum width in pixels and JPEG quality
    pub max_width: u32,
    pub quality: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            download: true,
            max_per_car: 10,
            path: "data/images".to_string(),
            max_concurrent_downloads: 4,
            timeout: 30,
            max_width: 1200,
            quality: 85,
        }
    }
}

/// Proxy rotation configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub use_proxy: bool,
    pub proxy_list: Vec<String>,
}

/// Daily schedule configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub enabled: bool,

    /// Local wall-clock time, "HH:MM"
    pub time: String,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            time: "03:00".to_string(),
        }
    }
}

impl SchedulingConfig {
    /// Parses the configured "HH:MM" time of day
    pub fn time_of_day(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(self.time.trim(), "%H:%M").map_err(|e| {
            ConfigError::Validation(format!(
                "scheduling.time must be HH:MM, got '{}': {}",
                self.time, e
            ))
        })
    }
}

/// Listing store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Json,
    Sqlite,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// JSON document path or SQLite database path
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Json,
            path: "data/cars.json".to_string(),
        }
    }
}

/// Site-specific settings
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub base_url: String,
    pub search_url: String,

    /// Card selector on search pages; overrides the scraper's built-in selector
    #[serde(default)]
    pub listing_selector: Option<String>,

    #[serde(default)]
    pub detail_selector: Option<String>,

    /// Seconds between requests; overrides `scraping.delay_between_requests`
    #[serde(default)]
    pub rate_limit: Option<f64>,

    /// Render pages in the headless browser instead of plain HTTP
    #[serde(default)]
    pub use_browser: bool,
}

impl SiteConfig {
    fn entry(base: &str, search: &str, listing: &str, detail: &str, rate: f64) -> Self {
        Self {
            base_url: base.to_string(),
            search_url: search.to_string(),
            listing_selector: Some(listing.to_string()),
            detail_selector: Some(detail.to_string()),
            rate_limit: Some(rate),
            use_browser: false,
        }
    }

    /// Built-in settings for the known marketplaces
    pub fn builtin(source: &str) -> Option<Self> {
        let site = match source {
            "lacentrale" => Self::entry(
                "https://www.lacentrale.fr",
                "https://www.lacentrale.fr/listing",
                ".searchCard",
                ".adview",
                2.0,
            ),
            "leboncoin" => Self::entry(
                "https://www.leboncoin.fr",
                "https://www.leboncoin.fr/recherche",
                ".styles_adCard__HQRFN",
                ".styles_adview__XYaZr",
                3.0,
            ),
            "leparking" => Self::entry(
                "https://www.leparking.fr",
                "https://www.leparking.fr/voiture-occasion/",
                ".vehicle-card",
                ".vehicle-detail",
                2.0,
            ),
            "autoscout24" => Self::entry(
                "https://www.autoscout24.fr",
                "https://www.autoscout24.fr/lst",
                ".cldt-summary-full-item",
                ".cldt-detail",
                3.0,
            ),
            _ => return None,
        };
        Some(site)
    }

    fn builtin_all() -> BTreeMap<String, SiteConfig> {
        ["lacentrale", "leboncoin", "leparking", "autoscout24"]
            .iter()
            .filter_map(|name| Self::builtin(name).map(|site| (name.to_string(), site)))
            .collect()
    }
}
