use crate::config::types::{Config, ImageConfig, ProxyConfig, ScrapingConfig, SiteConfig};
use crate::sites::KNOWN_SOURCES;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_sources(config)?;
    validate_scraping_config(&config.scraping)?;
    validate_image_config(&config.images)?;
    validate_proxy_config(&config.proxy)?;
    config.scheduling.time_of_day()?;

    if config.storage.path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "storage.path cannot be empty".to_string(),
        ));
    }

    for (name, site) in &config.site_configs {
        validate_site_config(name, site)?;
    }

    Ok(())
}

/// Validates the source list against the scraper registry
fn validate_sources(config: &Config) -> Result<(), ConfigError> {
    if config.sources.is_empty() {
        return Err(ConfigError::Validation(
            "at least one source must be enabled".to_string(),
        ));
    }

    for source in &config.sources {
        if !KNOWN_SOURCES.contains(&source.as_str()) {
            return Err(ConfigError::Validation(format!(
                "unknown source '{}', expected one of: {}",
                source,
                KNOWN_SOURCES.join(", ")
            )));
        }
    }

    Ok(())
}

/// Validates crawl behavior settings
fn validate_scraping_config(config: &ScrapingConfig) -> Result<(), ConfigError> {
    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "scraping.max_retries must be >= 1, got {}",
            config.max_retries
        )));
    }

    if config.max_pages_per_source < 1 {
        return Err(ConfigError::Validation(format!(
            "scraping.max_pages_per_source must be >= 1, got {}",
            config.max_pages_per_source
        )));
    }

    if config.timeout < 1 {
        return Err(ConfigError::Validation(
            "scraping.timeout must be at least 1 second".to_string(),
        ));
    }

    if config.max_concurrent_sources < 1 {
        return Err(ConfigError::Validation(format!(
            "scraping.max_concurrent_sources must be >= 1, got {}",
            config.max_concurrent_sources
        )));
    }

    for (name, value) in [
        ("delay_between_requests", config.delay_between_requests),
        ("retry_backoff_base", config.retry_backoff_base),
        ("scroll_pause", config.scroll_pause),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::Validation(format!(
                "scraping.{} must be a non-negative number, got {}",
                name, value
            )));
        }
    }

    Ok(())
}

/// Validates image settings
fn validate_image_config(config: &ImageConfig) -> Result<(), ConfigError> {
    if !config.download {
        return Ok(());
    }

    if config.path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "images.path cannot be empty when downloads are enabled".to_string(),
        ));
    }

    if config.max_concurrent_downloads < 1 {
        return Err(ConfigError::Validation(
            "images.max_concurrent_downloads must be >= 1".to_string(),
        ));
    }

    if config.quality == 0 || config.quality > 100 {
        return Err(ConfigError::Validation(format!(
            "images.quality must be between 1 and 100, got {}",
            config.quality
        )));
    }

    if config.max_width == 0 {
        return Err(ConfigError::Validation(
            "images.max_width must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates proxy settings
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    if !config.use_proxy {
        return Ok(());
    }

    if config.proxy_list.is_empty() {
        return Err(ConfigError::Validation(
            "proxy.use_proxy is set but proxy.proxy_list is empty".to_string(),
        ));
    }

    for proxy in &config.proxy_list {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }

    Ok(())
}

/// Validates one site entry
fn validate_site_config(name: &str, site: &SiteConfig) -> Result<(), ConfigError> {
    for url in [&site.base_url, &site.search_url] {
        let parsed = Url::parse(url).map_err(|e| {
            ConfigError::InvalidUrl(format!("site_configs.{}: '{}': {}", name, url, e))
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "site_configs.{}: '{}' must use http or https",
                name, url
            )));
        }
    }

    if let Some(rate) = site.rate_limit {
        if !rate.is_finite() || rate < 0.0 {
            return Err(ConfigError::Validation(format!(
                "site_configs.{}.rate_limit must be a non-negative number, got {}",
                name, rate
            )));
        }
    }

    for selector in [&site.listing_selector, &site.detail_selector]
        .into_iter()
        .flatten()
    {
        scraper::Selector::parse(selector).map_err(|e| {
            ConfigError::InvalidSelector(format!("site_configs.{}: '{}': {:?}", name, selector, e))
        })?;
    }

    Ok(())
}
