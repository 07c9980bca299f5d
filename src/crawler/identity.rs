//! Per-session identity: user agent and proxy
//!
//! One value of each is drawn when a session opens and kept for its lifetime.

use crate::config::ProxyConfig;

/// Real desktop browser user agents, used when the configured pool is empty
pub const FALLBACK_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

fn pick<'a>(values: &'a [String]) -> Option<&'a str> {
    let values: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values[fastrand::usize(..values.len())])
    }
}

/// Draws a user agent from the pool, falling back to [`FALLBACK_USER_AGENTS`]
pub fn pick_user_agent(pool: &[String]) -> String {
    match pick(pool) {
        Some(agent) => agent.to_string(),
        None => FALLBACK_USER_AGENTS[fastrand::usize(..FALLBACK_USER_AGENTS.len())].to_string(),
    }
}

/// Draws a proxy when rotation is enabled
pub fn pick_proxy(config: &ProxyConfig) -> Option<String> {
    if !config.use_proxy {
        return None;
    }
    pick(&config.proxy_list).map(str::to_string)
}
