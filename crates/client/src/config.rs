//! Client configuration from environment variables.

use std::time::Duration;

use synonymer_shared::{http_to_ws, join_url, normalize_base_url, WS_PATH};

use crate::push::ReconnectConfig;

/// Everything the core needs to know about its environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Absolute origin of the backend, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// How long a successful auth check is trusted without asking again.
    pub auth_stale_time: Duration,
    /// How long explanation reads stay fresh.
    pub query_stale_time: Duration,
    /// Page size used for listing and local search.
    pub page_size: u32,
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            base_url: normalize_base_url(base_url.as_ref()),
            auth_stale_time: Duration::from_secs(5 * 60),
            query_stale_time: Duration::ZERO,
            page_size: 100,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Read configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SYNONYMER_API_URL`: backend origin (default: "http://localhost:8000")
    /// - `SYNONYMER_AUTH_STALE_SECS`: auth check freshness (default: 300)
    /// - `SYNONYMER_QUERY_STALE_SECS`: explanation read freshness (default: 0)
    /// - `SYNONYMER_PAGE_SIZE`: listing page size (default: 100)
    /// - `SYNONYMER_RECONNECT_MAX_ATTEMPTS`: push reconnect cap, 0 = unbounded (default: 10)
    /// - `SYNONYMER_CONNECT_TIMEOUT_MS`: push handshake timeout (default: 10000)
    pub fn from_env() -> Self {
        let base_url = std::env::var("SYNONYMER_API_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());
        let mut config = Self::new(base_url);

        if let Some(secs) = env_number("SYNONYMER_AUTH_STALE_SECS") {
            config.auth_stale_time = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number("SYNONYMER_QUERY_STALE_SECS") {
            config.query_stale_time = Duration::from_secs(secs);
        }
        if let Some(size) = env_number("SYNONYMER_PAGE_SIZE") {
            config.page_size = u32::try_from(size).unwrap_or(u32::MAX).max(1);
        }
        if let Some(attempts) = env_number("SYNONYMER_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        }
        if let Some(ms) = env_number("SYNONYMER_CONNECT_TIMEOUT_MS") {
            config.reconnect.connect_timeout_ms = u32::try_from(ms).unwrap_or(u32::MAX).max(1);
        }

        config
    }

    /// Absolute URL for an API path.
    pub fn api_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        join_url(&self.base_url, path)
    }

    /// WebSocket URL of the push channel.
    pub fn ws_url(&self) -> String {
        http_to_ws(&self.api_url(WS_PATH))
    }
}

fn env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(%name, value = %raw, "ignoring non-numeric configuration value");
            None
        }
    }
}
