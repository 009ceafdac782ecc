//! Cache configuration.
//!
//! Controls the remote cache connection and the bounds applied when the
//! write-behind path mutates cached collections.

use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 1_000;
const DEFAULT_DNS_COOLDOWN_SECS: u64 = 300;
const DEFAULT_SCAN_COUNT: usize = 100;
const DEFAULT_MESSAGE_PAGE_LIMIT: u32 = 50;
const DEFAULT_CHAT_LIST_LIMIT: usize = 50;

/// Cache configuration from `parley.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis URL. When absent the in-process memory backend is used.
    pub url: Option<String>,
    /// Upper bound on a single connection handshake (ms).
    pub connect_timeout_ms: u64,
    /// Delay before retrying a handshake that failed for a non-DNS reason (ms).
    pub reconnect_backoff_ms: u64,
    /// How long reconnects are suppressed after a name-resolution failure.
    pub dns_cooldown_secs: u64,
    /// `COUNT` hint passed to each `SCAN` page.
    pub scan_count: usize,
    /// Page size of the "latest messages" page the write-behind path appends to.
    pub message_page_limit: u32,
    /// Maximum chats kept in a cached chat list.
    pub chat_list_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect_backoff_ms: DEFAULT_RECONNECT_BACKOFF_MS,
            dns_cooldown_secs: DEFAULT_DNS_COOLDOWN_SECS,
            scan_count: DEFAULT_SCAN_COUNT,
            message_page_limit: DEFAULT_MESSAGE_PAGE_LIMIT,
            chat_list_limit: DEFAULT_CHAT_LIST_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            url: settings.url.clone(),
            connect_timeout_ms: settings.connect_timeout.as_millis() as u64,
            reconnect_backoff_ms: settings.reconnect_backoff.as_millis() as u64,
            dns_cooldown_secs: settings.dns_cooldown.as_secs(),
            scan_count: settings.scan_count.get(),
            message_page_limit: settings.message_page_limit.get(),
            chat_list_limit: settings.chat_list_limit.get(),
        }
    }
}

impl CacheConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn dns_cooldown(&self) -> Duration {
        Duration::from_secs(self.dns_cooldown_secs)
    }

    /// Returns the scan count, clamping to 1 if zero.
    pub fn scan_count_non_zero(&self) -> usize {
        self.scan_count.max(1)
    }

    /// Returns the message page limit, clamping to 1 if zero.
    pub fn message_page_limit_non_zero(&self) -> u32 {
        self.message_page_limit.max(1)
    }

    /// Returns the chat list limit, clamping to 1 if zero.
    pub fn chat_list_limit_non_zero(&self) -> usize {
        self.chat_list_limit.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.url.is_none());
        assert_eq!(config.connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.dns_cooldown(), Duration::from_secs(300));
        assert_eq!(config.scan_count, 100);
        assert_eq!(config.message_page_limit, 50);
        assert_eq!(config.chat_list_limit, 50);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            scan_count: 0,
            message_page_limit: 0,
            chat_list_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.scan_count_non_zero(), 1);
        assert_eq!(config.message_page_limit_non_zero(), 1);
        assert_eq!(config.chat_list_limit_non_zero(), 1);
    }
}
