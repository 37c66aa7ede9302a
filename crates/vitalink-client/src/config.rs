//! Synchronization tuning, loaded from environment variables.
//!
//! All settings have defaults so the client runs with zero
//! configuration.

use std::time::Duration;

use vitalink_shared::constants::{
    MESSAGE_PAGE_SIZE, PREFETCH_CHUNK_SIZE, SEARCH_CACHE_CAP, SEND_CONFIRM_DELAY_MS,
    TYPING_DEBOUNCE_MS, TYPING_STALE_MS,
};

/// Client synchronization configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Messages fetched per history page (initial load and pagination).
    /// Env: `VITALINK_PAGE_SIZE`. Default: 50.
    pub page_size: u32,

    /// Trailing debounce before an idle typist's flag is cleared.
    /// Env: `VITALINK_TYPING_DEBOUNCE_MS`. Default: 3000.
    pub typing_debounce: Duration,

    /// Age past which a stored typing flag counts as "not typing".
    /// Env: `VITALINK_TYPING_STALE_MS`. Default: 10000.
    pub typing_stale_ms: i64,

    /// Maximum concurrent profile fetches per prefetch batch.
    /// Env: `VITALINK_PREFETCH_CHUNK`. Default: 10.
    pub prefetch_chunk: usize,

    /// Delay between the realtime write and the durable `sent` copy of
    /// an outgoing message.
    /// Env: `VITALINK_CONFIRM_DELAY_MS`. Default: 500.
    pub confirm_delay: Duration,

    /// Maximum cached user-search queries per session.
    pub search_cache_cap: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: MESSAGE_PAGE_SIZE,
            typing_debounce: Duration::from_millis(TYPING_DEBOUNCE_MS),
            typing_stale_ms: TYPING_STALE_MS,
            prefetch_chunk: PREFETCH_CHUNK_SIZE,
            confirm_delay: Duration::from_millis(SEND_CONFIRM_DELAY_MS),
            search_cache_cap: SEARCH_CACHE_CAP,
        }
    }
}

impl SyncConfig {
    /// Build a config from the environment, falling back to defaults
    /// for unset or unparsable variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            page_size: env_parse("VITALINK_PAGE_SIZE").unwrap_or(defaults.page_size),
            typing_debounce: env_parse("VITALINK_TYPING_DEBOUNCE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.typing_debounce),
            typing_stale_ms: env_parse("VITALINK_TYPING_STALE_MS")
                .unwrap_or(defaults.typing_stale_ms),
            prefetch_chunk: env_parse("VITALINK_PREFETCH_CHUNK")
                .unwrap_or(defaults.prefetch_chunk),
            confirm_delay: env_parse("VITALINK_CONFIRM_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.confirm_delay),
            search_cache_cap: defaults.search_cache_cap,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.typing_debounce, Duration::from_secs(3));
        assert_eq!(config.typing_stale_ms, 10_000);
        assert_eq!(config.prefetch_chunk, 10);
    }
}
