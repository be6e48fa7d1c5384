//! Validated settings structures

use crate::schema::{RawConfig, RawEngineConfig, RawProviderConfig, RawRateLimit};
use std::time::Duration;

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "GOOGLE_MAPS_API_KEY";

pub const DEFAULT_MIN_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(120 * 60);
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;
pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 10;
pub const DEFAULT_BASE_URL: &str = "https://maps.googleapis.com/maps/api";

/// Validated configuration ready for use by the engine and provider
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub engine: EngineConfig,
    pub provider: ProviderConfig,
}

impl Config {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            engine: EngineConfig::from_raw(raw.engine, raw.rate_limit),
            provider: ProviderConfig::from_raw(raw.provider),
        }
    }
}

/// Monitoring engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub min_poll_interval: Duration,
    pub default_poll_interval: Duration,
    pub default_max_wait: Duration,
    pub initial_poll_delay: Duration,
    pub max_consecutive_errors: u32,
    pub max_concurrent_sessions: usize,
    pub worker_pool_size: usize,
    pub rate_limit_wait_cap: Duration,
    pub provider_timeout: Duration,
    pub sweep_interval: Duration,
    pub terminal_retention: Duration,
    pub event_buffer: usize,
    pub rate_limit: RateLimitConfig,
}

impl EngineConfig {
    fn from_raw(raw: RawEngineConfig, rate_limit: RawRateLimit) -> Self {
        let defaults = Self::default();
        let secs = Duration::from_secs;

        Self {
            min_poll_interval: raw
                .min_poll_interval_seconds
                .map(secs)
                .unwrap_or(defaults.min_poll_interval),
            default_poll_interval: raw
                .default_poll_interval_seconds
                .map(secs)
                .unwrap_or(defaults.default_poll_interval),
            default_max_wait: raw
                .default_max_wait_minutes
                .map(|m| secs(m.saturating_mul(60)))
                .unwrap_or(defaults.default_max_wait),
            initial_poll_delay: raw
                .initial_poll_delay_seconds
                .map(secs)
                .unwrap_or(defaults.initial_poll_delay),
            max_consecutive_errors: raw
                .max_consecutive_errors
                .unwrap_or(defaults.max_consecutive_errors),
            max_concurrent_sessions: raw
                .max_concurrent_sessions
                .unwrap_or(defaults.max_concurrent_sessions),
            worker_pool_size: raw.worker_pool_size.unwrap_or(defaults.worker_pool_size),
            rate_limit_wait_cap: raw
                .rate_limit_wait_cap_seconds
                .map(secs)
                .unwrap_or(defaults.rate_limit_wait_cap),
            provider_timeout: raw
                .provider_timeout_seconds
                .map(secs)
                .unwrap_or(defaults.provider_timeout),
            sweep_interval: raw
                .sweep_interval_seconds
                .map(secs)
                .unwrap_or(defaults.sweep_interval),
            terminal_retention: raw
                .terminal_retention_seconds
                .map(secs)
                .unwrap_or(defaults.terminal_retention),
            event_buffer: raw.event_buffer.unwrap_or(defaults.event_buffer),
            rate_limit: RateLimitConfig::from_raw(rate_limit),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_poll_interval: DEFAULT_MIN_POLL_INTERVAL,
            default_poll_interval: DEFAULT_POLL_INTERVAL,
            default_max_wait: DEFAULT_MAX_WAIT,
            initial_poll_delay: Duration::ZERO,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            worker_pool_size: 4,
            rate_limit_wait_cap: Duration::from_secs(10),
            provider_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(15),
            terminal_retention: Duration::from_secs(5 * 60),
            event_buffer: 256,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Provider quota shared by all sessions
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl RateLimitConfig {
    fn from_raw(raw: RawRateLimit) -> Self {
        let defaults = Self::default();
        Self {
            capacity: raw.capacity.unwrap_or(defaults.capacity),
            refill_per_second: raw.refill_per_second.unwrap_or(defaults.refill_per_second),
        }
    }
}

impl Default for RateLimitConfig {
    /// Directions API allows 50 queries per second per project
    fn default() -> Self {
        Self {
            capacity: 50,
            refill_per_second: 50.0,
        }
    }
}

/// Travel-time provider settings
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl ProviderConfig {
    fn from_raw(raw: RawProviderConfig) -> Self {
        let defaults = Self::default();
        Self {
            api_key: raw.api_key,
            base_url: raw
                .base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            request_timeout: raw
                .request_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }

    /// Configured key, else the `GOOGLE_MAPS_API_KEY` environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_settings() {
        let engine = EngineConfig::default();
        assert_eq!(engine.default_poll_interval, Duration::from_secs(300));
        assert_eq!(engine.default_max_wait, Duration::from_secs(7200));
        assert_eq!(engine.max_concurrent_sessions, 10);
        assert_eq!(engine.min_poll_interval, Duration::from_secs(30));
        assert_eq!(engine.max_consecutive_errors, 5);
    }

    #[test]
    fn raw_values_override_defaults() {
        let raw: RawConfig = toml::from_str(
            r#"
            config_version = 1
            [engine]
            default_max_wait_minutes = 10
            terminal_retention_seconds = 0
            [rate_limit]
            capacity = 1
            [provider]
            base_url = "http://localhost:8080/maps/api/"
        "#,
        )
        .unwrap();

        let config = Config::from_raw(raw);
        assert_eq!(config.engine.default_max_wait, Duration::from_secs(600));
        assert_eq!(config.engine.terminal_retention, Duration::ZERO);
        assert_eq!(config.engine.rate_limit.capacity, 1);
        assert_eq!(config.engine.rate_limit.refill_per_second, 50.0);
        assert_eq!(config.provider.base_url, "http://localhost:8080/maps/api");
    }

    #[test]
    fn configured_api_key_wins() {
        let provider = ProviderConfig {
            api_key: Some("from-file".into()),
            ..Default::default()
        };
        assert_eq!(provider.resolve_api_key().as_deref(), Some("from-file"));
    }
}
