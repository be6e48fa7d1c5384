//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Monitoring engine settings
    #[serde(default)]
    pub engine: RawEngineConfig,

    /// Provider request quota
    #[serde(default)]
    pub rate_limit: RawRateLimit,

    /// Travel-time provider settings
    #[serde(default)]
    pub provider: RawProviderConfig,
}

/// Engine-level settings; every field falls back to a default
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawEngineConfig {
    /// Smallest poll interval a session may request
    pub min_poll_interval_seconds: Option<u64>,

    /// Poll interval used when a request does not give one
    pub default_poll_interval_seconds: Option<u64>,

    /// Max wait used when a request does not give one
    pub default_max_wait_minutes: Option<u64>,

    /// Delay before a new session's first poll
    pub initial_poll_delay_seconds: Option<u64>,

    /// Consecutive provider failures before a session fails
    pub max_consecutive_errors: Option<u32>,

    /// Upper bound on non-terminal sessions
    pub max_concurrent_sessions: Option<usize>,

    /// Concurrent provider calls across all sessions
    pub worker_pool_size: Option<usize>,

    /// Hard cap on how long a tick waits for a rate-limit token
    pub rate_limit_wait_cap_seconds: Option<u64>,

    /// Per-call provider timeout
    pub provider_timeout_seconds: Option<u64>,

    /// Period of the timeout/eviction sweep
    pub sweep_interval_seconds: Option<u64>,

    /// How long terminal sessions stay queryable
    pub terminal_retention_seconds: Option<u64>,

    /// Event bus buffer per subscriber
    pub event_buffer: Option<usize>,
}

/// Token-bucket quota
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRateLimit {
    /// Burst capacity
    pub capacity: Option<u32>,

    /// Tokens restored per second
    pub refill_per_second: Option<f64>,
}

/// Provider settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawProviderConfig {
    /// API key; `GOOGLE_MAPS_API_KEY` is used when absent
    pub api_key: Option<String>,

    /// Base URL of the maps API
    pub base_url: Option<String>,

    /// HTTP request timeout
    pub request_timeout_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
            config_version = 1

            [engine]
            min_poll_interval_seconds = 30
            default_poll_interval_seconds = 120
            max_consecutive_errors = 3

            [rate_limit]
            capacity = 5
            refill_per_second = 0.5

            [provider]
            api_key = "secret"
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.default_poll_interval_seconds, Some(120));
        assert_eq!(config.engine.max_consecutive_errors, Some(3));
        assert_eq!(config.rate_limit.refill_per_second, Some(0.5));
        assert_eq!(config.provider.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn sections_are_optional() {
        let config: RawConfig = toml::from_str("config_version = 1").unwrap();
        assert!(config.engine.min_poll_interval_seconds.is_none());
        assert!(config.rate_limit.capacity.is_none());
        assert!(config.provider.base_url.is_none());
    }
}
