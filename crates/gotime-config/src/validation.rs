//! Configuration validation

use crate::schema::{RawConfig, RawEngineConfig, RawProviderConfig, RawRateLimit};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("default_poll_interval_seconds ({default}s) is below min_poll_interval_seconds ({min}s)")]
    DefaultBelowMinimum { default: u64, min: u64 },

    #[error("rate_limit.refill_per_second must be a positive finite number, got {0}")]
    InvalidRefillRate(f64),

    #[error("provider.base_url '{0}' must start with http:// or https://")]
    InvalidBaseUrl(String),

    #[error("provider.api_key cannot be empty when set")]
    EmptyApiKey,
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    errors.extend(validate_engine(&config.engine));
    errors.extend(validate_rate_limit(&config.rate_limit));
    errors.extend(validate_provider(&config.provider));

    errors
}

fn positive<T: PartialEq + Default>(
    value: Option<T>,
    field: &'static str,
    errors: &mut Vec<ValidationError>,
) {
    if let Some(v) = value
        && v == T::default()
    {
        errors.push(ValidationError::MustBePositive { field });
    }
}

fn validate_engine(engine: &RawEngineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    positive(engine.min_poll_interval_seconds, "engine.min_poll_interval_seconds", &mut errors);
    positive(engine.default_poll_interval_seconds, "engine.default_poll_interval_seconds", &mut errors);
    positive(engine.default_max_wait_minutes, "engine.default_max_wait_minutes", &mut errors);
    positive(engine.max_consecutive_errors, "engine.max_consecutive_errors", &mut errors);
    positive(engine.max_concurrent_sessions, "engine.max_concurrent_sessions", &mut errors);
    positive(engine.worker_pool_size, "engine.worker_pool_size", &mut errors);
    positive(engine.rate_limit_wait_cap_seconds, "engine.rate_limit_wait_cap_seconds", &mut errors);
    positive(engine.provider_timeout_seconds, "engine.provider_timeout_seconds", &mut errors);
    positive(engine.sweep_interval_seconds, "engine.sweep_interval_seconds", &mut errors);
    positive(engine.event_buffer, "engine.event_buffer", &mut errors);

    // A default below the floor would make every defaulted request invalid
    let min = engine
        .min_poll_interval_seconds
        .unwrap_or(crate::DEFAULT_MIN_POLL_INTERVAL.as_secs());
    let default = engine
        .default_poll_interval_seconds
        .unwrap_or(crate::DEFAULT_POLL_INTERVAL.as_secs());
    if default > 0 && default < min {
        errors.push(ValidationError::DefaultBelowMinimum { default, min });
    }

    errors
}

fn validate_rate_limit(rate_limit: &RawRateLimit) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    positive(rate_limit.capacity, "rate_limit.capacity", &mut errors);

    if let Some(rate) = rate_limit.refill_per_second
        && !(rate.is_finite() && rate > 0.0)
    {
        errors.push(ValidationError::InvalidRefillRate(rate));
    }

    errors
}

fn validate_provider(provider: &RawProviderConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(url) = &provider.base_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        errors.push(ValidationError::InvalidBaseUrl(url.clone()));
    }

    if let Some(key) = &provider.api_key
        && key.trim().is_empty()
    {
        errors.push(ValidationError::EmptyApiKey);
    }

    positive(provider.request_timeout_seconds, "provider.request_timeout_seconds", &mut errors);

    errors
}
