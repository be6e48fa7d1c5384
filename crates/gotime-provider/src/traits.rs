//! Travel-time provider traits

use async_trait::async_trait;
use gotime_api::{Location, RouteQuery, TravelEstimate};
use thiserror::Error;

/// Errors from provider calls
///
/// Providers never retry; the engine owns retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Errors that retrying cannot fix
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::InvalidAddress(_) | ProviderError::AuthFailure(_)
        )
    }

    /// Stable short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::InvalidAddress(_) => "invalid_address",
            ProviderError::QuotaExceeded(_) => "quota_exceeded",
            ProviderError::AuthFailure(_) => "auth_failure",
            ProviderError::NetworkError(_) => "network_error",
            ProviderError::MalformedResponse(_) => "malformed_response",
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Travel-time lookup, one query per call
#[async_trait]
pub trait TravelTimeProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Current travel estimate for the route
    async fn query(&self, route: &RouteQuery) -> ProviderResult<TravelEstimate>;
}

/// Address resolution
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> ProviderResult<Location>;
}
