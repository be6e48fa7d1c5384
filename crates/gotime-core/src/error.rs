//! Monitoring errors

use gotime_api::SessionStatus;
use gotime_provider::ProviderError;
use gotime_util::{RateLimited, SessionId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Session {id} already finished ({status})")]
    AlreadyTerminal { id: SessionId, status: SessionStatus },

    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Session limit reached: {limit} sessions already running")]
    SessionLimitReached { limit: usize },

    #[error("Monitor is shutting down")]
    ShuttingDown,
}

pub type MonitorResult<T> = Result<T, MonitorError>;
