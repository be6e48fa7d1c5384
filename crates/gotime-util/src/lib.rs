//! Shared utilities for gotime
//!
//! This crate provides:
//! - ID types (SessionId)
//! - Time utilities (monotonic time, wall-clock helpers, duration formatting)
//! - The shared token-bucket rate limiter
//! - Default paths for the config file

mod ids;
mod paths;
mod rate_limit;
mod time;

pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
