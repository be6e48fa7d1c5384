//! Monitoring core for gotime
//!
//! This crate contains:
//! - Session state machine (Pending -> Active -> ThresholdMet/TimedOut/Cancelled/Failed)
//! - Session registry (create, stop, query, retention)
//! - Poll scheduler (one task per session, shared worker pool and rate limiter)
//! - Event bus for terminal session events
//!
//! Deadlines use monotonic time and never depend on polls succeeding.

mod engine;
mod error;
mod events;
mod registry;
mod scheduler;
mod session;

pub use engine::*;
pub use error::*;
pub use events::*;
pub use registry::SessionRegistry;
pub use scheduler::PollScheduler;
pub use session::*;
