//! Shared types for gotime
//!
//! This crate defines the values exchanged between the monitoring engine,
//! travel-time providers and callers:
//! - Route and threshold value objects
//! - Session status and snapshots
//! - Session requests (control surface)
//! - Terminal session events (event surface)

mod events;
mod requests;
mod types;

pub use events::*;
pub use requests::*;
pub use types::*;
