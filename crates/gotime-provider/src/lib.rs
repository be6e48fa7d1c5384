//! Travel-time provider contract for gotime
//!
//! The engine depends only on the traits here; concrete adapters (Google
//! Maps, the scripted mock) live alongside them.

mod google;
mod mock;
mod traits;

pub use google::*;
pub use mock::*;
pub use traits::*;
