//! Time utilities for gotime
//!
//! Provides both monotonic time (for poll cadence and timeout enforcement)
//! and wall-clock time (for timestamps shown to callers and in events).
//!
//! Monotonic time is backed by `tokio::time::Instant`, so a paused tokio
//! clock in tests drives deadlines and rate-limiter refills consistently.

use chrono::{DateTime, Local};
use std::time::Duration;

/// Get the current local wall-clock time.
pub fn now() -> DateTime<Local> {
    Local::now()
}

/// Add a std duration to a wall-clock time, saturating on overflow.
pub fn wall_after(start: DateTime<Local>, by: Duration) -> DateTime<Local> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| start.checked_add_signed(d))
        .or_else(|| start.checked_add_signed(chrono::Duration::days(36_500)))
        .unwrap_or(start)
}

/// Format a DateTime for display with full date and time.
pub fn format_datetime_full(dt: &DateTime<Local>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Represents a point in monotonic time for deadline enforcement.
/// This is immune to wall-clock changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonotonicInstant(tokio::time::Instant);

impl MonotonicInstant {
    pub fn now() -> Self {
        Self(tokio::time::Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// Duration since `earlier`, or zero if `earlier` is later than `self`
    pub fn duration_since(&self, earlier: MonotonicInstant) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    pub fn checked_add(&self, duration: Duration) -> Option<MonotonicInstant> {
        self.0.checked_add(duration).map(MonotonicInstant)
    }

    /// Returns duration until `self`, or zero if `self` is in the past
    pub fn saturating_duration_until(&self, from: MonotonicInstant) -> Duration {
        self.0.saturating_duration_since(from.0)
    }

    pub fn as_tokio(&self) -> tokio::time::Instant {
        self.0
    }
}

impl std::ops::Add<Duration> for MonotonicInstant {
    type Output = MonotonicInstant;

    fn add(self, rhs: Duration) -> Self::Output {
        MonotonicInstant(self.0 + rhs)
    }
}

/// Format a travel duration in compact human form: "45s", "12m", "1h", "1h 23m".
///
/// Seconds are dropped once the value reaches a full minute.
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    if total_secs < 60 {
        return format!("{}s", total_secs);
    }

    let minutes = total_secs / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    let remaining_minutes = minutes % 60;
    if remaining_minutes == 0 {
        format!("{}h", hours)
    } else {
        format!("{}h {}m", hours, remaining_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m");
        assert_eq!(format_duration(Duration::from_secs(45 * 60)), "45m");
        assert_eq!(format_duration(Duration::from_secs(2 * 3600)), "2h");
        assert_eq!(format_duration(Duration::from_secs(3600 + 23 * 60 + 5)), "1h 23m");
    }

    #[test]
    fn test_wall_after() {
        let start = Local.with_ymd_and_hms(2025, 12, 25, 14, 30, 0).unwrap();
        let later = wall_after(start, Duration::from_secs(600));
        assert_eq!(format_datetime_full(&later), "2025-12-25 14:40:00");
    }

    #[test]
    fn test_wall_after_saturates() {
        let start = Local.with_ymd_and_hms(2025, 12, 25, 14, 30, 0).unwrap();
        let far = wall_after(start, Duration::MAX);
        assert!(far > start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_instant_follows_tokio_clock() {
        let t1 = MonotonicInstant::now();
        tokio::time::sleep(Duration::from_secs(90)).await;
        let t2 = MonotonicInstant::now();

        assert!(t2 > t1);
        assert_eq!(t2.duration_since(t1), Duration::from_secs(90));
        assert_eq!(t1.duration_since(t2), Duration::ZERO);
    }

    #[test]
    fn test_saturating_duration_until() {
        let start = MonotonicInstant::now();
        let deadline = start + Duration::from_secs(60);

        assert_eq!(deadline.saturating_duration_until(start), Duration::from_secs(60));
        assert_eq!(start.saturating_duration_until(deadline), Duration::ZERO);
    }
}
