//! Shared value types for the gotime API

use chrono::{DateTime, Local};
use gotime_util::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors constructing API value types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("Latitude {0} out of range (-90..=90)")]
    LatitudeOutOfRange(f64),

    #[error("Longitude {0} out of range (-180..=180)")]
    LongitudeOutOfRange(f64),

    #[error("Coordinates must be finite numbers")]
    NonFiniteCoordinate,

    #[error("Malformed coordinates '{0}': expected 'lat,lng'")]
    MalformedCoordinates(String),

    #[error("Target duration must be positive")]
    ZeroTarget,

    #[error("Unknown travel mode '{0}': expected driving, walking or transit")]
    UnknownTravelMode(String),
}

/// A resolved geographic point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLocation")]
pub struct Location {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawLocation {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawLocation> for Location {
    type Error = ValueError;

    fn try_from(raw: RawLocation) -> Result<Self, Self::Error> {
        Location::new(raw.latitude, raw.longitude)
    }
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValueError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(ValueError::NonFiniteCoordinate);
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ValueError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ValueError::LongitudeOutOfRange(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

impl FromStr for Location {
    type Err = ValueError;

    /// Parse `"lat,lng"` (whitespace around either number is allowed)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ValueError::MalformedCoordinates(s.to_string());
        let (lat, lng) = s.split_once(',').ok_or_else(malformed)?;
        let lat: f64 = lat.trim().parse().map_err(|_| malformed())?;
        let lng: f64 = lng.trim().parse().map_err(|_| malformed())?;
        Location::new(lat, lng)
    }
}

/// How the route is travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelMode {
    #[default]
    Driving,
    Walking,
    Transit,
}

impl TravelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Driving => "driving",
            TravelMode::Walking => "walking",
            TravelMode::Transit => "transit",
        }
    }
}

impl fmt::Display for TravelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TravelMode {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "driving" | "drive" => Ok(TravelMode::Driving),
            "walking" | "walk" => Ok(TravelMode::Walking),
            "transit" => Ok(TravelMode::Transit),
            other => Err(ValueError::UnknownTravelMode(other.to_string())),
        }
    }
}

/// Immutable description of the route being watched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteQuery {
    pub origin: Location,
    pub destination: Location,
    #[serde(default)]
    pub mode: TravelMode,
    /// Departure-time hint; `None` means "now"
    #[serde(default)]
    pub departure: Option<DateTime<Local>>,
}

impl RouteQuery {
    pub fn new(origin: Location, destination: Location) -> Self {
        Self {
            origin,
            destination,
            mode: TravelMode::Driving,
            departure: None,
        }
    }

    pub fn with_mode(mut self, mode: TravelMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_departure(mut self, departure: DateTime<Local>) -> Self {
        self.departure = Some(departure);
        self
    }

    /// Short human-readable route description
    pub fn summary(&self) -> String {
        format!(
            "({}, {}) -> ({}, {}) [{}]",
            self.origin.latitude(),
            self.origin.longitude(),
            self.destination.latitude(),
            self.destination.longitude(),
            self.mode
        )
    }
}

/// Target travel time plus tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawThreshold")]
pub struct Threshold {
    target: Duration,
    tolerance: Duration,
}

#[derive(Deserialize)]
struct RawThreshold {
    target: Duration,
    tolerance: Duration,
}

impl TryFrom<RawThreshold> for Threshold {
    type Error = ValueError;

    fn try_from(raw: RawThreshold) -> Result<Self, Self::Error> {
        Threshold::new(raw.target, raw.tolerance)
    }
}

impl Threshold {
    pub fn new(target: Duration, tolerance: Duration) -> Result<Self, ValueError> {
        if target.is_zero() {
            return Err(ValueError::ZeroTarget);
        }
        Ok(Self { target, tolerance })
    }

    pub fn target(&self) -> Duration {
        self.target
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Largest observed duration that still satisfies the threshold
    pub fn limit(&self) -> Duration {
        self.target.saturating_add(self.tolerance)
    }

    pub fn is_met(&self, observed: Duration) -> bool {
        observed <= self.limit()
    }
}

/// One successful provider answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelEstimate {
    pub duration: Duration,
    pub distance_meters: u64,
    /// Provider route summary (e.g. the main road name)
    pub summary: String,
}

/// Monitoring session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not yet polled
    Pending,
    /// At least one poll attempted
    Active,
    ThresholdMet,
    TimedOut,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::ThresholdMet
                | SessionStatus::TimedOut
                | SessionStatus::Cancelled
                | SessionStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::ThresholdMet => "threshold_met",
            SessionStatus::TimedOut => "timed_out",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable copy of a session's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub route: RouteQuery,
    pub threshold: Threshold,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub status: SessionStatus,
    pub created_at: DateTime<Local>,
    pub deadline: DateTime<Local>,
    pub time_remaining: Duration,
    pub last_poll_at: Option<DateTime<Local>>,
    pub last_observed: Option<TravelEstimate>,
    pub consecutive_errors: u32,
    pub poll_count: u64,
    pub last_error: Option<String>,
}
