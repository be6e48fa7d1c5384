//! Request types for the session control surface

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::{Location, TravelMode};

/// Route endpoint as supplied by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Waypoint {
    /// Already-resolved coordinates
    Coordinates { location: Location },
    /// Free-form address, resolved through a geocoder
    Address { address: String },
}

impl Waypoint {
    pub fn address(address: impl Into<String>) -> Self {
        Self::Address {
            address: address.into(),
        }
    }

    pub fn coordinates(location: Location) -> Self {
        Self::Coordinates { location }
    }
}

impl From<Location> for Waypoint {
    fn from(location: Location) -> Self {
        Self::coordinates(location)
    }
}

impl FromStr for Waypoint {
    type Err = std::convert::Infallible;

    /// `"lat,lng"` becomes coordinates; anything else is treated as an address
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<Location>() {
            Ok(location) => Waypoint::coordinates(location),
            Err(_) => Waypoint::address(s.trim()),
        })
    }
}

/// Start-monitoring request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub origin: Waypoint,
    pub destination: Waypoint,
    #[serde(default)]
    pub mode: TravelMode,
    #[serde(default)]
    pub departure: Option<DateTime<Local>>,
    pub target: Duration,
    #[serde(default)]
    pub tolerance: Duration,
    /// Falls back to the engine default when absent
    #[serde(default)]
    pub poll_interval: Option<Duration>,
    /// Falls back to the engine default when absent
    #[serde(default)]
    pub max_wait: Option<Duration>,
}

impl SessionRequest {
    pub fn new(origin: impl Into<Waypoint>, destination: impl Into<Waypoint>, target: Duration) -> Self {
        Self {
            origin: origin.into(),
            destination: destination.into(),
            mode: TravelMode::Driving,
            departure: None,
            target,
            tolerance: Duration::ZERO,
            poll_interval: None,
            max_wait: None,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn with_mode(mut self, mode: TravelMode) -> Self {
        self.mode = mode;
        self
    }
}
