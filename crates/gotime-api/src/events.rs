//! Event types emitted when a session reaches a terminal state

use chrono::{DateTime, Local};
use gotime_util::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{RouteQuery, SessionStatus, Threshold};

/// Kind of terminal session event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ThresholdMet,
    TimedOut,
    Cancelled,
    Failed,
}

impl EventKind {
    /// Event kind for a terminal status, `None` for non-terminal ones
    pub fn from_status(status: SessionStatus) -> Option<Self> {
        match status {
            SessionStatus::ThresholdMet => Some(EventKind::ThresholdMet),
            SessionStatus::TimedOut => Some(EventKind::TimedOut),
            SessionStatus::Cancelled => Some(EventKind::Cancelled),
            SessionStatus::Failed => Some(EventKind::Failed),
            SessionStatus::Pending | SessionStatus::Active => None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self {
            EventKind::ThresholdMet => SessionStatus::ThresholdMet,
            EventKind::TimedOut => SessionStatus::TimedOut,
            EventKind::Cancelled => SessionStatus::Cancelled,
            EventKind::Failed => SessionStatus::Failed,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status().as_str())
    }
}

/// Notification payload consumed by external dispatchers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub kind: EventKind,
    pub route: RouteQuery,
    /// Provider route summary from the last successful poll, if any
    pub route_summary: Option<String>,
    pub threshold: Threshold,
    pub last_observed: Option<Duration>,
    /// Time since the session was created
    pub elapsed: Duration,
    pub timestamp: DateTime<Local>,
    pub message: String,
}
