//! Session state machine

use chrono::{DateTime, Local};
use gotime_api::{
    EventKind, RouteQuery, SessionEvent, SessionSnapshot, SessionStatus, Threshold,
    TravelEstimate,
};
use gotime_provider::ProviderError;
use gotime_util::{format_duration, wall_after, MonotonicInstant, SessionId};
use std::time::Duration;

/// Fallback horizon when a max wait does not fit in the monotonic clock
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Immutable per-session settings, validated before a session is created
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub route: RouteQuery,
    pub threshold: Threshold,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

/// One monitored route
///
/// Status only moves forward: `Pending -> Active -> terminal`, or straight
/// from `Pending` to `TimedOut`/`Cancelled`. Every mutator is a no-op once
/// the session is terminal.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    status: SessionStatus,

    /// Wall-clock creation time (for display)
    created_at: DateTime<Local>,
    /// Monotonic creation time (for elapsed)
    created_at_mono: MonotonicInstant,

    /// Wall-clock deadline (for display)
    deadline: DateTime<Local>,
    /// Monotonic deadline (for enforcement)
    deadline_mono: MonotonicInstant,

    last_poll_at: Option<DateTime<Local>>,
    last_observed: Option<TravelEstimate>,
    consecutive_errors: u32,
    poll_count: u64,
    last_error: Option<String>,

    /// When the session became terminal (for retention)
    finished_at_mono: Option<MonotonicInstant>,
}

impl Session {
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        now: DateTime<Local>,
        now_mono: MonotonicInstant,
    ) -> Self {
        let deadline = wall_after(now, config.max_wait);
        let deadline_mono = now_mono
            .checked_add(config.max_wait)
            .unwrap_or(now_mono + FAR_FUTURE);

        Self {
            id,
            config,
            status: SessionStatus::Pending,
            created_at: now,
            created_at_mono: now_mono,
            deadline,
            deadline_mono,
            last_poll_at: None,
            last_observed: None,
            consecutive_errors: 0,
            poll_count: 0,
            last_error: None,
            finished_at_mono: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn deadline_mono(&self) -> MonotonicInstant {
        self.deadline_mono
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn last_observed(&self) -> Option<&TravelEstimate> {
        self.last_observed.as_ref()
    }

    pub fn is_expired(&self, now_mono: MonotonicInstant) -> bool {
        now_mono >= self.deadline_mono
    }

    pub fn time_remaining(&self, now_mono: MonotonicInstant) -> Duration {
        self.deadline_mono.saturating_duration_until(now_mono)
    }

    /// Terminal and past the retention window
    pub fn is_evictable(&self, now_mono: MonotonicInstant, retention: Duration) -> bool {
        self.finished_at_mono
            .is_some_and(|finished| now_mono.duration_since(finished) >= retention)
    }

    /// Record that a provider call is about to be made
    ///
    /// Returns false if the session is already terminal, in which case no
    /// call should be made.
    pub fn begin_poll(&mut self, now: DateTime<Local>) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self.status == SessionStatus::Pending {
            self.status = SessionStatus::Active;
        }
        self.last_poll_at = Some(now);
        self.poll_count += 1;
        true
    }

    /// Apply a successful observation; returns the new status if terminal
    pub fn record_success(
        &mut self,
        estimate: TravelEstimate,
        now_mono: MonotonicInstant,
    ) -> Option<SessionStatus> {
        if self.is_terminal() {
            return None;
        }

        self.consecutive_errors = 0;
        self.last_error = None;
        let met = self.config.threshold.is_met(estimate.duration);
        self.last_observed = Some(estimate);

        if met {
            self.finish(SessionStatus::ThresholdMet, now_mono);
            Some(SessionStatus::ThresholdMet)
        } else {
            self.status = SessionStatus::Active;
            None
        }
    }

    /// Apply a provider failure; returns the new status if terminal
    pub fn record_failure(
        &mut self,
        error: &ProviderError,
        max_consecutive_errors: u32,
        now_mono: MonotonicInstant,
    ) -> Option<SessionStatus> {
        if self.is_terminal() {
            return None;
        }

        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.last_error = Some(error.to_string());

        if error.is_fatal() || self.consecutive_errors >= max_consecutive_errors {
            self.finish(SessionStatus::Failed, now_mono);
            Some(SessionStatus::Failed)
        } else {
            self.status = SessionStatus::Active;
            None
        }
    }

    /// Time the session out; false if it was already terminal
    pub fn expire(&mut self, now_mono: MonotonicInstant) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.finish(SessionStatus::TimedOut, now_mono);
        true
    }

    /// Cancel the session; false if it was already terminal
    pub fn cancel(&mut self, now_mono: MonotonicInstant) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.finish(SessionStatus::Cancelled, now_mono);
        true
    }

    fn finish(&mut self, status: SessionStatus, now_mono: MonotonicInstant) {
        self.status = status;
        self.finished_at_mono = Some(now_mono);
    }

    pub fn snapshot(&self, now_mono: MonotonicInstant) -> SessionSnapshot {
        let time_remaining = if self.is_terminal() {
            Duration::ZERO
        } else {
            self.time_remaining(now_mono)
        };

        SessionSnapshot {
            session_id: self.id.clone(),
            route: self.config.route.clone(),
            threshold: self.config.threshold,
            poll_interval: self.config.poll_interval,
            max_wait: self.config.max_wait,
            status: self.status,
            created_at: self.created_at,
            deadline: self.deadline,
            time_remaining,
            last_poll_at: self.last_poll_at,
            last_observed: self.last_observed.clone(),
            consecutive_errors: self.consecutive_errors,
            poll_count: self.poll_count,
            last_error: self.last_error.clone(),
        }
    }

    /// Build the terminal event; `None` while the session is still running
    pub fn to_event(&self, now: DateTime<Local>, now_mono: MonotonicInstant) -> Option<SessionEvent> {
        let kind = EventKind::from_status(self.status)?;
        let last_observed = self.last_observed.as_ref().map(|e| e.duration);

        Some(SessionEvent {
            session_id: self.id.clone(),
            kind,
            route: self.config.route.clone(),
            route_summary: self
                .last_observed
                .as_ref()
                .map(|e| e.summary.clone())
                .filter(|s| !s.is_empty()),
            threshold: self.config.threshold,
            last_observed,
            elapsed: now_mono.duration_since(self.created_at_mono),
            timestamp: now,
            message: self.message(kind, last_observed),
        })
    }

    fn message(&self, kind: EventKind, last_observed: Option<Duration>) -> String {
        let target = format_duration(self.config.threshold.target());
        match kind {
            EventKind::ThresholdMet => format!(
                "Target reached! Current travel time: {} (target: {})",
                format_duration(last_observed.unwrap_or_default()),
                target
            ),
            EventKind::TimedOut => match last_observed {
                Some(observed) => format!(
                    "Session timed out after {} (last travel time: {}, target: {})",
                    format_duration(self.config.max_wait),
                    format_duration(observed),
                    target
                ),
                None => format!(
                    "Session timed out after {}",
                    format_duration(self.config.max_wait)
                ),
            },
            EventKind::Cancelled => "Monitoring cancelled".to_string(),
            EventKind::Failed => format!(
                "Monitoring failed: {}",
                self.last_error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
