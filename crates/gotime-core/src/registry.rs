//! Session registry
//!
//! Owns every session and the scheduler that polls them. There is no global
//! instance: the daemon constructs exactly one and tears it down explicitly.

use gotime_api::{RouteQuery, SessionSnapshot, Threshold};
use gotime_config::EngineConfig;
use gotime_provider::TravelTimeProvider;
use gotime_util::{format_duration, MonotonicInstant, RateLimiter, SessionId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::scheduler::{publish_terminal, SharedSession};
use crate::{EventBus, MonitorError, MonitorResult, PollScheduler, Session, SessionConfig};

struct TableEntry {
    seq: u64,
    session: SharedSession,
}

/// Sessions keyed by id, remembering creation order
#[derive(Default)]
pub(crate) struct SessionTable {
    entries: HashMap<SessionId, TableEntry>,
    next_seq: u64,
}

impl SessionTable {
    fn insert(&mut self, session: Session) -> SharedSession {
        let id = session.id().clone();
        let shared = Arc::new(Mutex::new(session));
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(id, TableEntry { seq, session: shared.clone() });
        shared
    }

    fn get(&self, id: &SessionId) -> Option<SharedSession> {
        self.entries.get(id).map(|e| e.session.clone())
    }

    /// All sessions in creation order
    pub(crate) fn sessions(&self) -> Vec<SharedSession> {
        let mut entries: Vec<&TableEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.session.clone()).collect()
    }

    async fn running_count(&self) -> usize {
        let mut count = 0;
        for entry in self.entries.values() {
            if !entry.session.lock().await.is_terminal() {
                count += 1;
            }
        }
        count
    }

    /// Drop terminal sessions older than `retention`; returns how many
    pub(crate) async fn evict_finished(
        &mut self,
        now_mono: MonotonicInstant,
        retention: Duration,
    ) -> usize {
        let mut evictable = Vec::new();
        for (id, entry) in &self.entries {
            if entry.session.lock().await.is_evictable(now_mono, retention) {
                evictable.push(id.clone());
            }
        }

        for id in &evictable {
            self.entries.remove(id);
            debug!(session_id = %id, "Evicted finished session");
        }
        evictable.len()
    }
}

/// Creates, stops and reports on monitoring sessions
pub struct SessionRegistry {
    config: EngineConfig,
    table: Arc<RwLock<SessionTable>>,
    scheduler: PollScheduler,
    events: EventBus,
    shutting_down: AtomicBool,
}

impl SessionRegistry {
    /// Create an empty registry and start its sweep
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn TravelTimeProvider>,
        events: EventBus,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.capacity,
            config.rate_limit.refill_per_second,
        ));
        Self::with_rate_limiter(config, provider, limiter, events)
    }

    /// Like [`SessionRegistry::new`], sharing an existing rate limiter
    pub fn with_rate_limiter(
        config: EngineConfig,
        provider: Arc<dyn TravelTimeProvider>,
        limiter: Arc<RateLimiter>,
        events: EventBus,
    ) -> Self {
        let table = Arc::new(RwLock::new(SessionTable::default()));
        let scheduler = PollScheduler::new(config.clone(), provider, limiter, events.clone());
        scheduler.start_sweep(table.clone());

        Self {
            config,
            table,
            scheduler,
            events,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Register a new session and start polling it
    pub async fn create(
        &self,
        route: RouteQuery,
        threshold: Threshold,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> MonitorResult<SessionId> {
        if self.is_shutting_down() {
            return Err(MonitorError::ShuttingDown);
        }
        self.validate(poll_interval, max_wait)?;

        let mut table = self.table.write().await;
        // Re-checked under the table lock so shutdown sees every session
        if self.is_shutting_down() {
            return Err(MonitorError::ShuttingDown);
        }

        let limit = self.config.max_concurrent_sessions;
        if table.running_count().await >= limit {
            warn!(limit, "Session limit reached, rejecting new session");
            return Err(MonitorError::SessionLimitReached { limit });
        }

        let id = SessionId::new();
        let summary = route.summary();
        let config = SessionConfig {
            route,
            threshold,
            poll_interval,
            max_wait,
        };
        let session = Session::new(id.clone(), config, gotime_util::now(), MonotonicInstant::now());
        let deadline = session.deadline_mono();
        let shared = table.insert(session);
        self.scheduler.attach(id.clone(), shared, poll_interval, deadline);
        drop(table);

        info!(
            session_id = %id,
            route = %summary,
            target = %format_duration(threshold.target()),
            tolerance = %format_duration(threshold.tolerance()),
            poll_interval = %format_duration(poll_interval),
            max_wait = %format_duration(max_wait),
            "Session created"
        );

        Ok(id)
    }

    fn validate(&self, poll_interval: Duration, max_wait: Duration) -> MonitorResult<()> {
        let min = self.config.min_poll_interval;
        if poll_interval.is_zero() || poll_interval < min {
            return Err(MonitorError::InvalidConfig(format!(
                "poll interval {} is below the minimum of {}",
                format_duration(poll_interval),
                format_duration(min)
            )));
        }
        if max_wait.is_zero() {
            return Err(MonitorError::InvalidConfig(
                "max wait must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Cancel a running session
    pub async fn stop(&self, id: &SessionId) -> MonitorResult<()> {
        let session = self.lookup(id).await?;

        {
            let mut s = session.lock().await;
            let now_mono = MonotonicInstant::now();
            if !s.cancel(now_mono) {
                return Err(MonitorError::AlreadyTerminal {
                    id: id.clone(),
                    status: s.status(),
                });
            }
            publish_terminal(&self.events, &s, now_mono);
        }

        self.scheduler.detach(id);
        info!(session_id = %id, "Session stopped");
        Ok(())
    }

    pub async fn get(&self, id: &SessionId) -> MonitorResult<SessionSnapshot> {
        let session = self.lookup(id).await?;
        let snapshot = session.lock().await.snapshot(MonotonicInstant::now());
        Ok(snapshot)
    }

    /// Snapshots of every retained session, oldest first
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let now_mono = MonotonicInstant::now();
        let sessions = {
            let mut table = self.table.write().await;
            table
                .evict_finished(now_mono, self.config.terminal_retention)
                .await;
            table.sessions()
        };

        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            snapshots.push(session.lock().await.snapshot(now_mono));
        }
        snapshots
    }

    /// Number of sessions that have not finished
    pub async fn running_count(&self) -> usize {
        self.table.read().await.running_count().await
    }

    /// Run one timeout/eviction pass now instead of waiting for the sweep
    pub async fn sweep(&self) {
        self.scheduler.sweep_now(&self.table).await;
    }

    /// Cancel every running session and drain all poll tasks
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Session registry already shut down");
            return;
        }

        let sessions = self.table.read().await.sessions();
        let mut cancelled = 0;
        for session in sessions {
            let mut s = session.lock().await;
            let now_mono = MonotonicInstant::now();
            if s.cancel(now_mono) {
                publish_terminal(&self.events, &s, now_mono);
                cancelled += 1;
            }
        }

        self.scheduler.shutdown().await;
        info!(cancelled, "Session registry shut down");
    }

    async fn lookup(&self, id: &SessionId) -> MonitorResult<SharedSession> {
        self.table
            .read()
            .await
            .get(id)
            .ok_or_else(|| MonitorError::NotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gotime_api::{EventKind, Location, SessionStatus};
    use gotime_provider::{MockProvider, ProviderError};
    use tokio::sync::broadcast;

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    fn route() -> RouteQuery {
        RouteQuery::new(
            Location::new(37.7749, -122.4194).unwrap(),
            Location::new(37.8044, -122.2712).unwrap(),
        )
    }

    fn threshold() -> Threshold {
        Threshold::new(minutes(20), minutes(2)).unwrap()
    }

    fn make_registry(provider: Arc<MockProvider>, config: EngineConfig) -> SessionRegistry {
        SessionRegistry::new(config, provider, EventBus::new(64))
    }

    async fn next_event(rx: &mut broadcast::Receiver<gotime_api::SessionEvent>) -> gotime_api::SessionEvent {
        tokio::time::timeout(Duration::from_secs(24 * 60 * 60), rx.recv())
            .await
            .expect("no event published")
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_met_after_slow_polls() {
        let provider = Arc::new(MockProvider::returning(minutes(21)));
        provider.push_duration(minutes(25));
        provider.push_duration(minutes(25));
        let registry = make_registry(provider.clone(), EngineConfig::default());
        let mut rx = registry.events().subscribe();

        let id = registry.create(route(), threshold(), minutes(1), minutes(30)).await.unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event.session_id, id);
        assert_eq!(event.kind, EventKind::ThresholdMet);
        assert_eq!(event.last_observed, Some(minutes(21)));
        assert_eq!(provider.call_count(), 3);

        let snapshot = registry.get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::ThresholdMet);
        assert_eq!(snapshot.poll_count, 3);
        assert!(!registry.scheduler().is_attached(&id));

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_single_event() {
        let provider = Arc::new(MockProvider::returning(minutes(40)));
        let registry = make_registry(provider, EngineConfig::default());
        let mut rx = registry.events().subscribe();
        let start = tokio::time::Instant::now();

        let id = registry.create(route(), threshold(), minutes(1), minutes(10)).await.unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event.kind, EventKind::TimedOut);
        let elapsed = start.elapsed();
        assert!(elapsed >= minutes(10) && elapsed < minutes(11), "timed out at {elapsed:?}");

        tokio::time::sleep(minutes(3)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.get(&id).await.unwrap().status, SessionStatus::TimedOut);

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_errors_fail_session() {
        let provider = Arc::new(MockProvider::failing(ProviderError::NetworkError("down".into())));
        let registry = make_registry(provider.clone(), EngineConfig::default());
        let mut rx = registry.events().subscribe();

        let id = registry.create(route(), threshold(), minutes(1), minutes(60)).await.unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event.kind, EventKind::Failed);
        assert_eq!(provider.call_count(), 5);

        let snapshot = registry.get(&id).await.unwrap();
        assert_eq!(snapshot.consecutive_errors, 5);
        assert!(snapshot.last_error.unwrap().contains("down"));

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_fails_immediately() {
        let provider = Arc::new(MockProvider::failing(ProviderError::AuthFailure("bad key".into())));
        let registry = make_registry(provider.clone(), EngineConfig::default());
        let mut rx = registry.events().subscribe();

        registry.create(route(), threshold(), minutes(1), minutes(60)).await.unwrap();

        assert_eq!(next_event(&mut rx).await.kind, EventKind::Failed);
        assert_eq!(provider.call_count(), 1);

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_result() {
        let provider = Arc::new(MockProvider::returning(minutes(5)));
        provider.set_delay(Some(Duration::from_secs(5)));
        let registry = make_registry(provider.clone(), EngineConfig::default());
        let mut rx = registry.events().subscribe();

        let id = registry.create(route(), threshold(), minutes(1), minutes(60)).await.unwrap();

        // Let the first tick start its provider call
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(provider.call_count(), 1);
        assert_eq!(registry.get(&id).await.unwrap().status, SessionStatus::Active);

        registry.stop(&id).await.unwrap();
        assert_eq!(next_event(&mut rx).await.kind, EventKind::Cancelled);

        tokio::time::sleep(minutes(2)).await;
        let snapshot = registry.get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Cancelled);
        assert!(snapshot.last_observed.is_none());
        assert!(rx.try_recv().is_err());

        assert!(matches!(
            registry.stop(&id).await,
            Err(MonitorError::AlreadyTerminal { status: SessionStatus::Cancelled, .. })
        ));
        assert!(!registry.scheduler().detach(&id));

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_pending_session() {
        let provider = Arc::new(MockProvider::default());
        let config = EngineConfig {
            initial_poll_delay: minutes(5),
            ..EngineConfig::default()
        };
        let registry = make_registry(provider.clone(), config);

        let id = registry.create(route(), threshold(), minutes(1), minutes(60)).await.unwrap();
        assert_eq!(registry.get(&id).await.unwrap().status, SessionStatus::Pending);

        registry.stop(&id).await.unwrap();
        tokio::time::sleep(minutes(10)).await;

        assert_eq!(registry.get(&id).await.unwrap().status, SessionStatus::Cancelled);
        assert_eq!(provider.call_count(), 0);

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_validation() {
        let registry = make_registry(Arc::new(MockProvider::default()), EngineConfig::default());

        assert!(matches!(
            registry.create(route(), threshold(), Duration::from_secs(10), minutes(10)).await,
            Err(MonitorError::InvalidConfig(_))
        ));
        assert!(matches!(
            registry.create(route(), threshold(), minutes(1), Duration::ZERO).await,
            Err(MonitorError::InvalidConfig(_))
        ));
        assert!(registry.list().await.is_empty());

        let unknown = SessionId::new();
        assert!(matches!(registry.get(&unknown).await, Err(MonitorError::NotFound(_))));
        assert!(matches!(registry.stop(&unknown).await, Err(MonitorError::NotFound(_))));

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_limit() {
        let config = EngineConfig {
            max_concurrent_sessions: 2,
            ..EngineConfig::default()
        };
        let registry = make_registry(Arc::new(MockProvider::returning(minutes(60))), config);

        let first = registry.create(route(), threshold(), minutes(1), minutes(60)).await.unwrap();
        registry.create(route(), threshold(), minutes(1), minutes(60)).await.unwrap();
        assert!(matches!(
            registry.create(route(), threshold(), minutes(1), minutes(60)).await,
            Err(MonitorError::SessionLimitReached { limit: 2 })
        ));

        // Finished sessions no longer count
        registry.stop(&first).await.unwrap();
        assert!(registry.create(route(), threshold(), minutes(1), minutes(60)).await.is_ok());

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_order_and_eviction() {
        let config = EngineConfig {
            initial_poll_delay: minutes(60),
            ..EngineConfig::default()
        };
        let registry = make_registry(Arc::new(MockProvider::default()), config);

        let a = registry.create(route(), threshold(), minutes(1), minutes(120)).await.unwrap();
        let b = registry.create(route(), threshold(), minutes(1), minutes(120)).await.unwrap();
        let c = registry.create(route(), threshold(), minutes(1), minutes(120)).await.unwrap();

        let ids: Vec<SessionId> = registry.list().await.into_iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec![a.clone(), b.clone(), c.clone()]);

        registry.stop(&b).await.unwrap();
        tokio::time::sleep(minutes(4)).await;
        assert_eq!(registry.list().await.len(), 3);

        tokio::time::sleep(minutes(1)).await;
        let ids: Vec<SessionId> = registry.list().await.into_iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec![a, c]);
        assert!(matches!(registry.get(&b).await, Err(MonitorError::NotFound(_))));

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_tick_is_skipped() {
        let provider = Arc::new(MockProvider::returning(minutes(60)));
        let limiter = Arc::new(RateLimiter::new(1, 0.001));
        assert!(limiter.try_acquire().await);

        let config = EngineConfig {
            rate_limit_wait_cap: Duration::from_secs(1),
            ..EngineConfig::default()
        };
        let registry =
            SessionRegistry::with_rate_limiter(config, provider.clone(), limiter, EventBus::new(16));

        let id = registry.create(route(), threshold(), minutes(1), minutes(60)).await.unwrap();
        tokio::time::sleep(minutes(3)).await;

        let snapshot = registry.get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Pending);
        assert_eq!(snapshot.poll_count, 0);
        assert_eq!(snapshot.consecutive_errors, 0);
        assert_eq!(provider.call_count(), 0);

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_wait_does_not_hold_worker() {
        let provider = Arc::new(MockProvider::returning(minutes(60)));
        let limiter = Arc::new(RateLimiter::new(1, 0.01));
        assert!(limiter.try_acquire().await);

        let config = EngineConfig {
            worker_pool_size: 1,
            ..EngineConfig::default()
        };
        let registry =
            SessionRegistry::with_rate_limiter(config, provider.clone(), limiter, EventBus::new(16));

        registry.create(route(), threshold(), minutes(1), minutes(60)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(provider.call_count(), 0);
        assert_eq!(registry.scheduler().idle_workers(), 1);

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_result_after_deadline_times_out() {
        let provider = Arc::new(MockProvider::returning(minutes(10)));
        provider.push_duration(minutes(30));
        let registry = make_registry(provider.clone(), EngineConfig::default());
        let mut rx = registry.events().subscribe();
        let start = tokio::time::Instant::now();

        let id = registry
            .create(route(), threshold(), minutes(1), Duration::from_secs(65))
            .await
            .unwrap();

        // Second poll starts at 60s and would answer 10m at 68s
        tokio::time::sleep(Duration::from_secs(30)).await;
        provider.set_delay(Some(Duration::from_secs(8)));

        let event = next_event(&mut rx).await;
        assert_eq!(event.session_id, id);
        assert_eq!(event.kind, EventKind::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(65));
        assert_eq!(event.last_observed, Some(minutes(30)));
        assert_eq!(provider.call_count(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.get(&id).await.unwrap().status, SessionStatus::TimedOut);

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_poll_after_deadline_while_rate_limited() {
        let provider = Arc::new(MockProvider::returning(minutes(30)));
        let limiter = Arc::new(RateLimiter::new(1, 0.1));
        let registry = SessionRegistry::with_rate_limiter(
            EngineConfig::default(),
            provider.clone(),
            limiter.clone(),
            EventBus::new(16),
        );
        let mut rx = registry.events().subscribe();
        let start = tokio::time::Instant::now();

        let id = registry
            .create(route(), threshold(), minutes(1), Duration::from_secs(65))
            .await
            .unwrap();

        // Drain the bucket just before the second poll; next token at 69s
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(provider.call_count(), 1);
        assert!(limiter.try_acquire().await);
        provider.set_fallback(Ok(gotime_provider::mock_estimate(minutes(10))));

        let event = next_event(&mut rx).await;
        assert_eq!(event.session_id, id);
        assert_eq!(event.kind, EventKind::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(65));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(provider.call_count(), 1);
        assert_eq!(registry.get(&id).await.unwrap().poll_count, 1);

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_timeout_counts_as_error() {
        let provider = Arc::new(MockProvider::returning(minutes(5)));
        provider.set_delay(Some(Duration::from_secs(30)));
        let registry = make_registry(provider, EngineConfig::default());

        let id = registry.create(route(), threshold(), minutes(1), minutes(60)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;

        let snapshot = registry.get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Active);
        assert_eq!(snapshot.consecutive_errors, 1);
        assert!(snapshot.last_error.unwrap().contains("timed out"));

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_everything() {
        let provider = Arc::new(MockProvider::returning(minutes(60)));
        let registry = make_registry(provider, EngineConfig::default());
        let mut rx = registry.events().subscribe();

        let a = registry.create(route(), threshold(), minutes(1), minutes(60)).await.unwrap();
        let b = registry.create(route(), threshold(), minutes(1), minutes(60)).await.unwrap();

        registry.shutdown().await;
        registry.shutdown().await;

        let mut cancelled = vec![next_event(&mut rx).await.session_id, next_event(&mut rx).await.session_id];
        cancelled.sort_by_key(|id| id.to_string());
        let mut expected = vec![a, b];
        expected.sort_by_key(|id| id.to_string());
        assert_eq!(cancelled, expected);

        assert_eq!(registry.scheduler().attached_count(), 0);
        assert_eq!(registry.running_count().await, 0);
        assert!(matches!(
            registry.create(route(), threshold(), minutes(1), minutes(60)).await,
            Err(MonitorError::ShuttingDown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_enforced_before_first_poll() {
        let config = EngineConfig {
            initial_poll_delay: minutes(60),
            ..EngineConfig::default()
        };
        let registry = make_registry(Arc::new(MockProvider::default()), config);

        let id = registry.create(route(), threshold(), minutes(1), minutes(2)).await.unwrap();
        tokio::time::advance(minutes(2)).await;
        registry.sweep().await;

        let snapshot = registry.get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::TimedOut);
        assert_eq!(snapshot.poll_count, 0);
        assert!(!registry.scheduler().is_attached(&id));

        registry.shutdown().await;
    }
}
