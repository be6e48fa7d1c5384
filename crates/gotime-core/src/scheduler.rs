//! Poll scheduler
//!
//! Each non-terminal session gets its own task that ticks at the session's
//! poll interval. Provider work is bounded by a shared worker pool and the
//! shared rate limiter. A lower-frequency sweep times out sessions whose
//! task is stuck waiting and evicts finished sessions after retention.

use gotime_config::EngineConfig;
use gotime_provider::{ProviderError, TravelTimeProvider};
use gotime_util::{MonotonicInstant, RateLimiter, SessionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::registry::SessionTable;
use crate::{EventBus, Session};

pub(crate) type SharedSession = Arc<Mutex<Session>>;

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    /// Keep ticking
    Continue,
    /// Session is terminal; the task should exit
    Finished,
}

struct PollTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: EngineConfig,
    provider: Arc<dyn TravelTimeProvider>,
    limiter: Arc<RateLimiter>,
    workers: Arc<Semaphore>,
    events: EventBus,
    tasks: StdMutex<HashMap<SessionId, PollTask>>,
    sweep: StdMutex<Option<PollTask>>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Publish the terminal event for a session that just finished
///
/// Must be called with the session lock held so each session produces
/// exactly one event.
pub(crate) fn publish_terminal(events: &EventBus, session: &Session, now_mono: MonotonicInstant) {
    let Some(event) = session.to_event(gotime_util::now(), now_mono) else {
        return;
    };

    info!(
        session_id = %session.id(),
        status = ?session.status(),
        elapsed_secs = event.elapsed.as_secs(),
        "Session finished"
    );
    events.publish(event);
}

/// Drives polling for every attached session
pub struct PollScheduler {
    inner: Arc<Inner>,
}

impl PollScheduler {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn TravelTimeProvider>,
        limiter: Arc<RateLimiter>,
        events: EventBus,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));

        debug!(
            provider = provider.name(),
            workers = config.worker_pool_size,
            capacity = limiter.capacity(),
            refill_per_sec = limiter.refill_per_sec(),
            "Poll scheduler initialized"
        );

        Self {
            inner: Arc::new(Inner {
                config,
                provider,
                limiter,
                workers,
                events,
                tasks: StdMutex::new(HashMap::new()),
                sweep: StdMutex::new(None),
            }),
        }
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.limiter
    }

    /// Start the poll task for a session
    ///
    /// The first tick fires after the configured initial delay.
    pub(crate) fn attach(
        &self,
        id: SessionId,
        session: SharedSession,
        poll_interval: Duration,
        deadline: MonotonicInstant,
    ) {
        let (stop, stop_rx) = watch::channel(false);

        // Insert under the lock so a task that finishes immediately cannot
        // remove itself before it is registered.
        let mut tasks = lock(&self.inner.tasks);
        if let Some(previous) = tasks.remove(&id) {
            warn!(session_id = %id, "Session already attached, replacing poll task");
            let _ = previous.stop.send(true);
        }

        let inner = self.inner.clone();
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            run_session(inner, task_id, session, poll_interval, deadline, stop_rx).await;
        });

        tasks.insert(id.clone(), PollTask { stop, handle });
        debug!(session_id = %id, poll_interval_secs = poll_interval.as_secs(), "Poll task attached");
    }

    /// Stop the poll task for a session. Safe to call more than once.
    pub fn detach(&self, id: &SessionId) -> bool {
        self.inner.detach(id)
    }

    pub fn is_attached(&self, id: &SessionId) -> bool {
        lock(&self.inner.tasks).contains_key(id)
    }

    pub fn attached_count(&self) -> usize {
        lock(&self.inner.tasks).len()
    }

    /// Worker slots not currently making a provider call
    pub fn idle_workers(&self) -> usize {
        self.inner.workers.available_permits()
    }

    /// Start the periodic timeout/eviction sweep over `table`
    pub(crate) fn start_sweep(&self, table: Arc<RwLock<SessionTable>>) {
        let (stop, mut stop_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let period = self.inner.config.sweep_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => inner.sweep(&table).await,
                }
            }
            debug!("Sweep task exited");
        });

        if let Some(previous) = lock(&self.inner.sweep).replace(PollTask { stop, handle }) {
            let _ = previous.stop.send(true);
        }
    }

    /// Run one sweep pass immediately
    pub(crate) async fn sweep_now(&self, table: &RwLock<SessionTable>) {
        self.inner.sweep(table).await;
    }

    /// Signal every poll task and the sweep, then wait for them to exit
    pub async fn shutdown(&self) {
        let mut handles = Vec::new();

        if let Some(sweep) = lock(&self.inner.sweep).take() {
            let _ = sweep.stop.send(true);
            handles.push(sweep.handle);
        }

        let tasks: Vec<PollTask> = lock(&self.inner.tasks).drain().map(|(_, t)| t).collect();
        let count = tasks.len();
        for task in tasks {
            let _ = task.stop.send(true);
            handles.push(task.handle);
        }

        for handle in handles {
            if let Err(e) = handle.await
                && e.is_panic()
            {
                warn!(error = %e, "Poll task panicked");
            }
        }

        debug!(tasks = count, "Poll scheduler drained");
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        if let Some(sweep) = lock(&self.inner.sweep).take() {
            let _ = sweep.stop.send(true);
        }
        for (_, task) in lock(&self.inner.tasks).drain() {
            let _ = task.stop.send(true);
        }
    }
}

impl Inner {
    fn detach(&self, id: &SessionId) -> bool {
        match lock(&self.tasks).remove(id) {
            Some(task) => {
                let _ = task.stop.send(true);
                debug!(session_id = %id, "Poll task detached");
                true
            }
            None => false,
        }
    }

    /// Time the session out if its deadline has passed
    ///
    /// Returns true if the session is terminal afterwards.
    fn expire_if_due(&self, s: &mut Session) -> bool {
        if s.is_terminal() {
            return true;
        }
        let now_mono = MonotonicInstant::now();
        if !s.is_expired(now_mono) {
            return false;
        }
        if s.expire(now_mono) {
            publish_terminal(&self.events, s, now_mono);
        }
        true
    }

    async fn tick(&self, session: &SharedSession) -> TickOutcome {
        // 1. Timeout check
        let (id, route, poll_interval, remaining) = {
            let mut s = session.lock().await;
            if self.expire_if_due(&mut s) {
                return TickOutcome::Finished;
            }
            (
                s.id().clone(),
                s.config().route.clone(),
                s.config().poll_interval,
                s.time_remaining(MonotonicInstant::now()),
            )
        };

        // 2. Rate-limit token, then a worker permit. Waiting for a token
        // does not hold a worker.
        let wait = poll_interval.min(self.config.rate_limit_wait_cap).min(remaining);
        if let Err(e) = self.limiter.acquire(wait).await {
            debug!(session_id = %id, waited_ms = e.waited.as_millis() as u64, "Rate limited, skipping tick");
            return TickOutcome::Continue;
        }

        let Ok(_permit) = self.workers.clone().acquire_owned().await else {
            return TickOutcome::Finished;
        };

        {
            let mut s = session.lock().await;
            if self.expire_if_due(&mut s) || !s.begin_poll(gotime_util::now()) {
                return TickOutcome::Finished;
            }
        }

        // 3. Provider call
        debug!(session_id = %id, provider = self.provider.name(), "Polling provider");
        let result = match timeout(self.config.provider_timeout, self.provider.query(&route)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::NetworkError(format!(
                "provider call timed out after {}s",
                self.config.provider_timeout.as_secs()
            ))),
        };

        // 4. Apply the result, unless the session finished or ran out of time meanwhile
        let mut s = session.lock().await;
        if s.is_terminal() {
            debug!(session_id = %id, status = ?s.status(), "Discarding result for finished session");
            return TickOutcome::Finished;
        }
        if self.expire_if_due(&mut s) {
            debug!(session_id = %id, "Discarding result that arrived after the deadline");
            return TickOutcome::Finished;
        }

        let now_mono = MonotonicInstant::now();
        let finished = match result {
            Ok(estimate) => {
                debug!(
                    session_id = %id,
                    duration_secs = estimate.duration.as_secs(),
                    "Travel time observed"
                );
                s.record_success(estimate, now_mono)
            }
            Err(e) => {
                warn!(
                    session_id = %id,
                    error = %e,
                    kind = e.kind(),
                    consecutive_errors = s.consecutive_errors() + 1,
                    "Provider call failed"
                );
                s.record_failure(&e, self.config.max_consecutive_errors, now_mono)
            }
        };

        if finished.is_some() {
            publish_terminal(&self.events, &s, now_mono);
            TickOutcome::Finished
        } else {
            TickOutcome::Continue
        }
    }

    async fn sweep(&self, table: &RwLock<SessionTable>) {
        let now_mono = MonotonicInstant::now();
        let sessions = table.read().await.sessions();

        let mut expired = Vec::new();
        for session in sessions {
            let mut s = session.lock().await;
            if s.is_expired(now_mono) && s.expire(now_mono) {
                publish_terminal(&self.events, &s, now_mono);
                expired.push(s.id().clone());
            }
        }
        for id in &expired {
            self.detach(id);
        }

        let evicted = table
            .write()
            .await
            .evict_finished(now_mono, self.config.terminal_retention)
            .await;

        if !expired.is_empty() || evicted > 0 {
            debug!(expired = expired.len(), evicted, "Sweep completed");
        }
    }
}

async fn run_session(
    inner: Arc<Inner>,
    id: SessionId,
    session: SharedSession,
    poll_interval: Duration,
    deadline: MonotonicInstant,
    mut stop: watch::Receiver<bool>,
) {
    let start = Instant::now() + inner.config.initial_poll_delay;
    let mut ticker = interval_at(start, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = deadline.as_tokio();

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
            _ = sleep_until(deadline) => {}
        }

        // Dropping the tick future abandons any in-flight provider call
        // or rate-limit wait
        let outcome = tokio::select! {
            _ = stop.changed() => break,
            _ = sleep_until(deadline) => {
                inner.expire_if_due(&mut *session.lock().await);
                TickOutcome::Finished
            }
            outcome = inner.tick(&session) => outcome,
        };

        if outcome == TickOutcome::Finished {
            break;
        }
    }

    lock(&inner.tasks).remove(&id);
    debug!(session_id = %id, "Poll task exited");
}
