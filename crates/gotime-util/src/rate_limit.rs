//! Rate limiting utilities

use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::MonotonicInstant;

/// Fractional tokens below this are treated as a whole token (float drift).
const TOKEN_EPSILON: f64 = 1e-9;

/// Returned when no token became available within the caller's bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Rate limited: no token available after {waited:?}")]
pub struct RateLimited {
    pub waited: Duration,
}

/// Shared token-bucket rate limiter
///
/// One bucket gates every caller; the quota it models is account-wide, so
/// there is no per-caller state. Waiting in [`RateLimiter::acquire`] suspends
/// only the calling task.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum tokens (burst size)
    capacity: f64,
    /// Tokens added per second
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: MonotonicInstant,
}

impl Bucket {
    fn refill(&mut self, now: MonotonicInstant, capacity: f64, refill_per_sec: f64) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity);
        self.last_refill = now;
    }
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `capacity` - Maximum burst of requests (at least 1)
    /// * `refill_per_sec` - Tokens restored per second
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = capacity.max(1) as f64;
        let refill_per_sec = if refill_per_sec.is_finite() && refill_per_sec > 0.0 {
            refill_per_sec
        } else {
            f64::MIN_POSITIVE
        };

        Self {
            capacity,
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: MonotonicInstant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    /// Take a token if one is available right now
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(MonotonicInstant::now(), self.capacity, self.refill_per_sec);

        if bucket.tokens >= 1.0 - TOKEN_EPSILON {
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// Wait for a token for at most `timeout`
    pub async fn acquire(&self, timeout: Duration) -> Result<(), RateLimited> {
        let started = MonotonicInstant::now();
        let deadline = started.checked_add(timeout).unwrap_or(started + Duration::from_secs(86_400));

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = MonotonicInstant::now();
                bucket.refill(now, self.capacity, self.refill_per_sec);

                if bucket.tokens >= 1.0 - TOKEN_EPSILON {
                    bucket.tokens = (bucket.tokens - 1.0).max(0.0);
                    return Ok(());
                }

                (1.0 - bucket.tokens) / self.refill_per_sec
            };

            let now = MonotonicInstant::now();
            let remaining = deadline.saturating_duration_until(now);
            if remaining.is_zero() {
                let waited = now.duration_since(started);
                tracing::debug!(waited_ms = waited.as_millis() as u64, "Rate limiter wait exhausted");
                return Err(RateLimited { waited });
            }

            let wait = Duration::try_from_secs_f64(wait).unwrap_or(remaining);
            tokio::time::sleep(wait.min(remaining)).await;
        }
    }

    /// Current token count (after refill)
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(MonotonicInstant::now(), self.capacity, self.refill_per_sec);
        bucket.tokens
    }
}
