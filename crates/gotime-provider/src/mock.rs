//! Mock provider for testing

use async_trait::async_trait;
use gotime_api::{Location, RouteQuery, TravelEstimate};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::{Geocoder, ProviderError, ProviderResult, TravelTimeProvider};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Estimate with a fixed distance and summary, for scripting
pub fn mock_estimate(duration: Duration) -> TravelEstimate {
    TravelEstimate {
        duration,
        distance_meters: 10_000,
        summary: "mock route".into(),
    }
}

/// Scripted travel-time provider
///
/// Queued results are returned in order; once the queue is empty every call
/// returns the fallback.
pub struct MockProvider {
    script: Mutex<VecDeque<ProviderResult<TravelEstimate>>>,
    fallback: Mutex<ProviderResult<TravelEstimate>>,
    /// Simulated network latency
    delay: Mutex<Option<Duration>>,
    calls: AtomicU64,
}

impl MockProvider {
    pub fn new(fallback: ProviderResult<TravelEstimate>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            delay: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }

    /// Provider that always answers with `duration`
    pub fn returning(duration: Duration) -> Self {
        Self::new(Ok(mock_estimate(duration)))
    }

    /// Provider that always fails with `error`
    pub fn failing(error: ProviderError) -> Self {
        Self::new(Err(error))
    }

    pub fn push(&self, result: ProviderResult<TravelEstimate>) {
        lock(&self.script).push_back(result);
    }

    pub fn push_duration(&self, duration: Duration) {
        self.push(Ok(mock_estimate(duration)));
    }

    pub fn push_error(&self, error: ProviderError) {
        self.push(Err(error));
    }

    pub fn set_fallback(&self, result: ProviderResult<TravelEstimate>) {
        *lock(&self.fallback) = result;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    /// Number of queries received so far
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::returning(Duration::from_secs(30 * 60))
    }
}

#[async_trait]
impl TravelTimeProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn query(&self, _route: &RouteQuery) -> ProviderResult<TravelEstimate> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.script).pop_front();
        match scripted {
            Some(result) => result,
            None => lock(&self.fallback).clone(),
        }
    }
}

/// Geocoder backed by a fixed address table
#[derive(Default)]
pub struct MockGeocoder {
    known: Mutex<HashMap<String, Location>>,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(self, address: impl Into<String>, location: Location) -> Self {
        lock(&self.known).insert(address.into(), location);
        self
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn geocode(&self, address: &str) -> ProviderResult<Location> {
        lock(&self.known)
            .get(address)
            .copied()
            .ok_or_else(|| ProviderError::InvalidAddress(address.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> RouteQuery {
        RouteQuery::new(
            Location::new(0.0, 0.0).unwrap(),
            Location::new(1.0, 1.0).unwrap(),
        )
    }

    #[tokio::test]
    async fn scripted_results_then_fallback() {
        let provider = MockProvider::returning(Duration::from_secs(600));
        provider.push_error(ProviderError::NetworkError("reset".into()));
        provider.push_duration(Duration::from_secs(60));

        assert!(matches!(
            provider.query(&route()).await,
            Err(ProviderError::NetworkError(_))
        ));
        assert_eq!(
            provider.query(&route()).await.unwrap().duration,
            Duration::from_secs(60)
        );
        assert_eq!(
            provider.query(&route()).await.unwrap().duration,
            Duration::from_secs(600)
        );
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_applied() {
        let provider = MockProvider::default();
        provider.set_delay(Some(Duration::from_secs(5)));

        let start = tokio::time::Instant::now();
        provider.query(&route()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn geocoder_lookup() {
        let home = Location::new(51.5, -0.12).unwrap();
        let geocoder = MockGeocoder::new().with_address("home", home);

        assert_eq!(geocoder.geocode("home").await.unwrap(), home);
        assert!(matches!(
            geocoder.geocode("atlantis").await,
            Err(ProviderError::InvalidAddress(_))
        ));
    }
}
