//! Monitoring engine
//!
//! Front door for callers: turns a [`SessionRequest`] into a validated
//! session, resolving addresses and filling in configured defaults.

use gotime_api::{Location, RouteQuery, SessionRequest, Threshold, Waypoint};
use gotime_config::EngineConfig;
use gotime_provider::{Geocoder, TravelTimeProvider};
use gotime_util::SessionId;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{EventBus, MonitorError, MonitorResult, SessionRegistry};

pub struct MonitorEngine {
    config: EngineConfig,
    registry: SessionRegistry,
    geocoder: Option<Arc<dyn Geocoder>>,
}

impl MonitorEngine {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn TravelTimeProvider>,
        geocoder: Option<Arc<dyn Geocoder>>,
    ) -> Self {
        let events = EventBus::new(config.event_buffer);
        let provider_name = provider.name().to_string();
        let registry = SessionRegistry::new(config.clone(), provider, events);

        info!(
            provider = %provider_name,
            geocoding = geocoder.is_some(),
            max_sessions = config.max_concurrent_sessions,
            "Monitor engine initialized"
        );

        Self {
            config,
            registry,
            geocoder,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        self.registry.events()
    }

    /// Start monitoring the route described by `request`
    pub async fn start_session(&self, request: SessionRequest) -> MonitorResult<SessionId> {
        if self.registry.is_shutting_down() {
            return Err(MonitorError::ShuttingDown);
        }

        let threshold = Threshold::new(request.target, request.tolerance)
            .map_err(|e| MonitorError::InvalidConfig(e.to_string()))?;

        let origin = self.resolve(&request.origin).await?;
        let destination = self.resolve(&request.destination).await?;

        let mut route = RouteQuery::new(origin, destination).with_mode(request.mode);
        if let Some(departure) = request.departure {
            route = route.with_departure(departure);
        }

        let poll_interval = request
            .poll_interval
            .unwrap_or(self.config.default_poll_interval);
        let max_wait = request.max_wait.unwrap_or(self.config.default_max_wait);

        self.registry
            .create(route, threshold, poll_interval, max_wait)
            .await
    }

    async fn resolve(&self, waypoint: &Waypoint) -> MonitorResult<Location> {
        match waypoint {
            Waypoint::Coordinates { location } => Ok(*location),
            Waypoint::Address { address } => {
                let address = address.trim();
                if address.is_empty() {
                    return Err(MonitorError::InvalidConfig("address cannot be empty".into()));
                }

                let geocoder = self.geocoder.as_ref().ok_or_else(|| {
                    MonitorError::InvalidConfig(format!(
                        "cannot resolve '{address}': no geocoder configured"
                    ))
                })?;

                let location = geocoder.geocode(address).await?;
                debug!(address, location = %location, "Address resolved");
                Ok(location)
            }
        }
    }

    /// Cancel all sessions and stop polling
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
