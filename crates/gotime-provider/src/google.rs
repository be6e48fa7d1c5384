//! Google Maps adapter
//!
//! Talks to the Directions and Geocoding JSON APIs. Response bodies are
//! parsed separately from the transport so they can be tested from fixtures.

use async_trait::async_trait;
use gotime_api::{Location, RouteQuery, TravelEstimate, TravelMode};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Geocoder, ProviderError, ProviderResult, TravelTimeProvider};

pub const DEFAULT_GOOGLE_BASE_URL: &str = "https://maps.googleapis.com/maps/api";

/// Travel-time provider and geocoder backed by Google Maps
pub struct GoogleMapsProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GoogleMapsProvider {
    pub fn new(api_key: impl Into<String>) -> ProviderResult<Self> {
        Self::with_options(api_key, DEFAULT_GOOGLE_BASE_URL, Duration::from_secs(10))
    }

    pub fn with_options(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProviderError::NetworkError(format!("HTTP client setup: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> ProviderResult<Vec<u8>> {
        let url = format!("{}/{}/json", self.base_url, endpoint);

        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if let Some(err) = map_http_status(status) {
            warn!(endpoint, status = %status, "Maps API returned error status");
            return Err(err);
        }

        let body = response
            .bytes()
            .await
            .map_err(transport_error)?;
        Ok(body.to_vec())
    }
}

/// Request URLs carry the API key, so they never reach the error text
fn transport_error(e: reqwest::Error) -> ProviderError {
    ProviderError::NetworkError(e.without_url().to_string())
}

fn map_http_status(status: StatusCode) -> Option<ProviderError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::AuthFailure(format!("HTTP {status}"))
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::QuotaExceeded(format!("HTTP {status}")),
        s if s.is_server_error() => ProviderError::NetworkError(format!("HTTP {status}")),
        _ => ProviderError::MalformedResponse(format!("unexpected HTTP {status}")),
    })
}

/// Map an API-level `status` field to an error
fn map_api_status(status: &str, message: Option<String>) -> ProviderResult<()> {
    let detail = || message.clone().unwrap_or_else(|| status.to_string());
    match status {
        "OK" => Ok(()),
        "ZERO_RESULTS" | "NOT_FOUND" | "INVALID_REQUEST" => {
            Err(ProviderError::InvalidAddress(detail()))
        }
        "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => Err(ProviderError::QuotaExceeded(detail())),
        "REQUEST_DENIED" => Err(ProviderError::AuthFailure(detail())),
        other => Err(ProviderError::MalformedResponse(format!(
            "unexpected status {other}"
        ))),
    }
}

fn departure_param(route: &RouteQuery) -> String {
    match route.departure {
        Some(when) if when > chrono::Local::now() => when.timestamp().to_string(),
        _ => "now".to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ValueField {
    value: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Leg {
    duration: Option<ValueField>,
    duration_in_traffic: Option<ValueField>,
    distance: Option<ValueField>,
}

#[derive(Debug, Deserialize)]
struct Route {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    legs: Vec<Leg>,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: Option<String>,
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: Option<String>,
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

/// Parse a Directions API response body
///
/// Sums all legs of the first route. `duration_in_traffic` is preferred when
/// `prefer_traffic` is set and every leg carries it.
pub fn parse_directions(body: &[u8], prefer_traffic: bool) -> ProviderResult<TravelEstimate> {
    let response: DirectionsResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

    let status = response
        .status
        .ok_or_else(|| ProviderError::MalformedResponse("missing status".into()))?;
    map_api_status(&status, response.error_message)?;

    let route = response
        .routes
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidAddress("no route found".into()))?;
    if route.legs.is_empty() {
        return Err(ProviderError::MalformedResponse("route has no legs".into()));
    }

    let mut seconds = 0u64;
    let mut meters = 0u64;
    for leg in &route.legs {
        let traffic = leg.duration_in_traffic.as_ref().and_then(|v| v.value);
        let plain = leg.duration.as_ref().and_then(|v| v.value);
        let leg_seconds = match (prefer_traffic, traffic, plain) {
            (true, Some(t), _) => t,
            (_, _, Some(d)) => d,
            _ => return Err(ProviderError::MalformedResponse("leg missing duration".into())),
        };
        seconds = seconds.saturating_add(leg_seconds);
        meters = meters.saturating_add(leg.distance.as_ref().and_then(|v| v.value).unwrap_or(0));
    }

    Ok(TravelEstimate {
        duration: Duration::from_secs(seconds),
        distance_meters: meters,
        summary: route.summary,
    })
}

/// Parse a Geocoding API response body into the first result's location
pub fn parse_geocode(body: &[u8]) -> ProviderResult<Location> {
    let response: GeocodeResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

    let status = response
        .status
        .ok_or_else(|| ProviderError::MalformedResponse("missing status".into()))?;
    map_api_status(&status, response.error_message)?;

    let first = response
        .results
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidAddress("no geocoding results".into()))?;

    Location::new(first.geometry.location.lat, first.geometry.location.lng)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))
}

#[async_trait]
impl TravelTimeProvider for GoogleMapsProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn query(&self, route: &RouteQuery) -> ProviderResult<TravelEstimate> {
        let driving = route.mode == TravelMode::Driving;
        let mut params = vec![
            ("origin", route.origin.to_string()),
            ("destination", route.destination.to_string()),
            ("mode", route.mode.as_str().to_string()),
            ("departure_time", departure_param(route)),
        ];
        if driving {
            params.push(("traffic_model", "best_guess".to_string()));
        }

        debug!(route = %route.summary(), "Querying directions");
        let body = self.get("directions", &params).await?;
        parse_directions(&body, driving)
    }
}

#[async_trait]
impl Geocoder for GoogleMapsProvider {
    async fn geocode(&self, address: &str) -> ProviderResult<Location> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ProviderError::InvalidAddress("empty address".into()));
        }

        debug!(address, "Geocoding address");
        let body = self.get("geocode", &[("address", address.to_string())]).await?;
        parse_geocode(&body)
    }
}
