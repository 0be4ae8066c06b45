//! Valhalla adapter — the keyless alternate fallback for bike and foot.
//!
//! Issues a GET request whose `json` query parameter embeds the locations and
//! a costing profile. The response carries one encoded polyline (precision 6)
//! per leg plus a trip summary with length in kilometers and time in seconds.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::geo::decode_polyline;
use crate::provider::{self, ProviderError, ProviderRoute, RequestToken, RouteProvider};
use crate::{TransportMode, Waypoint};

/// Valhalla leg shapes are encoded at precision 6.
const SHAPE_PRECISION: u32 = 6;

#[derive(Debug, Clone)]
pub struct ValhallaConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ValhallaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://valhalla1.openstreetmap.us".to_string(),
            timeout_secs: 30,
        }
    }
}

pub struct ValhallaProvider {
    config: ValhallaConfig,
    client: reqwest::Client,
}

impl ValhallaProvider {
    pub fn new(config: ValhallaConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn costing(mode: TransportMode) -> &'static str {
        match mode {
            TransportMode::Car => "auto",
            TransportMode::Bike => "bicycle",
            TransportMode::Foot => "pedestrian",
        }
    }

    fn payload(waypoints: &[Waypoint], mode: TransportMode) -> String {
        let locations: Vec<serde_json::Value> = waypoints
            .iter()
            .map(|w| json!({ "lon": w.lng, "lat": w.lat }))
            .collect();
        json!({
            "locations": locations,
            "costing": Self::costing(mode),
            "units": "kilometers"
        })
        .to_string()
    }
}

#[async_trait]
impl RouteProvider for ValhallaProvider {
    fn name(&self) -> &'static str {
        "valhalla"
    }

    async fn fetch_route(
        &self,
        waypoints: &[Waypoint],
        mode: TransportMode,
        token: &RequestToken,
    ) -> Result<ProviderRoute, ProviderError> {
        token.check()?;

        let url = format!("{}/route", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("json", Self::payload(waypoints, mode))])
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(provider::error_for_status(status, &text));
        }

        parse_trip(&text)
    }
}

#[derive(Debug, Deserialize)]
struct ValhallaResponse {
    #[serde(default)]
    trip: Option<ValhallaTrip>,
}

#[derive(Debug, Deserialize)]
struct ValhallaTrip {
    #[serde(default)]
    legs: Vec<ValhallaLeg>,
    #[serde(default)]
    summary: ValhallaSummary,
}

#[derive(Debug, Deserialize)]
struct ValhallaLeg {
    #[serde(default)]
    shape: String,
}

#[derive(Debug, Default, Deserialize)]
struct ValhallaSummary {
    /// Trip length in kilometers.
    #[serde(default)]
    length: f64,
    /// Trip time in seconds.
    #[serde(default)]
    time: f64,
}

fn parse_trip(body: &str) -> Result<ProviderRoute, ProviderError> {
    let response: ValhallaResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Network(e.to_string()))?;

    let trip = response.trip.ok_or(ProviderError::EmptyRoute)?;

    let mut coordinates: Vec<Waypoint> = Vec::new();
    for leg in &trip.legs {
        let points =
            decode_polyline(&leg.shape, SHAPE_PRECISION).ok_or(ProviderError::EmptyRoute)?;
        // Consecutive legs share their joint point.
        let skip = usize::from(!coordinates.is_empty());
        coordinates.extend(points.into_iter().skip(skip));
    }

    if coordinates.len() < 2 {
        return Err(ProviderError::EmptyRoute);
    }

    Ok(ProviderRoute {
        coordinates,
        distance_meters: trip.summary.length * 1000.0,
        duration_seconds: Some(trip.summary.time),
    })
}
