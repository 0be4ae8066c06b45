//! OSRM adapter — the keyless open fallback.
//!
//! Issues a GET request with semicolon-separated `lng,lat` pairs against the
//! public routing server. The free-tier bike/foot profiles on that server are
//! unreliable, so every transport mode is routed with the car profile; the
//! resolver relies on this adapter as a last resort and accepts the mismatch.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::provider::{self, ProviderError, ProviderRoute, RequestToken, RouteProvider};
use crate::{TransportMode, Waypoint};

/// Profile used for every mode. Kept fixed on purpose.
const PROFILE: &str = "driving";

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://router.project-osrm.org".to_string(),
            timeout_secs: 30,
        }
    }
}

pub struct OsrmProvider {
    config: OsrmConfig,
    client: reqwest::Client,
}

impl OsrmProvider {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn route_url(&self, waypoints: &[Waypoint]) -> String {
        let coords = waypoints
            .iter()
            .map(|w| format!("{:.6},{:.6}", w.lng, w.lat))
            .collect::<Vec<_>>()
            .join(";");
        format!(
            "{}/route/v1/{}/{}?overview=full&geometries=geojson",
            self.config.base_url, PROFILE, coords
        )
    }
}

#[async_trait]
impl RouteProvider for OsrmProvider {
    fn name(&self) -> &'static str {
        "osrm"
    }

    async fn fetch_route(
        &self,
        waypoints: &[Waypoint],
        _mode: TransportMode,
        token: &RequestToken,
    ) -> Result<ProviderRoute, ProviderError> {
        token.check()?;

        let response = self.client.get(self.route_url(waypoints)).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(provider::error_for_status(status, &text));
        }

        parse_route(&text)
    }
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    #[serde(default)]
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    #[serde(default)]
    distance: f64,
    #[serde(default)]
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    #[serde(default)]
    coordinates: Vec<Vec<f64>>,
}

fn parse_route(body: &str) -> Result<ProviderRoute, ProviderError> {
    let response: OsrmResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Network(e.to_string()))?;

    if !response.code.is_empty() && response.code != "Ok" {
        return Err(match response.code.as_str() {
            "NoRoute" | "NoSegment" => ProviderError::EmptyRoute,
            other => ProviderError::BadRequest {
                waypoint: None,
                message: other.to_string(),
            },
        });
    }

    let route = response.routes.first().ok_or(ProviderError::EmptyRoute)?;
    let coordinates: Vec<Waypoint> = route
        .geometry
        .coordinates
        .iter()
        .filter(|c| c.len() >= 2)
        .map(|c| Waypoint::new(c[0], c[1]))
        .collect();

    if coordinates.len() < 2 {
        return Err(ProviderError::EmptyRoute);
    }

    Ok(ProviderRoute {
        coordinates,
        distance_meters: route.distance,
        duration_seconds: Some(route.duration),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_url_pins_car_profile() {
        let provider = OsrmProvider::new(OsrmConfig::default()).unwrap();
        let url = provider.route_url(&[
            Waypoint::new(27.559, 53.9006),
            Waypoint::new(27.57, 53.91),
        ]);
        assert!(url.contains("/route/v1/driving/"));
        assert!(url.contains("27.559000,53.900600;27.570000,53.910000"));
    }

    #[test]
    fn test_parse_route() {
        let body = r#"{
            "code": "Ok",
            "routes": [{
                "geometry": { "coordinates": [[27.559, 53.9006], [27.57, 53.91]] },
                "distance": 1480.5,
                "duration": 133.2
            }]
        }"#;

        let route = parse_route(body).unwrap();
        assert_eq!(route.coordinates.len(), 2);
        assert_eq!(route.distance_meters, 1480.5);
        assert_eq!(route.duration_seconds, Some(133.2));
    }

    #[test]
    fn test_parse_no_route_code() {
        let body = r#"{"code": "NoRoute", "routes": []}"#;
        assert!(matches!(parse_route(body), Err(ProviderError::EmptyRoute)));
    }

    #[test]
    fn test_parse_empty_routes() {
        let body = r#"{"code": "Ok", "routes": []}"#;
        assert!(matches!(parse_route(body), Err(ProviderError::EmptyRoute)));
    }
}
