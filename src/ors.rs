//! OpenRouteService adapter — the primary, key-authenticated provider.
//!
//! Sends a POST geometry request with ordered `[lng, lat]` coordinates and
//! per-waypoint search radii, and parses the GeoJSON feature response. When
//! the backend reports that a specific waypoint could not be matched to the
//! road network, the adapter widens that waypoint's search radius along a
//! bounded ladder and retries.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::json;

use crate::provider::{self, ProviderError, ProviderRoute, RequestToken, RouteProvider};
use crate::{TransportMode, Waypoint};

/// Search radius ladder in meters; -1 tells the backend "unlimited".
const SEARCH_RADII: [f64; 3] = [350.0, 1000.0, -1.0];

/// Backend error code for "could not find routable point".
const CODE_POINT_NOT_FOUND: u32 = 2010;

#[derive(Debug, Clone)]
pub struct OrsConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for OrsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openrouteservice.org".to_string(),
            timeout_secs: 30,
        }
    }
}

pub struct OrsProvider {
    config: OrsConfig,
    client: reqwest::Client,
}

impl OrsProvider {
    pub fn new(config: OrsConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// Whether a usable API key is configured.
    pub fn has_credentials(&self) -> bool {
        self.config
            .api_key
            .as_deref()
            .map_or(false, |k| !k.trim().is_empty())
    }

    fn profile(mode: TransportMode) -> &'static str {
        match mode {
            TransportMode::Car => "driving-car",
            TransportMode::Bike => "cycling-regular",
            TransportMode::Foot => "foot-walking",
        }
    }

    async fn request(
        &self,
        key: &str,
        waypoints: &[Waypoint],
        mode: TransportMode,
        radiuses: &[f64],
    ) -> Result<ProviderRoute, ProviderError> {
        let url = format!(
            "{}/v2/directions/{}/geojson",
            self.config.base_url,
            Self::profile(mode)
        );
        let coordinates: Vec<[f64; 2]> = waypoints.iter().map(|w| [w.lng, w.lat]).collect();
        let body = json!({ "coordinates": coordinates, "radiuses": radiuses });

        let response = self
            .client
            .post(&url)
            .header("Authorization", key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(classify_error(status, &text));
        }

        parse_directions(&text)
    }
}

#[async_trait]
impl RouteProvider for OrsProvider {
    fn name(&self) -> &'static str {
        "openrouteservice"
    }

    async fn fetch_route(
        &self,
        waypoints: &[Waypoint],
        mode: TransportMode,
        token: &RequestToken,
    ) -> Result<ProviderRoute, ProviderError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ProviderError::Forbidden)?;

        let mut radiuses = vec![SEARCH_RADII[0]; waypoints.len()];
        let mut rung = 0;

        loop {
            token.check()?;
            let err = match self.request(key, waypoints, mode, &radiuses).await {
                Ok(route) => return Ok(route),
                Err(err) => err,
            };

            match err {
                ProviderError::BadRequest {
                    waypoint: Some(idx),
                    message,
                } if rung + 1 < SEARCH_RADII.len() && idx < radiuses.len() => {
                    // Widen only the waypoint the backend could not match.
                    rung += 1;
                    radiuses[idx] = SEARCH_RADII[rung];
                    debug!(
                        "widening search radius for waypoint {} to {} ({})",
                        idx, SEARCH_RADII[rung], message
                    );
                }
                other => return Err(other),
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Response parsing
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GeoJsonResponse {
    #[serde(default)]
    features: Vec<GeoJsonFeature>,
}

#[derive(Debug, Deserialize)]
struct GeoJsonFeature {
    geometry: GeoJsonGeometry,
    #[serde(default)]
    properties: GeoJsonProperties,
}

#[derive(Debug, Deserialize)]
struct GeoJsonGeometry {
    #[serde(default)]
    coordinates: Vec<Vec<f64>>,
}

#[derive(Debug, Default, Deserialize)]
struct GeoJsonProperties {
    #[serde(default)]
    summary: GeoJsonSummary,
}

#[derive(Debug, Default, Deserialize)]
struct GeoJsonSummary {
    #[serde(default)]
    distance: f64,
    #[serde(default)]
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct OrsErrorPayload {
    error: OrsErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OrsErrorDetail {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    message: String,
}

fn parse_directions(body: &str) -> Result<ProviderRoute, ProviderError> {
    let response: GeoJsonResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Network(e.to_string()))?;

    let feature = response.features.first().ok_or(ProviderError::EmptyRoute)?;
    let coordinates: Vec<Waypoint> = feature
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
        distance_meters: feature.properties.summary.distance,
        duration_seconds: Some(feature.properties.summary.duration),
    })
}

fn classify_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    if let Ok(payload) = serde_json::from_str::<OrsErrorPayload>(body) {
        let message = payload.error.message;
        if payload.error.code == CODE_POINT_NOT_FOUND {
            return ProviderError::BadRequest {
                waypoint: unroutable_waypoint(&message),
                message,
            };
        }
        return match status.as_u16() {
            429 => ProviderError::RateLimited,
            401 | 403 => ProviderError::Forbidden,
            400 | 404 | 406 => ProviderError::BadRequest {
                waypoint: None,
                message,
            },
            _ => ProviderError::Network(format!("HTTP {}: {}", status, message)),
        };
    }

    provider::error_for_status(status, body)
}

/// Pull the failing waypoint index out of a "could not find routable point
/// within a maximum radius of … of specified coordinate N: …" message.
fn unroutable_waypoint(message: &str) -> Option<usize> {
    let rest = message.split("coordinate").nth(1)?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_mapping() {
        assert_eq!(OrsProvider::profile(TransportMode::Car), "driving-car");
        assert_eq!(OrsProvider::profile(TransportMode::Bike), "cycling-regular");
        assert_eq!(OrsProvider::profile(TransportMode::Foot), "foot-walking");
    }

    #[test]
    fn test_parse_directions() {
        let body = r#"{
            "features": [{
                "geometry": {
                    "coordinates": [[27.559, 53.9006], [27.565, 53.905], [27.57, 53.91]]
                },
                "properties": {
                    "summary": { "distance": 5000.0, "duration": 420.0 }
                }
            }]
        }"#;

        let route = parse_directions(body).unwrap();
        assert_eq!(route.coordinates.len(), 3);
        assert_eq!(route.coordinates[0], Waypoint::new(27.559, 53.9006));
        assert_eq!(route.distance_meters, 5000.0);
        assert_eq!(route.duration_seconds, Some(420.0));
    }

    #[test]
    fn test_parse_directions_without_features() {
        assert!(matches!(
            parse_directions(r#"{"features": []}"#),
            Err(ProviderError::EmptyRoute)
        ));
    }

    #[test]
    fn test_unroutable_waypoint_index() {
        let msg = "Could not find routable point within a maximum radius of 350.0 \
                   meters of specified coordinate 1: 27.5590000 53.9006000";
        assert_eq!(unroutable_waypoint(msg), Some(1));
        assert_eq!(unroutable_waypoint("no index here"), None);
    }

    #[test]
    fn test_classify_point_not_found() {
        let body = r#"{"error": {"code": 2010, "message": "Could not find routable point within a maximum radius of 350.0 meters of specified coordinate 0: 8.68 49.41"}}"#;
        let err = classify_error(reqwest::StatusCode::NOT_FOUND, body);
        assert!(matches!(
            err,
            ProviderError::BadRequest { waypoint: Some(0), .. }
        ));
    }

    #[test]
    fn test_classify_auth_error() {
        let body = r#"{"error": {"code": 2001, "message": "Access to this API has been disallowed"}}"#;
        assert!(matches!(
            classify_error(reqwest::StatusCode::FORBIDDEN, body),
            ProviderError::Forbidden
        ));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        // base_url is unreachable on purpose; a network attempt would error
        // with Network, not Forbidden.
        let provider = OrsProvider::new(OrsConfig {
            api_key: None,
            base_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        })
        .unwrap();

        let result = provider
            .fetch_route(
                &[Waypoint::new(27.559, 53.9006), Waypoint::new(27.57, 53.91)],
                TransportMode::Car,
                &RequestToken::detached(),
            )
            .await;

        assert!(matches!(result, Err(ProviderError::Forbidden)));
        assert!(!provider.has_credentials());
    }
}
