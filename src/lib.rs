//! # Route Engine
//!
//! Route resolution and map point clustering for travel-journal maps.
//!
//! This library provides:
//! - Multi-provider route resolution with retry, fallback and caching
//! - Sliding-window rate limiting of outbound provider calls
//! - Zoom-dependent clustering of map points
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use route_engine::{
//!     ors::OrsConfig, osrm::OsrmConfig, valhalla::ValhallaConfig,
//!     ProviderSet, RateLimitConfig, ResolverConfig, RouteCache, RouteResolver,
//!     TransportMode, Waypoint,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), reqwest::Error> {
//! let providers = ProviderSet::standard(
//!     OrsConfig { api_key: Some("key".into()), ..Default::default() },
//!     ValhallaConfig::default(),
//!     OsrmConfig::default(),
//! )?;
//! let cache = Arc::new(RouteCache::new(RateLimitConfig::default()));
//! let resolver = RouteResolver::new(ResolverConfig::default(), providers, cache);
//!
//! let state = resolver
//!     .resolve(
//!         vec![Waypoint::new(27.559, 53.9006), Waypoint::new(27.57, 53.91)],
//!         TransportMode::Car,
//!     )
//!     .await;
//! println!("{:.0} m", state.route.map_or(0.0, |r| r.distance_meters));
//! # Ok(())
//! # }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod cache;
pub mod cluster;
pub mod geo;
pub mod ors;
pub mod osrm;
pub mod provider;
pub mod resolver;
pub mod retry;
pub mod valhalla;

pub use cache::{RateLimitConfig, RouteCache};
pub use cluster::{cluster_points, Cluster, ClusterConfig, ClusterStrategy, MapPoint};
pub use provider::{ProviderError, ProviderRoute, RequestToken, RouteProvider};
pub use resolver::{ProviderSet, ResolverConfig, RouteResolver, RouteState};

// ============================================================================
// Core Types
// ============================================================================

/// A single routing coordinate as (longitude, latitude).
///
/// # Example
/// ```
/// use route_engine::Waypoint;
/// let minsk = Waypoint::new(27.559, 53.9006);
/// assert!(minsk.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lng: f64,
    pub lat: f64,
}

impl Waypoint {
    /// Create a new waypoint from longitude and latitude.
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Check that both coordinates are finite and within WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lng >= -180.0
            && self.lng <= 180.0
    }
}

/// How the route is travelled. Each provider maps this onto its own
/// profile vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Car,
    Bike,
    Foot,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Car => "car",
            TransportMode::Bike => "bike",
            TransportMode::Foot => "foot",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache and dedup identity of a route request: transport mode plus the
/// ordered waypoint list rendered at fixed precision.
///
/// Two requests with the same key are interchangeable for caching and
/// in-flight deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey(String);

impl RouteKey {
    pub fn new(mode: TransportMode, waypoints: &[Waypoint]) -> Self {
        let coords = waypoints
            .iter()
            .map(|w| format!("{:.6},{:.6}", w.lng, w.lat))
            .collect::<Vec<_>>()
            .join(";");
        Self(format!("{}|{}", mode.as_str(), coords))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved route ready for rendering.
///
/// `is_optimal` is true when the geometry came from a real routing provider
/// and false when it is the straight-line fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    /// Path geometry, ordered start to end.
    pub coordinates: Vec<Waypoint>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub is_optimal: bool,
}

/// Bounding box of a set of waypoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from waypoints. Returns `None` for empty input.
    pub fn from_waypoints(points: &[Waypoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.lat);
            max_lat = max_lat.max(p.lat);
            min_lng = min_lng.min(p.lng);
            max_lng = max_lng.max(p.lng);
        }

        Some(Self { min_lat, max_lat, min_lng, max_lng })
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> Waypoint {
        Waypoint::new(
            (self.min_lng + self.max_lng) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
