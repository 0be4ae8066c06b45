//! # Geometry Kit
//!
//! Pure geographic computation for route resolution.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_meters`] | Great-circle distance between two waypoints |
//! | [`path_length`] | Total length of a path in meters |
//! | [`decode_polyline`] | Decode a compact encoded polyline |
//! | [`anchor_endpoints`] | Snap a provider path onto the requested endpoints |
//! | [`estimate_duration`] | Speed-based duration estimate per transport mode |
//! | [`direct_route`] | Straight-line fallback route through the waypoints |
//!
//! All functions expect WGS84 coordinates, the standard used by GPS receivers
//! and every provider this crate talks to.

use geo::{Distance, Haversine, Point};

use crate::{RouteResult, TransportMode, Waypoint};

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two waypoints using the
/// Haversine formula.
///
/// Returns the distance in meters along the Earth's surface.
///
/// # Example
///
/// ```rust
/// use route_engine::{geo, Waypoint};
///
/// let london = Waypoint::new(-0.1278, 51.5074);
/// let paris = Waypoint::new(2.3522, 48.8566);
///
/// let distance = geo::haversine_meters(london, paris);
/// assert!((distance - 343_560.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_meters(a: Waypoint, b: Waypoint) -> f64 {
    let p1 = Point::new(a.lng, a.lat);
    let p2 = Point::new(b.lng, b.lat);
    Haversine::distance(p1, p2)
}

/// Calculate the total length of a path in meters.
///
/// Sums the haversine distance between consecutive waypoints. Empty or
/// single-point paths return 0.0.
pub fn path_length(points: &[Waypoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_meters(w[0], w[1]))
        .sum()
}

// =============================================================================
// Polyline Decoding
// =============================================================================

/// Decode a compact encoded polyline into a waypoint sequence.
///
/// Implements the Google encoded-polyline algorithm. OSRM's classic format
/// uses `precision` 5; Valhalla encodes its leg shapes at precision 6.
///
/// Returns `None` for malformed or truncated input.
///
/// # Example
///
/// ```rust
/// use route_engine::geo::decode_polyline;
///
/// let points = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@", 5).unwrap();
/// assert_eq!(points.len(), 3);
/// assert!((points[0].lat - 38.5).abs() < 1e-9);
/// assert!((points[0].lng - (-120.2)).abs() < 1e-9);
/// ```
pub fn decode_polyline(encoded: &str, precision: u32) -> Option<Vec<Waypoint>> {
    let factor = 10f64.powi(precision as i32);
    let bytes = encoded.as_bytes();

    let mut points = Vec::new();
    let mut index = 0;
    let mut lat = 0i64;
    let mut lng = 0i64;

    while index < bytes.len() {
        lat += decode_value(bytes, &mut index)?;
        lng += decode_value(bytes, &mut index)?;
        points.push(Waypoint::new(lng as f64 / factor, lat as f64 / factor));
    }

    Some(points)
}

/// Decode one zigzag-encoded varint starting at `index`.
fn decode_value(bytes: &[u8], index: &mut usize) -> Option<i64> {
    let mut result = 0i64;
    let mut shift = 0u32;

    loop {
        let byte = *bytes.get(*index)? as i64 - 63;
        *index += 1;
        if byte < 0 || shift > 60 {
            return None;
        }
        result |= (byte & 0x1f) << shift;
        shift += 5;
        if byte < 0x20 {
            break;
        }
    }

    Some(if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    })
}

// =============================================================================
// Endpoint Anchoring
// =============================================================================

/// Snap a provider's path geometry onto the requested endpoints.
///
/// Providers match waypoints to the road network, so the returned path can
/// start or end some distance away from the marker the user actually placed.
/// When the deviation exceeds `threshold_meters`, the first/last coordinate is
/// replaced by the exact requested waypoint so the rendered path touches the
/// selected markers.
pub fn anchor_endpoints(
    requested: &[Waypoint],
    mut provided: Vec<Waypoint>,
    threshold_meters: f64,
) -> Vec<Waypoint> {
    let (Some(&start), Some(&end)) = (requested.first(), requested.last()) else {
        return provided;
    };

    if let Some(first) = provided.first().copied() {
        if haversine_meters(start, first) > threshold_meters {
            provided[0] = start;
        }
    }
    if let Some(last) = provided.last().copied() {
        if haversine_meters(end, last) > threshold_meters {
            let idx = provided.len() - 1;
            provided[idx] = end;
        }
    }

    provided
}

// =============================================================================
// Duration & Fallback
// =============================================================================

/// Flat travel speeds in m/s used when a provider omits duration.
fn speed_for_mode(mode: TransportMode) -> f64 {
    match mode {
        TransportMode::Car => 13.9,  // ~50 km/h
        TransportMode::Bike => 4.2,  // ~15 km/h
        TransportMode::Foot => 1.4,  // ~5 km/h
    }
}

/// Heuristic duration estimate in seconds for a distance and transport mode.
pub fn estimate_duration(distance_meters: f64, mode: TransportMode) -> f64 {
    distance_meters.max(0.0) / speed_for_mode(mode)
}

/// Build the straight-line fallback route through the given waypoints.
///
/// Used when every provider has failed or the rate limit is exhausted; the
/// result is tagged `is_optimal = false` so callers can render it differently.
pub fn direct_route(waypoints: &[Waypoint], mode: TransportMode) -> RouteResult {
    let distance = path_length(waypoints);
    RouteResult {
        coordinates: waypoints.to_vec(),
        distance_meters: distance,
        duration_seconds: estimate_duration(distance, mode),
        is_optimal: false,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
