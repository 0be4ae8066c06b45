//! Zoom-dependent clustering of map points.
//!
//! Groups a point set into visual clusters so the map stays readable when an
//! article carries many markers. Two interchangeable strategies:
//!
//! - **Distance-based**: greedy assignment to the nearest cluster centroid
//!   within a zoom-dependent radius. O(n·k), fine for the low hundreds of
//!   points a journal typically shows.
//! - **Grid-based**: snap every point to a zoom-dependent grid cell and group
//!   by cell. O(n), for larger sets.
//!
//! Clustering only engages above a configurable point-count threshold and is
//! disabled past an "expand" zoom level, where each point is shown on its
//! own. In every case the returned clusters partition the input set: each
//! point belongs to exactly one cluster.

use std::collections::BTreeMap;

use crate::geo::haversine_meters;
use crate::{Bounds, Waypoint};

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// A map point eligible for clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct MapPoint {
    pub id: String,
    pub position: Waypoint,
    /// Display metadata carried through untouched.
    pub label: Option<String>,
}

impl MapPoint {
    pub fn new(id: impl Into<String>, position: Waypoint) -> Self {
        Self {
            id: id.into(),
            position,
            label: None,
        }
    }
}

/// A group of map points rendered as one marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Stable identity: identical membership yields the identical key across
    /// recomputation, so callers can match clusters between renders.
    pub key: String,
    pub centroid: Waypoint,
    pub bounds: Bounds,
    pub points: Vec<MapPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStrategy {
    Distance,
    Grid,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Below this point count, clustering is skipped entirely.
    pub min_points: usize,
    /// Above this zoom level, points are shown ungrouped.
    pub expand_zoom: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_points: 10,
            expand_zoom: 17.0,
        }
    }
}

/// Cluster radius in meters for the distance strategy. Shrinks as the map
/// zooms in.
pub fn radius_for_zoom(zoom: f64) -> f64 {
    if zoom <= 8.0 {
        16_000.0
    } else if zoom <= 9.0 {
        11_000.0
    } else if zoom <= 10.0 {
        8_000.0
    } else if zoom <= 11.0 {
        4_000.0
    } else if zoom <= 12.0 {
        2_000.0
    } else if zoom <= 13.0 {
        1_000.0
    } else if zoom <= 14.0 {
        500.0
    } else {
        250.0
    }
}

/// Grid cell edge length in meters for the grid strategy.
pub fn cell_size_for_zoom(zoom: f64) -> f64 {
    radius_for_zoom(zoom)
}

/// Group `points` into clusters for the given zoom level.
///
/// Every input point ends up in exactly one returned cluster.
pub fn cluster_points(
    points: &[MapPoint],
    zoom: f64,
    strategy: ClusterStrategy,
    config: &ClusterConfig,
) -> Vec<Cluster> {
    if points.len() < config.min_points || zoom > config.expand_zoom {
        return points.iter().map(singleton).collect();
    }

    match strategy {
        ClusterStrategy::Distance => cluster_by_distance(points, radius_for_zoom(zoom)),
        ClusterStrategy::Grid => cluster_by_grid(points, cell_size_for_zoom(zoom)),
    }
}

fn singleton(point: &MapPoint) -> Cluster {
    let position = point.position;
    Cluster {
        key: cluster_key(position, 1),
        centroid: position,
        bounds: Bounds {
            min_lat: position.lat,
            max_lat: position.lat,
            min_lng: position.lng,
            max_lng: position.lng,
        },
        points: vec![point.clone()],
    }
}

fn cluster_key(centroid: Waypoint, count: usize) -> String {
    format!("{:.5}:{:.5}:{}", centroid.lat, centroid.lng, count)
}

// Running-mean accumulator for one cluster under construction.
struct ClusterBuilder {
    sum_lat: f64,
    sum_lng: f64,
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
    points: Vec<MapPoint>,
}

impl ClusterBuilder {
    fn seeded(point: MapPoint) -> Self {
        let p = point.position;
        Self {
            sum_lat: p.lat,
            sum_lng: p.lng,
            min_lat: p.lat,
            max_lat: p.lat,
            min_lng: p.lng,
            max_lng: p.lng,
            points: vec![point],
        }
    }

    fn centroid(&self) -> Waypoint {
        let n = self.points.len() as f64;
        Waypoint::new(self.sum_lng / n, self.sum_lat / n)
    }

    fn push(&mut self, point: MapPoint) {
        let p = point.position;
        self.sum_lat += p.lat;
        self.sum_lng += p.lng;
        self.min_lat = self.min_lat.min(p.lat);
        self.max_lat = self.max_lat.max(p.lat);
        self.min_lng = self.min_lng.min(p.lng);
        self.max_lng = self.max_lng.max(p.lng);
        self.points.push(point);
    }

    fn finish(self) -> Cluster {
        let centroid = self.centroid();
        Cluster {
            key: cluster_key(centroid, self.points.len()),
            centroid,
            bounds: Bounds {
                min_lat: self.min_lat,
                max_lat: self.max_lat,
                min_lng: self.min_lng,
                max_lng: self.max_lng,
            },
            points: self.points,
        }
    }
}

/// Greedy agglomeration: each point joins the nearest existing cluster whose
/// centroid lies within `radius_meters`, or seeds a new one.
fn cluster_by_distance(points: &[MapPoint], radius_meters: f64) -> Vec<Cluster> {
    let mut builders: Vec<ClusterBuilder> = Vec::new();

    for point in points {
        let mut best: Option<(usize, f64)> = None;
        for (idx, builder) in builders.iter().enumerate() {
            let distance = haversine_meters(builder.centroid(), point.position);
            if distance <= radius_meters && best.map_or(true, |(_, d)| distance < d) {
                best = Some((idx, distance));
            }
        }

        match best {
            Some((idx, _)) => builders[idx].push(point.clone()),
            None => builders.push(ClusterBuilder::seeded(point.clone())),
        }
    }

    builders.into_iter().map(ClusterBuilder::finish).collect()
}

/// Snap every point to a grid cell of `cell_size_meters` and group by cell.
/// The grid is anchored at the first point's latitude so cell widths stay
/// meaningful away from the equator.
fn cluster_by_grid(points: &[MapPoint], cell_size_meters: f64) -> Vec<Cluster> {
    let Some(first) = points.first() else {
        return Vec::new();
    };
    let ref_lat = first.position.lat;
    let lat_meters_per_deg = METERS_PER_DEGREE;
    let lng_meters_per_deg = METERS_PER_DEGREE * ref_lat.to_radians().cos().abs().max(0.01);

    let mut cells: BTreeMap<(i64, i64), ClusterBuilder> = BTreeMap::new();

    for point in points {
        let p = point.position;
        let row = ((p.lat - ref_lat) * lat_meters_per_deg / cell_size_meters).floor() as i64;
        let col = (p.lng * lng_meters_per_deg / cell_size_meters).floor() as i64;

        match cells.get_mut(&(row, col)) {
            Some(builder) => builder.push(point.clone()),
            None => {
                cells.insert((row, col), ClusterBuilder::seeded(point.clone()));
            }
        }
    }

    cells.into_values().map(ClusterBuilder::finish).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, lng: f64, lat: f64) -> MapPoint {
        MapPoint::new(id, Waypoint::new(lng, lat))
    }

    /// 40 points along ~1.95 km of latitude, ~50 m apart.
    fn tight_line() -> Vec<MapPoint> {
        (0..40)
            .map(|i| point(&format!("p{}", i), 27.56, 53.9 + i as f64 * 0.00045))
            .collect()
    }

    fn collect_ids(clusters: &[Cluster]) -> Vec<String> {
        let mut ids: Vec<String> = clusters
            .iter()
            .flat_map(|c| c.points.iter().map(|p| p.id.clone()))
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_scenario_c_zoom_split() {
        let points = tight_line();
        let config = ClusterConfig::default();

        let coarse = cluster_points(&points, 9.0, ClusterStrategy::Distance, &config);
        assert_eq!(coarse.len(), 1);
        assert_eq!(coarse[0].points.len(), 40);

        let fine = cluster_points(&points, 16.0, ClusterStrategy::Distance, &config);
        assert!(fine.len() > 1);
    }

    #[test]
    fn test_partition_invariant_both_strategies() {
        let mut points = tight_line();
        // A second, far-away group.
        points.extend((0..10).map(|i| point(&format!("q{}", i), 30.5, 50.4 + i as f64 * 0.002)));

        let expected = {
            let mut ids: Vec<String> = points.iter().map(|p| p.id.clone()).collect();
            ids.sort();
            ids
        };

        let config = ClusterConfig::default();
        for strategy in [ClusterStrategy::Distance, ClusterStrategy::Grid] {
            for zoom in [5.0, 9.0, 12.0, 16.0] {
                let clusters = cluster_points(&points, zoom, strategy, &config);
                assert_eq!(
                    collect_ids(&clusters),
                    expected,
                    "partition broken at zoom {} for {:?}",
                    zoom,
                    strategy
                );
            }
        }
    }

    #[test]
    fn test_cluster_keys_stable_across_recomputation() {
        let points = tight_line();
        let config = ClusterConfig::default();

        let first = cluster_points(&points, 12.0, ClusterStrategy::Distance, &config);
        let second = cluster_points(&points, 12.0, ClusterStrategy::Distance, &config);

        let keys = |cs: &[Cluster]| cs.iter().map(|c| c.key.clone()).collect::<Vec<_>>();
        assert_eq!(keys(&first), keys(&second));
    }

    #[test]
    fn test_below_threshold_yields_singletons() {
        let points = vec![
            point("a", 27.56, 53.90),
            point("b", 27.561, 53.901),
            point("c", 27.562, 53.902),
        ];
        let clusters = cluster_points(
            &points,
            9.0,
            ClusterStrategy::Distance,
            &ClusterConfig::default(),
        );

        assert_eq!(clusters.len(), 3);
        assert!(clusters.iter().all(|c| c.points.len() == 1));
    }

    #[test]
    fn test_expand_zoom_disables_clustering() {
        let points = tight_line();
        let clusters = cluster_points(
            &points,
            18.0,
            ClusterStrategy::Distance,
            &ClusterConfig::default(),
        );
        assert_eq!(clusters.len(), points.len());
    }

    #[test]
    fn test_grid_groups_by_cell() {
        let mut points: Vec<MapPoint> = (0..10)
            .map(|i| point(&format!("near{}", i), 27.56 + i as f64 * 0.0001, 53.9))
            .collect();
        points.push(point("far", 28.2, 54.3));

        let clusters = cluster_points(
            &points,
            5.0,
            ClusterStrategy::Grid,
            &ClusterConfig { min_points: 2, expand_zoom: 17.0 },
        );

        assert_eq!(clusters.len(), 2);
        let sizes = {
            let mut s: Vec<usize> = clusters.iter().map(|c| c.points.len()).collect();
            s.sort();
            s
        };
        assert_eq!(sizes, vec![1, 10]);
    }

    #[test]
    fn test_centroid_is_running_mean() {
        let points = vec![
            point("a", 27.0, 53.0),
            point("b", 27.002, 53.002),
        ];
        let clusters = cluster_points(
            &points,
            5.0,
            ClusterStrategy::Distance,
            &ClusterConfig { min_points: 2, expand_zoom: 17.0 },
        );

        assert_eq!(clusters.len(), 1);
        let centroid = clusters[0].centroid;
        assert!((centroid.lng - 27.001).abs() < 1e-9);
        assert!((centroid.lat - 53.001).abs() < 1e-9);
    }

    #[test]
    fn test_radius_shrinks_with_zoom() {
        assert_eq!(radius_for_zoom(5.0), 16_000.0);
        assert_eq!(radius_for_zoom(9.0), 11_000.0);
        assert_eq!(radius_for_zoom(16.0), 250.0);
        assert!(radius_for_zoom(8.0) > radius_for_zoom(12.0));
    }

    #[test]
    fn test_empty_input() {
        let clusters = cluster_points(
            &[],
            9.0,
            ClusterStrategy::Grid,
            &ClusterConfig { min_points: 0, expand_zoom: 17.0 },
        );
        assert!(clusters.is_empty());
    }
}
