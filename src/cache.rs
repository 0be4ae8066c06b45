//! In-memory route cache and outbound rate limiting.
//!
//! The cache stores resolved routes for the process lifetime, keyed by
//! [`RouteKey`]. The rate limiter is a sliding window over the timestamps of
//! past outbound requests: it throttles total provider call volume rather
//! than per-key volume, because the providers enforce their own global
//! quotas.
//!
//! Both live behind short-lived mutexes and are shared between resolution
//! cycles as one injectable service instance (`Arc<RouteCache>`). `clear()`
//! resets both stores for test isolation.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;

use crate::{RouteKey, RouteResult};

/// Sliding-window limit on outbound provider calls.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: usize,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // Matches the primary provider's free-tier minute quota.
        Self {
            max_requests: 40,
            window: Duration::from_secs(60),
        }
    }
}

/// Process-lifetime route store plus request rate limiter.
pub struct RouteCache {
    limit: RateLimitConfig,
    routes: Mutex<HashMap<RouteKey, RouteResult>>,
    window: Mutex<VecDeque<Instant>>,
}

impl RouteCache {
    pub fn new(limit: RateLimitConfig) -> Self {
        Self {
            limit,
            routes: Mutex::new(HashMap::new()),
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Look up a previously resolved route.
    pub fn get(&self, key: &RouteKey) -> Option<RouteResult> {
        self.routes.lock().unwrap().get(key).cloned()
    }

    /// Store a resolved route. Overwrites any existing entry for the key.
    pub fn set(&self, key: RouteKey, result: RouteResult) {
        debug!("caching route for {}", key);
        self.routes.lock().unwrap().insert(key, result);
    }

    pub fn len(&self) -> usize {
        self.routes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a new outbound provider call is currently allowed.
    pub fn can_make_request(&self) -> bool {
        let mut window = self.window.lock().unwrap();
        Self::prune(&mut window, self.limit.window);
        window.len() < self.limit.max_requests
    }

    /// Record an outbound provider call against the window.
    pub fn record_request(&self) {
        self.window.lock().unwrap().push_back(Instant::now());
    }

    /// Wait time until the next outbound call is allowed. Zero when a call
    /// can be made right now.
    pub fn time_until_next_request(&self) -> Duration {
        let mut window = self.window.lock().unwrap();
        Self::prune(&mut window, self.limit.window);
        if window.len() < self.limit.max_requests {
            return Duration::ZERO;
        }
        match window.front() {
            Some(oldest) => self
                .limit
                .window
                .saturating_sub(oldest.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Drop both the route store and the request window. Test/reset hook.
    pub fn clear(&self) {
        self.routes.lock().unwrap().clear();
        self.window.lock().unwrap().clear();
    }

    fn prune(window: &mut VecDeque<Instant>, max_age: Duration) {
        let now = Instant::now();
        while let Some(front) = window.front() {
            if now.duration_since(*front) >= max_age {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TransportMode, Waypoint};

    fn sample_key() -> RouteKey {
        RouteKey::new(
            TransportMode::Car,
            &[Waypoint::new(27.559, 53.9006), Waypoint::new(27.57, 53.91)],
        )
    }

    fn sample_result() -> RouteResult {
        RouteResult {
            coordinates: vec![Waypoint::new(27.559, 53.9006), Waypoint::new(27.57, 53.91)],
            distance_meters: 1500.0,
            duration_seconds: 120.0,
            is_optimal: true,
        }
    }

    #[test]
    fn test_get_set_roundtrip() {
        let cache = RouteCache::new(RateLimitConfig::default());
        let key = sample_key();

        assert!(cache.get(&key).is_none());
        cache.set(key.clone(), sample_result());
        assert_eq!(cache.get(&key), Some(sample_result()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_resets_routes_and_window() {
        let cache = RouteCache::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
        });
        cache.set(sample_key(), sample_result());
        cache.record_request();
        assert!(!cache.can_make_request());

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.can_make_request());
    }

    #[test]
    fn test_window_exhaustion_and_wait_time() {
        let cache = RouteCache::new(RateLimitConfig {
            max_requests: 2,
            window: Duration::from_secs(60),
        });

        assert!(cache.can_make_request());
        assert_eq!(cache.time_until_next_request(), Duration::ZERO);

        cache.record_request();
        cache.record_request();

        assert!(!cache.can_make_request());
        let wait = cache.time_until_next_request();
        assert!(wait > Duration::from_secs(55) && wait <= Duration::from_secs(60));
    }

    #[test]
    fn test_window_slides() {
        let cache = RouteCache::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_millis(30),
        });

        cache.record_request();
        assert!(!cache.can_make_request());

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.can_make_request());
        assert_eq!(cache.time_until_next_request(), Duration::ZERO);
    }

    #[test]
    fn test_window_is_global_across_keys() {
        // The limiter never looks at keys at all; recording against one
        // route exhausts the window for every other route too.
        let cache = RouteCache::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
        });
        cache.record_request();
        assert!(!cache.can_make_request());
    }
}
