//! Route resolution state machine.
//!
//! A [`RouteResolver`] turns an ordered waypoint list plus transport mode
//! into a [`RouteResult`] by walking the provider fallback chain, and
//! publishes every state transition through a `tokio::sync::watch` channel
//! as a consistent `{loading, error, route}` triple.
//!
//! Resolution cycle, in order:
//! 1. Guard: fewer than 2 waypoints resets to idle; invalid coordinates are
//!    rejected before any network work.
//! 2. Cache lookup by [`RouteKey`]; a hit commits immediately.
//! 3. Debounce delay, so rapid waypoint edits coalesce into one request.
//! 4. Sliding-window rate limit check; when exhausted the straight-line
//!    fallback is published with the wait time and nothing is retried until
//!    the next explicit trigger.
//! 5. Provider chain: primary (when a key is configured, with transient
//!    retry/backoff) → alternate (bike/foot only) → open fallback (always
//!    the car profile). Success is anchored onto the requested endpoints and
//!    written to the cache.
//! 6. Full exhaustion publishes the straight-line fallback tagged
//!    `is_optimal = false` together with the last provider error.
//!
//! Every cycle is stamped with a strictly increasing request id. Starting a
//! new cycle aborts the previous task and invalidates its [`RequestToken`],
//! so a superseded response can never overwrite newer state or the cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::RouteCache;
use crate::geo;
use crate::ors::{OrsConfig, OrsProvider};
use crate::osrm::{OsrmConfig, OsrmProvider};
use crate::provider::{ProviderError, RequestToken, RouteProvider};
use crate::retry::{run_chain, ChainStep, RetryPolicy};
use crate::valhalla::{ValhallaConfig, ValhallaProvider};
use crate::{RouteKey, RouteResult, TransportMode, Waypoint};

/// Observable resolver output.
///
/// `route` holds the straight-line fallback when `error` is set, so the map
/// always has something to draw.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteState {
    pub loading: bool,
    pub error: Option<String>,
    pub route: Option<RouteResult>,
}

/// Tuning knobs for the resolution cycle.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Delay coalescing rapid waypoint edits into one request.
    pub debounce: Duration,
    /// Maximum endpoint deviation before anchoring kicks in.
    pub snap_threshold_meters: f64,
    /// Attempts against the primary provider.
    pub primary_attempts: u32,
    pub primary_backoff: Vec<Duration>,
    /// Attempts against each fallback provider.
    pub fallback_attempts: u32,
    pub fallback_backoff: Vec<Duration>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            snap_threshold_meters: 50.0,
            primary_attempts: 3,
            primary_backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            fallback_attempts: 2,
            fallback_backoff: vec![Duration::from_secs(1)],
        }
    }
}

/// The provider chain in priority order.
///
/// `primary` is the commercial backend and is skipped entirely when no key
/// is configured. `alternate` is only consulted for bike/foot modes and may
/// be absent in contexts where it is unreachable (e.g. blocked by
/// cross-origin restrictions). `open_fallback` is always available as the
/// last resort.
#[derive(Clone)]
pub struct ProviderSet {
    pub primary: Option<Arc<dyn RouteProvider>>,
    pub alternate: Option<Arc<dyn RouteProvider>>,
    pub open_fallback: Arc<dyn RouteProvider>,
}

impl ProviderSet {
    /// Build the standard chain from provider configs. The primary slot is
    /// filled only when the config carries a usable API key.
    pub fn standard(
        ors: OrsConfig,
        valhalla: ValhallaConfig,
        osrm: OsrmConfig,
    ) -> Result<Self, reqwest::Error> {
        let has_key = ors
            .api_key
            .as_deref()
            .map_or(false, |k| !k.trim().is_empty());
        let primary: Option<Arc<dyn RouteProvider>> = if has_key {
            Some(Arc::new(OrsProvider::new(ors)?))
        } else {
            None
        };

        Ok(Self {
            primary,
            alternate: Some(Arc::new(ValhallaProvider::new(valhalla)?)),
            open_fallback: Arc::new(OsrmProvider::new(osrm)?),
        })
    }
}

#[derive(Default)]
struct Active {
    key: Option<RouteKey>,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    config: ResolverConfig,
    providers: ProviderSet,
    cache: Arc<RouteCache>,
    state: watch::Sender<RouteState>,
    latest: Arc<AtomicU64>,
    active: Mutex<Active>,
}

/// Multi-provider route resolver with caching, debouncing and cancellation.
///
/// Cloneable handle; all clones share the same observable state. Must be
/// used from within a tokio runtime.
#[derive(Clone)]
pub struct RouteResolver {
    inner: Arc<Inner>,
}

impl RouteResolver {
    pub fn new(config: ResolverConfig, providers: ProviderSet, cache: Arc<RouteCache>) -> Self {
        let (state, _) = watch::channel(RouteState::default());
        Self {
            inner: Arc::new(Inner {
                config,
                providers,
                cache,
                state,
                latest: Arc::new(AtomicU64::new(0)),
                active: Mutex::new(Active::default()),
            }),
        }
    }

    /// Subscribe to resolver state changes. Redundant transitions are
    /// suppressed: subscribers only wake when the triple actually changes.
    pub fn subscribe(&self) -> watch::Receiver<RouteState> {
        self.inner.state.subscribe()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> RouteState {
        self.inner.state.borrow().clone()
    }

    /// Trigger a resolution cycle for the given waypoints and mode.
    ///
    /// Supersedes any in-flight cycle. A trigger whose [`RouteKey`] matches
    /// the current in-flight or displayed route is a no-op, unless the
    /// previous cycle ended in an error — an explicit re-trigger after a
    /// failure re-evaluates the rate window and providers.
    pub fn set_route(&self, waypoints: Vec<Waypoint>, mode: TransportMode) {
        let inner = &self.inner;

        if waypoints.len() < 2 {
            // Not enough input to route; clear the displayed route but leave
            // the cache store alone.
            inner.begin(None);
            inner.publish(RouteState::default());
            return;
        }

        if let Some(idx) = waypoints.iter().position(|w| !w.is_valid()) {
            inner.begin(None);
            inner.publish(RouteState {
                loading: false,
                error: Some(format!("invalid coordinate at waypoint {}", idx)),
                route: None,
            });
            return;
        }

        let key = RouteKey::new(mode, &waypoints);

        {
            let active = inner.active.lock().unwrap();
            let state = inner.state.borrow();
            if active.key.as_ref() == Some(&key)
                && state.error.is_none()
                && (state.loading || state.route.is_some())
            {
                debug!("duplicate trigger for {}, ignoring", key);
                return;
            }
        }

        if let Some(cached) = inner.cache.get(&key) {
            debug!("cache hit for {}", key);
            inner.begin(Some(key));
            inner.publish(RouteState {
                loading: false,
                error: None,
                route: Some(cached),
            });
            return;
        }

        let id = inner.begin(Some(key.clone()));
        let token = RequestToken::new(id, inner.latest.clone());

        let previous = inner.state.borrow().route.clone();
        inner.publish(RouteState {
            loading: true,
            error: None,
            route: previous,
        });

        let handle = tokio::spawn(run_cycle(self.inner.clone(), token, key, waypoints, mode));
        inner.active.lock().unwrap().handle = Some(handle);
    }

    /// Trigger a cycle and wait for its terminal state.
    pub async fn resolve(&self, waypoints: Vec<Waypoint>, mode: TransportMode) -> RouteState {
        let mut rx = self.subscribe();
        self.set_route(waypoints, mode);

        loop {
            let state = rx.borrow_and_update().clone();
            if !state.loading {
                return state;
            }
            if rx.changed().await.is_err() {
                return state;
            }
        }
    }
}

impl Inner {
    /// Start a new cycle: bump the request id (retroactively cancelling all
    /// older tokens), abort the previous task and remember the new key.
    fn begin(&self, key: Option<RouteKey>) -> u64 {
        let mut active = self.active.lock().unwrap();
        let id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(handle) = active.handle.take() {
            handle.abort();
        }
        active.key = key;
        id
    }

    fn publish(&self, next: RouteState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Commit a terminal state, and optionally a cache entry, unless the
    /// cycle has been superseded in the meantime.
    fn commit(
        &self,
        token: &RequestToken,
        write: Option<(RouteKey, RouteResult)>,
        state: RouteState,
    ) {
        let _active = self.active.lock().unwrap();
        if token.is_cancelled() {
            debug!("discarding stale result for request {}", token.id());
            return;
        }
        if let Some((key, result)) = write {
            self.cache.set(key, result);
        }
        self.publish(state);
    }

    fn chain_for(&self, mode: TransportMode) -> Vec<ChainStep> {
        let mut plan = Vec::new();

        if let Some(primary) = &self.providers.primary {
            plan.push(ChainStep {
                provider: primary.clone(),
                policy: RetryPolicy::transient(
                    self.config.primary_attempts,
                    self.config.primary_backoff.clone(),
                ),
            });
        }

        if matches!(mode, TransportMode::Bike | TransportMode::Foot) {
            if let Some(alternate) = &self.providers.alternate {
                plan.push(ChainStep {
                    provider: alternate.clone(),
                    policy: RetryPolicy::transient(
                        self.config.fallback_attempts,
                        self.config.fallback_backoff.clone(),
                    ),
                });
            }
        }

        plan.push(ChainStep {
            provider: self.providers.open_fallback.clone(),
            policy: RetryPolicy::transient(
                self.config.fallback_attempts,
                self.config.fallback_backoff.clone(),
            ),
        });

        plan
    }
}

async fn run_cycle(
    inner: Arc<Inner>,
    token: RequestToken,
    key: RouteKey,
    waypoints: Vec<Waypoint>,
    mode: TransportMode,
) {
    tokio::time::sleep(inner.config.debounce).await;
    if token.is_cancelled() {
        return;
    }

    // A parallel consumer of the shared cache may have resolved this key
    // while we were debouncing.
    if let Some(cached) = inner.cache.get(&key) {
        inner.commit(
            &token,
            None,
            RouteState {
                loading: false,
                error: None,
                route: Some(cached),
            },
        );
        return;
    }

    if !inner.cache.can_make_request() {
        let wait = inner.cache.time_until_next_request();
        let secs = wait.as_secs().max(1);
        warn!("rate window exhausted for {}, next slot in {}s", key, secs);
        inner.commit(
            &token,
            None,
            RouteState {
                loading: false,
                error: Some(format!(
                    "too many routing requests, try again in {}s",
                    secs
                )),
                route: Some(geo::direct_route(&waypoints, mode)),
            },
        );
        return;
    }
    inner.cache.record_request();

    let plan = inner.chain_for(mode);
    info!(
        "resolving {} via {} provider(s)",
        key,
        plan.len()
    );

    match run_chain(&plan, &waypoints, mode, &token).await {
        Ok(raw) => {
            let coordinates = geo::anchor_endpoints(
                &waypoints,
                raw.coordinates,
                inner.config.snap_threshold_meters,
            );
            let duration = raw
                .duration_seconds
                .unwrap_or_else(|| geo::estimate_duration(raw.distance_meters, mode));
            let result = RouteResult {
                coordinates,
                distance_meters: raw.distance_meters,
                duration_seconds: duration,
                is_optimal: true,
            };
            info!(
                "resolved {}: {:.0}m in {:.0}s",
                key, result.distance_meters, result.duration_seconds
            );
            inner.commit(
                &token,
                Some((key, result.clone())),
                RouteState {
                    loading: false,
                    error: None,
                    route: Some(result),
                },
            );
        }
        Err(ProviderError::Cancelled) => {
            debug!("cycle for {} cancelled", key);
        }
        Err(err) => {
            warn!("all providers failed for {}: {}", key, err);
            inner.commit(
                &token,
                None,
                RouteState {
                    loading: false,
                    error: Some(err.to_string()),
                    route: Some(geo::direct_route(&waypoints, mode)),
                },
            );
        }
    }
}
