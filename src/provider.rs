//! Common contract for routing provider adapters.
//!
//! Every adapter translates a waypoint list plus transport mode into one HTTP
//! call against its backend and parses the response into [`ProviderRoute`].
//! Failures are typed so the resolver's retry/fallback policy can tell
//! transient conditions from terminal ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{TransportMode, Waypoint};

/// Typed adapter failure.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider-side quota exhausted (HTTP 429).
    #[error("provider rate limit exceeded")]
    RateLimited,
    /// Credentials absent, malformed or rejected (HTTP 401/403).
    #[error("provider rejected credentials")]
    Forbidden,
    /// The request itself was invalid; `waypoint` is set when the provider
    /// identified which coordinate could not be matched to the road network.
    #[error("provider rejected request: {message}")]
    BadRequest {
        waypoint: Option<usize>,
        message: String,
    },
    /// Transport failure or unexpected provider response.
    #[error("network error: {0}")]
    Network(String),
    /// Provider answered but returned no usable geometry.
    #[error("provider returned no route geometry")]
    EmptyRoute,
    /// The resolution cycle was superseded while the call was pending.
    #[error("request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Transient failures are worth retrying on the same provider.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Network(_) | ProviderError::EmptyRoute)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Network(err.to_string())
    }
}

/// Map an unsuccessful HTTP status onto the error taxonomy. Adapters with a
/// structured error body refine this with their own parsing first.
pub(crate) fn error_for_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
    use reqwest::StatusCode;

    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ProviderError::Forbidden
    } else if status == StatusCode::BAD_REQUEST {
        ProviderError::BadRequest {
            waypoint: None,
            message: summarize_body(body),
        }
    } else {
        ProviderError::Network(format!("HTTP {}: {}", status, summarize_body(body)))
    }
}

fn summarize_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Parsed provider response in the common shape.
///
/// `duration_seconds` is optional because not every backend reports it; the
/// resolver falls back to a speed-based estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRoute {
    pub coordinates: Vec<Waypoint>,
    pub distance_meters: f64,
    pub duration_seconds: Option<f64>,
}

/// Cooperative cancellation handle for one resolution cycle.
///
/// Every cycle gets a strictly increasing id; starting a new cycle bumps the
/// shared counter, which retroactively cancels all older tokens. Adapters and
/// the retry executor check the token at each suspension point, and the
/// resolver compares ids again at commit time so a stale response can never
/// overwrite newer state.
#[derive(Debug, Clone)]
pub struct RequestToken {
    id: u64,
    latest: Arc<AtomicU64>,
}

impl RequestToken {
    pub fn new(id: u64, latest: Arc<AtomicU64>) -> Self {
        Self { id, latest }
    }

    /// A token that is never cancelled, for direct adapter use and tests.
    pub fn detached() -> Self {
        Self::new(0, Arc::new(AtomicU64::new(0)))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.latest.load(Ordering::SeqCst) != self.id
    }

    /// Error out early when the cycle has been superseded.
    pub fn check(&self) -> Result<(), ProviderError> {
        if self.is_cancelled() {
            Err(ProviderError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// One external routing backend.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Fetch a route through the given waypoints.
    ///
    /// Implementations must reject before any network call when required
    /// credentials are absent or malformed, and must honour `token` at each
    /// await point.
    async fn fetch_route(
        &self,
        waypoints: &[Waypoint],
        mode: TransportMode,
        token: &RequestToken,
    ) -> Result<ProviderRoute, ProviderError>;
}
