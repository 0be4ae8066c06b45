//! Declarative retry and fallback execution.
//!
//! The resolver describes its provider chain as an ordered list of
//! [`ChainStep`]s; a single executor walks the list, retrying each provider
//! according to its [`RetryPolicy`] before falling through to the next one.
//! Keeping the chain as data makes the fallback behaviour testable without
//! the resolver.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::provider::{ProviderError, ProviderRoute, RequestToken, RouteProvider};
use crate::{TransportMode, Waypoint};

/// Per-provider retry behaviour.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before each retry; the last entry repeats if there are more
    /// retries than entries.
    pub backoff: Vec<Duration>,
    /// Which failures are worth another attempt on the same provider.
    pub retry_on: fn(&ProviderError) -> bool,
}

impl RetryPolicy {
    /// Retry transient failures with the given backoff schedule.
    pub fn transient(max_attempts: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_attempts,
            backoff,
            retry_on: ProviderError::is_transient,
        }
    }

    /// One attempt, no retries.
    pub fn single() -> Self {
        Self {
            max_attempts: 1,
            backoff: Vec::new(),
            retry_on: |_| false,
        }
    }

    fn delay_before_retry(&self, retry_index: usize) -> Duration {
        self.backoff
            .get(retry_index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// One link of the fallback chain.
#[derive(Clone)]
pub struct ChainStep {
    pub provider: Arc<dyn RouteProvider>,
    pub policy: RetryPolicy,
}

/// Walk the chain in order, retrying each step per its policy, and return the
/// first success or the last step's error.
///
/// Cancellation short-circuits the whole chain: once the token is stale there
/// is no point contacting further providers.
pub async fn run_chain(
    steps: &[ChainStep],
    waypoints: &[Waypoint],
    mode: TransportMode,
    token: &RequestToken,
) -> Result<ProviderRoute, ProviderError> {
    let mut last_err = ProviderError::EmptyRoute;

    for step in steps {
        match run_with_retry(step, waypoints, mode, token).await {
            Ok(route) => return Ok(route),
            Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
            Err(err) => {
                warn!("provider {} exhausted: {}", step.provider.name(), err);
                last_err = err;
            }
        }
    }

    Err(last_err)
}

async fn run_with_retry(
    step: &ChainStep,
    waypoints: &[Waypoint],
    mode: TransportMode,
    token: &RequestToken,
) -> Result<ProviderRoute, ProviderError> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        token.check()?;

        match step.provider.fetch_route(waypoints, mode, token).await {
            Ok(route) => return Ok(route),
            Err(err) if (step.policy.retry_on)(&err) && attempt < step.policy.max_attempts => {
                let delay = step.policy.delay_before_retry(attempt as usize - 1);
                debug!(
                    "provider {} attempt {}/{} failed ({}), retrying in {:?}",
                    step.provider.name(),
                    attempt,
                    step.policy.max_attempts,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    struct ScriptedProvider {
        name: &'static str,
        calls: AtomicUsize,
        respond: Box<dyn Fn(usize) -> Result<ProviderRoute, ProviderError> + Send + Sync>,
    }

    impl ScriptedProvider {
        fn new(
            name: &'static str,
            respond: impl Fn(usize) -> Result<ProviderRoute, ProviderError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                respond: Box::new(respond),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RouteProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_route(
            &self,
            _waypoints: &[Waypoint],
            _mode: TransportMode,
            token: &RequestToken,
        ) -> Result<ProviderRoute, ProviderError> {
            token.check()?;
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.respond)(n)
        }
    }

    fn sample_route() -> ProviderRoute {
        ProviderRoute {
            coordinates: vec![Waypoint::new(27.559, 53.9006), Waypoint::new(27.57, 53.91)],
            distance_meters: 1500.0,
            duration_seconds: Some(120.0),
        }
    }

    fn waypoints() -> Vec<Waypoint> {
        vec![Waypoint::new(27.559, 53.9006), Waypoint::new(27.57, 53.91)]
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let provider = ScriptedProvider::new("flaky", |n| {
            if n < 2 {
                Err(ProviderError::Network("connection reset".into()))
            } else {
                Ok(sample_route())
            }
        });
        let steps = vec![ChainStep {
            provider: provider.clone(),
            policy: RetryPolicy::transient(
                3,
                vec![Duration::from_secs(1), Duration::from_secs(2)],
            ),
        }];

        let result = run_chain(&steps, &waypoints(), TransportMode::Car, &RequestToken::detached())
            .await;

        assert_eq!(result.unwrap(), sample_route());
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_on_terminal_error() {
        let provider = ScriptedProvider::new("denied", |_| Err(ProviderError::Forbidden));
        let steps = vec![ChainStep {
            provider: provider.clone(),
            policy: RetryPolicy::transient(3, vec![Duration::from_secs(1)]),
        }];

        let result = run_chain(&steps, &waypoints(), TransportMode::Car, &RequestToken::detached())
            .await;

        assert!(matches!(result, Err(ProviderError::Forbidden)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_through_and_reports_last_error() {
        let first = ScriptedProvider::new("first", |_| Err(ProviderError::Network("down".into())));
        let second = ScriptedProvider::new("second", |_| Err(ProviderError::EmptyRoute));
        let steps = vec![
            ChainStep {
                provider: first.clone(),
                policy: RetryPolicy::transient(2, vec![Duration::from_secs(1)]),
            },
            ChainStep {
                provider: second.clone(),
                policy: RetryPolicy::single(),
            },
        ];

        let result = run_chain(&steps, &waypoints(), TransportMode::Car, &RequestToken::detached())
            .await;

        assert!(matches!(result, Err(ProviderError::EmptyRoute)));
        assert_eq!(first.calls(), 2);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_step_recovers() {
        let first = ScriptedProvider::new("first", |_| Err(ProviderError::RateLimited));
        let second = ScriptedProvider::new("second", |_| Ok(sample_route()));
        let steps = vec![
            ChainStep {
                provider: first,
                policy: RetryPolicy::single(),
            },
            ChainStep {
                provider: second,
                policy: RetryPolicy::single(),
            },
        ];

        let result = run_chain(&steps, &waypoints(), TransportMode::Car, &RequestToken::detached())
            .await;
        assert_eq!(result.unwrap(), sample_route());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_short_circuits_chain() {
        let latest = Arc::new(AtomicU64::new(1));
        let stale = RequestToken::new(0, latest);

        let provider = ScriptedProvider::new("never", |_| Ok(sample_route()));
        let steps = vec![
            ChainStep {
                provider: provider.clone(),
                policy: RetryPolicy::single(),
            },
            ChainStep {
                provider: provider.clone(),
                policy: RetryPolicy::single(),
            },
        ];

        let result = run_chain(&steps, &waypoints(), TransportMode::Car, &stale).await;

        assert!(matches!(result, Err(ProviderError::Cancelled)));
        assert_eq!(provider.calls(), 0);
    }
}
