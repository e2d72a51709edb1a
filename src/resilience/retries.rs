//! Retry logic for outbound calls.
//!
//! # Responsibilities
//! - Decide whether an outcome is transient (network error, 5xx, 429)
//! - Drive attempts with exponential backoff between them
//! - Hand back the last response once attempts run out
//!
//! # Design Decisions
//! - The loop is an explicit state machine:
//!   Attempting → (Succeeded | Waiting → Attempting | Exhausted)
//! - Waiting is a timer await, so other tasks keep running
//! - A transient *response* on the final attempt is returned, not raised;
//!   only a network failure on the final attempt is an error
//! - No jitter by default: call volume is low and service-to-service

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::config::{RetryConfig, UpstreamConfig};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Classifies a response status as worth retrying.
pub type RetryPredicate = Arc<dyn Fn(StatusCode) -> bool + Send + Sync>;

/// Default predicate: any 5xx, or 429.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Bounds and timing for one retried call.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Option<Duration>,
    pub jitter: bool,
    retry_on: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: None,
            jitter: false,
            retry_on: Arc::new(is_transient_status),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_delay: config.max_delay_ms.map(Duration::from_millis),
            jitter: config.jitter,
            ..Self::new(config.max_retries, Duration::from_millis(config.base_delay_ms))
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the transient-status predicate.
    pub fn retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Arc::new(predicate);
        self
    }

    pub fn is_transient(&self, status: StatusCode) -> bool {
        (self.retry_on)(status)
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait after failed attempt `attempt` (1-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay, self.max_delay, self.jitter)
    }
}

/// Anything carrying an HTTP status.
pub trait HasStatus {
    fn status(&self) -> StatusCode;
}

impl HasStatus for StatusCode {
    fn status(&self) -> StatusCode {
        *self
    }
}

impl HasStatus for reqwest::Response {
    fn status(&self) -> StatusCode {
        reqwest::Response::status(self)
    }
}

/// Every attempt failed without producing a response.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {source}")]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    #[source]
    pub source: E,
}

enum RetryState<T, E> {
    Attempting { attempt: u32 },
    Waiting { attempt: u32, delay: Duration },
    Succeeded(T),
    Exhausted { attempts: u32, outcome: Result<T, E> },
}

/// Run `operation` under `policy`.
///
/// `operation` receives the 1-indexed attempt number.
pub async fn retry_with_policy<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryExhausted<E>>
where
    T: HasStatus,
    E: fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let total = policy.total_attempts();
    let mut state = RetryState::Attempting { attempt: 1 };

    loop {
        state = match state {
            RetryState::Attempting { attempt } => match operation(attempt).await {
                Ok(response) if !policy.is_transient(response.status()) => {
                    RetryState::Succeeded(response)
                }
                outcome if attempt >= total => RetryState::Exhausted {
                    attempts: attempt,
                    outcome,
                },
                Ok(response) => {
                    let delay = policy.delay_after(attempt);
                    tracing::info!(
                        attempt,
                        status = %response.status(),
                        delay = ?delay,
                        "Transient upstream status, retrying"
                    );
                    metrics::record_retry("status");
                    RetryState::Waiting { attempt, delay }
                }
                Err(e) => {
                    let delay = policy.delay_after(attempt);
                    tracing::info!(
                        attempt,
                        error = %e,
                        delay = ?delay,
                        "Upstream unreachable, retrying"
                    );
                    metrics::record_retry("network");
                    RetryState::Waiting { attempt, delay }
                }
            },
            RetryState::Waiting { attempt, delay } => {
                tokio::time::sleep(delay).await;
                RetryState::Attempting {
                    attempt: attempt + 1,
                }
            }
            RetryState::Succeeded(response) => return Ok(response),
            RetryState::Exhausted {
                attempts,
                outcome: Ok(response),
            } => {
                tracing::warn!(
                    attempts,
                    status = %response.status(),
                    "Retries exhausted, returning last response"
                );
                return Ok(response);
            }
            RetryState::Exhausted {
                attempts,
                outcome: Err(source),
            } => {
                tracing::warn!(attempts, error = %source, "Retries exhausted");
                return Err(RetryExhausted { attempts, source });
            }
        };
    }
}

/// Outbound call failure surfaced to callers.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream unreachable after {attempts} attempt(s): {source}")]
    Unreachable {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("request could not be replayed for attempt {attempt}")]
    RequestConsumed { attempt: u32 },
}

/// `reqwest` client that retries transient failures.
#[derive(Debug, Clone)]
pub struct RetryingHttpClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl RetryingHttpClient {
    pub fn new(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn from_config(
        upstream: &UpstreamConfig,
        retries: &RetryConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(upstream.request_timeout_secs))
            .user_agent(concat!("demo-edge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::new(client, RetryPolicy::from_config(retries)))
    }

    /// The wrapped client, for building requests.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// [`fetch_with_retry`](Self::fetch_with_retry) under the client's own policy.
    pub async fn fetch(&self, request: reqwest::Request) -> Result<reqwest::Response, FetchError> {
        self.fetch_with_retry(request, &self.policy).await
    }

    /// Send `request`, retrying transient outcomes under `policy`.
    ///
    /// A request whose body cannot be cloned is sent once.
    pub async fn fetch_with_retry(
        &self,
        request: reqwest::Request,
        policy: &RetryPolicy,
    ) -> Result<reqwest::Response, FetchError> {
        let single_shot;
        let policy = if request.try_clone().is_some() {
            policy
        } else {
            tracing::debug!(url = %request.url(), "Streaming body, sending without retries");
            single_shot = policy.clone().with_max_retries(0);
            &single_shot
        };

        let total = policy.total_attempts();
        let mut pending = Some(request);

        let result = retry_with_policy(policy, |attempt| {
            let next = if attempt < total {
                pending.as_ref().and_then(reqwest::Request::try_clone)
            } else {
                pending.take()
            };
            let client = self.client.clone();
            async move {
                let request = next.ok_or(FetchError::RequestConsumed { attempt })?;
                tracing::debug!(attempt, method = %request.method(), url = %request.url(), "Sending upstream request");
                client
                    .execute(request)
                    .await
                    .map_err(|source| FetchError::Unreachable {
                        attempts: attempt,
                        source,
                    })
            }
        })
        .await;

        result.map_err(|exhausted| exhausted.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, Error)]
    #[error("connection reset")]
    struct NetError;

    #[tokio::test(start_paused = true)]
    async fn test_always_transient_returns_last_response() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        let calls = AtomicU32::new(0);
        let mut stamps = Vec::new();
        let start = Instant::now();

        let result = retry_with_policy(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            stamps.push(Instant::now());
            async { Ok::<_, NetError>(StatusCode::SERVICE_UNAVAILABLE) }
        })
        .await;

        assert_eq!(result.unwrap(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_millis(7000));

        let gaps: Vec<_> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_retrying() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        let calls = AtomicU32::new(0);

        let result = retry_with_policy(&policy, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<_, NetError>(if attempt < 2 {
                    StatusCode::TOO_MANY_REQUESTS
                } else {
                    StatusCode::OK
                })
            }
        })
        .await;

        assert_eq!(result.unwrap(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_status_is_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = retry_with_policy(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, NetError>(StatusCode::NOT_FOUND) }
        })
        .await;

        assert_eq!(result.unwrap(), StatusCode::NOT_FOUND);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_on_last_attempt_is_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100));
        let calls = AtomicU32::new(0);

        let result = retry_with_policy(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<StatusCode, _>(NetError) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.to_string(), "gave up after 3 attempt(s): connection reset");
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_then_response() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        let result = retry_with_policy(&policy, |attempt| async move {
            match attempt {
                1 => Err(NetError),
                2 => Ok(StatusCode::BAD_GATEWAY),
                _ => Ok(StatusCode::CREATED),
            }
        })
        .await;

        assert_eq!(result.unwrap(), StatusCode::CREATED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_is_single_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_secs(10));
        let calls = AtomicU32::new(0);

        let result = retry_with_policy(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, NetError>(StatusCode::INTERNAL_SERVER_ERROR) }
        })
        .await;

        assert_eq!(result.unwrap(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100))
            .retry_on(|status| status == StatusCode::SERVICE_UNAVAILABLE);
        let calls = AtomicU32::new(0);

        let result = retry_with_policy(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, NetError>(StatusCode::INTERNAL_SERVER_ERROR) }
        })
        .await;

        assert_eq!(result.unwrap(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_builder_caps_delay_and_adds_jitter() {
        let capped = RetryPolicy::new(5, Duration::from_millis(1000))
            .with_max_delay(Duration::from_millis(3000));
        assert_eq!(capped.delay_after(2), Duration::from_millis(2000));
        assert_eq!(capped.delay_after(3), Duration::from_millis(3000));
        assert_eq!(capped.delay_after(5), Duration::from_millis(3000));

        let jittered = RetryPolicy::new(3, Duration::from_millis(1000)).with_jitter(true);
        for _ in 0..20 {
            let delay = jittered.delay_after(2);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(2200));
        }
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::OK));
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_retries: 2,
            base_delay_ms: 250,
            max_delay_ms: Some(400),
            jitter: false,
        });
        assert_eq!(policy.total_attempts(), 3);
        assert_eq!(policy.delay_after(1), Duration::from_millis(250));
        assert_eq!(policy.delay_after(2), Duration::from_millis(400));
    }
}
