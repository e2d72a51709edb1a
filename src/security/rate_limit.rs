//! Fixed-window rate limiting keyed by caller.
//!
//! # Responsibilities
//! - Count requests per caller key within a fixed window
//! - Decide admit/reject and report remaining quota
//! - Evict counters whose window has lapsed
//!
//! # Design Decisions
//! - Fixed windows: the counter resets at rollover instead of decaying, so
//!   state per key is O(1)
//! - Storage sits behind [`CounterStore`]; increment-then-read must be atomic
//!   per key, which the in-memory store gets from the map's entry guard
//! - Store failures admit the request (availability over strictness)

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::LimitConfig;
use crate::observability::metrics;

/// At most `max` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub max: u32,
    pub window: Duration,
}

impl Limit {
    pub fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }
}

impl From<LimitConfig> for Limit {
    fn from(config: LimitConfig) -> Self {
        Self::new(config.max, config.window())
    }
}

/// Counter key: `<namespace>:<subject>`, e.g. `kb:1.2.3.4`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn new(namespace: &str, subject: impl fmt::Display) -> Self {
        Self(format!("{namespace}:{subject}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        namespace_of(&self.0)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RateLimitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn namespace_of(key: &str) -> &str {
    key.split_once(':').map(|(ns, _)| ns).unwrap_or(key)
}

/// Snapshot of one key's counter after an increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub key: String,
    pub count: u64,
    pub window_start: Instant,
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Time until the current window rolls over.
    pub reset_after: Duration,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Shared per-key counters.
///
/// `increment` must be atomic per key: two concurrent calls for the same key
/// must observe distinct counts.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one request for `key`, opening a fresh window if none exists or
    /// the current one has expired.
    async fn increment(&self, key: &str, window: Duration) -> Result<RateLimitRecord, StoreError>;

    /// Drop records whose window has expired. Returns how many were removed.
    async fn sweep(&self) -> usize;

    /// Number of keys currently tracked.
    fn len(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    window_start: Instant,
    window: Duration,
}

impl Counter {
    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window
    }
}

/// Single-process counter store.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<RateLimitRecord, StoreError> {
        let now = Instant::now();
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            window_start: now,
            window,
        });
        let counter = entry.value_mut();

        if counter.count == 0 || counter.expired(now) {
            counter.count = 1;
            counter.window_start = now;
            counter.window = window;
        } else {
            counter.count += 1;
        }

        Ok(RateLimitRecord {
            key: key.to_string(),
            count: counter.count,
            window_start: counter.window_start,
        })
    }

    async fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.expired(now));
        before.saturating_sub(self.counters.len())
    }

    fn len(&self) -> usize {
        self.counters.len()
    }
}

/// Admission control over a [`CounterStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    enabled: bool,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("enabled", &self.enabled)
            .field("tracked_keys", &self.store.len())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            enabled: true,
        }
    }

    /// Limiter backed by a fresh [`MemoryCounterStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCounterStore::new()))
    }

    /// A disabled limiter admits everything without touching the store.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }

    /// Count a request for `key` and decide whether it is admitted.
    pub async fn check(&self, key: impl AsRef<str>, limit: &Limit) -> RateLimitDecision {
        let key = key.as_ref();
        if !self.enabled {
            return RateLimitDecision {
                allowed: true,
                remaining: limit.max,
                reset_after: limit.window,
            };
        }

        let record = match self.store.increment(key, limit.window).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Counter store failed, admitting request");
                return RateLimitDecision {
                    allowed: true,
                    remaining: limit.max,
                    reset_after: limit.window,
                };
            }
        };

        let decision = decide(&record, limit, Instant::now());
        if !decision.allowed {
            tracing::warn!(
                key = %key,
                count = record.count,
                max = limit.max,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(namespace_of(key));
        }
        decision
    }

    /// Evict expired counters.
    pub async fn sweep(&self) -> usize {
        self.store.sweep().await
    }

    /// Periodically sweep until shutdown is signalled.
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = limiter.sweep().await;
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = limiter.tracked_keys(), "Swept expired rate limit counters");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Rate limit sweeper stopping");
                        break;
                    }
                }
            }
        })
    }
}

fn decide(record: &RateLimitRecord, limit: &Limit, now: Instant) -> RateLimitDecision {
    let max = u64::from(limit.max);
    let remaining = max.saturating_sub(record.count);
    let elapsed = now.saturating_duration_since(record.window_start);

    RateLimitDecision {
        allowed: record.count <= max,
        remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
        reset_after: limit.window.saturating_sub(elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb_limit() -> Limit {
        Limit::new(5, Duration::from_millis(60_000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_admits_then_rejects_then_resets() {
        let limiter = RateLimiter::in_memory();
        let limit = kb_limit();

        for i in 0..5 {
            let decision = limiter.check("kb:1.2.3.4", &limit).await;
            assert!(decision.allowed, "call {} should be admitted", i + 1);
            assert_eq!(decision.remaining, 4 - i);
        }

        let sixth = limiter.check("kb:1.2.3.4", &limit).await;
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);

        tokio::time::advance(Duration::from_secs(61)).await;

        let seventh = limiter.check("kb:1.2.3.4", &limit).await;
        assert!(seventh.allowed);
        assert_eq!(seventh.remaining, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_fixed_not_sliding() {
        let limiter = RateLimiter::in_memory();
        let limit = Limit::new(2, Duration::from_secs(10));

        assert!(limiter.check("k", &limit).await.allowed);
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(limiter.check("k", &limit).await.allowed);
        assert!(!limiter.check("k", &limit).await.allowed);

        // one second later the window that opened at t=0 rolls over
        tokio::time::advance(Duration::from_secs(1)).await;
        let decision = limiter.check("k", &limit).await;
        assert!(decision.allowed);
        assert_eq!(decision.reset_after, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::in_memory();
        let limit = Limit::new(1, Duration::from_secs(60));

        assert!(limiter.check("kb:1.1.1.1", &limit).await.allowed);
        assert!(!limiter.check("kb:1.1.1.1", &limit).await.allowed);
        assert!(limiter.check("kb:2.2.2.2", &limit).await.allowed);
        assert!(limiter.check("deploy:1.1.1.1", &limit).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_counts_down() {
        let limiter = RateLimiter::in_memory();
        let limit = Limit::new(1, Duration::from_secs(60));

        limiter.check("k", &limit).await;
        tokio::time::advance(Duration::from_secs(45)).await;
        let decision = limiter.check("k", &limit).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reset_after, Duration::from_secs(15));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_never_over_admit() {
        let limiter = RateLimiter::in_memory();
        let limit = Limit::new(10, Duration::from_secs(60));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..200 {
            let limiter = limiter.clone();
            tasks.spawn(async move { limiter.check("kb:9.9.9.9", &limit).await.allowed });
        }

        let mut admitted = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_expired() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(store.clone());

        limiter.check("short", &Limit::new(5, Duration::from_secs(1))).await;
        limiter.check("long", &Limit::new(5, Duration::from_secs(60))).await;
        assert_eq!(store.len(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(limiter.sweep().await, 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_stops_on_shutdown() {
        let limiter = RateLimiter::in_memory();
        limiter.check("k", &Limit::new(1, Duration::from_secs(1))).await;

        let (tx, rx) = broadcast::channel(1);
        let handle = limiter.spawn_sweeper(Duration::from_secs(5), rx);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(limiter.tracked_keys(), 0);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_limiter_admits_everything() {
        let limiter = RateLimiter::in_memory().with_enabled(false);
        let limit = Limit::new(1, Duration::from_secs(60));
        for _ in 0..10 {
            assert!(limiter.check("k", &limit).await.allowed);
        }
        assert_eq!(limiter.tracked_keys(), 0);
    }

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn increment(&self, _key: &str, _window: Duration) -> Result<RateLimitRecord, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn sweep(&self) -> usize {
            0
        }

        fn len(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn test_store_failure_admits() {
        let limiter = RateLimiter::new(Arc::new(FailingStore));
        let decision = limiter.check("k", &Limit::new(1, Duration::from_secs(1))).await;
        assert!(decision.allowed);
    }

    #[test]
    fn test_key_composition() {
        let key = RateLimitKey::new("kb", "1.2.3.4");
        assert_eq!(key.as_str(), "kb:1.2.3.4");
        assert_eq!(key.namespace(), "kb");
        assert_eq!(namespace_of("nocolon"), "nocolon");
        // IPv6 subjects keep their colons
        assert_eq!(RateLimitKey::new("kb", "::1").namespace(), "kb");
    }
}
