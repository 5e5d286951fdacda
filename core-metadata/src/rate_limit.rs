//! Per-provider request throttling
//!
//! Two implementations share the [`RateLimiter`] contract:
//!
//! - [`TokenBucketLimiter`] keeps its budget in process memory.
//! - [`SlidingWindowLimiter`] admits requests through a [`WindowCounterStore`]
//!   shared with other processes, and falls back to a local bucket whenever
//!   that store fails.
//!
//! `acquire()` never rejects. It waits until a slot is available.

use async_trait::async_trait;
use bridge_traits::storage::{Admission, WindowCounterStore};
use bridge_traits::time::Clock;
use core_runtime::config::RateLimitSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait for a request slot.
    async fn acquire(&self);
}

/// Where admission state lives
#[derive(Clone, Default)]
pub enum RateLimitBackend {
    /// In-process token buckets only
    #[default]
    Local,
    /// Sliding windows in a store shared by every process of the deployment
    Shared(Arc<dyn WindowCounterStore>),
}

impl std::fmt::Debug for RateLimitBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitBackend::Local => f.write_str("Local"),
            RateLimitBackend::Shared(_) => f.write_str("Shared"),
        }
    }
}

/// Builds the limiter for one provider according to the backend.
pub fn limiter_for(
    provider: &str,
    settings: &RateLimitSettings,
    backend: &RateLimitBackend,
    clock: Arc<dyn Clock>,
) -> Arc<dyn RateLimiter> {
    match backend {
        RateLimitBackend::Local => Arc::new(TokenBucketLimiter::new(
            settings.max_requests,
            settings.window(),
        )),
        RateLimitBackend::Shared(store) => Arc::new(SlidingWindowLimiter::new(
            provider,
            settings.max_requests,
            settings.window(),
            Arc::clone(store),
            clock,
        )),
    }
}

/// `max_tokens` requests per `window`, refilled in full at each window
/// boundary.
pub struct TokenBucketLimiter {
    max_tokens: u32,
    window: Duration,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: u32,
    refilled_at: Instant,
}

impl TokenBucketLimiter {
    pub fn new(max_tokens: u32, window: Duration) -> Self {
        let max_tokens = max_tokens.max(1);
        Self {
            max_tokens,
            window: window.max(Duration::from_millis(1)),
            bucket: Mutex::new(Bucket {
                tokens: max_tokens,
                refilled_at: Instant::now(),
            }),
        }
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.refilled_at);
        if elapsed < self.window {
            return;
        }
        let periods = (elapsed.as_nanos() / self.window.as_nanos()).min(u128::from(u32::MAX)) as u32;
        bucket.refilled_at += self.window * periods;
        bucket.tokens = self.max_tokens;
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn acquire(&self) {
        // The lock is held while sleeping so waiters are served in arrival order.
        let mut bucket = self.bucket.lock().await;
        loop {
            self.refill(&mut bucket, Instant::now());
            if bucket.tokens > 0 {
                bucket.tokens -= 1;
                return;
            }
            let next_refill = bucket.refilled_at + self.window;
            debug!(
                wait_ms = next_refill
                    .saturating_duration_since(Instant::now())
                    .as_millis() as u64,
                "Token bucket empty, waiting for refill"
            );
            sleep_until(next_refill).await;
        }
    }
}

/// Sliding-window admission through a shared store, keyed by provider.
pub struct SlidingWindowLimiter {
    provider: String,
    key: String,
    max_requests: u32,
    window: Duration,
    store: Arc<dyn WindowCounterStore>,
    clock: Arc<dyn Clock>,
    fallback: TokenBucketLimiter,
}

impl SlidingWindowLimiter {
    pub fn new(
        provider: &str,
        max_requests: u32,
        window: Duration,
        store: Arc<dyn WindowCounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            key: format!("ratelimit:{provider}"),
            max_requests: max_requests.max(1),
            window: window.max(Duration::from_millis(1)),
            store,
            clock,
            fallback: TokenBucketLimiter::new(max_requests, window),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn acquire(&self) {
        let window_ms = self.window.as_millis() as i64;
        loop {
            let now_ms = self.clock.unix_timestamp_millis();
            let member = format!("{now_ms}-{}", Uuid::new_v4());

            match self
                .store
                .try_admit(&self.key, &member, now_ms, window_ms, self.max_requests)
                .await
            {
                Ok(Admission::Admitted) => return,
                Ok(Admission::Full { oldest_ms }) => {
                    let wait_ms = (oldest_ms + window_ms - now_ms).max(1) as u64;
                    debug!(
                        provider = %self.provider,
                        wait_ms,
                        "Shared rate-limit window full"
                    );
                    sleep(Duration::from_millis(wait_ms)).await;
                }
                Err(e) => {
                    warn!(
                        provider = %self.provider,
                        error = %e,
                        "Shared rate-limit store failed, using local bucket"
                    );
                    self.fallback.acquire().await;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wall clock driven by tokio's (pausable) clock.
    struct TokioClock {
        base: DateTime<Utc>,
        started: Instant,
    }

    impl TokioClock {
        fn new() -> Self {
            Self {
                base: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                started: Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = Instant::now().duration_since(self.started);
            self.base + chrono::Duration::from_std(elapsed).unwrap()
        }
    }

    #[derive(Default)]
    struct MemoryWindowStore {
        windows: std::sync::Mutex<HashMap<String, Vec<i64>>>,
    }

    #[async_trait]
    impl WindowCounterStore for MemoryWindowStore {
        async fn try_admit(
            &self,
            key: &str,
            _member: &str,
            now_ms: i64,
            window_ms: i64,
            limit: u32,
        ) -> BridgeResult<Admission> {
            let mut windows = self.windows.lock().unwrap();
            let entries = windows.entry(key.to_string()).or_default();
            entries.retain(|at| *at > now_ms - window_ms);
            if entries.len() < limit as usize {
                entries.push(now_ms);
                Ok(Admission::Admitted)
            } else {
                Ok(Admission::Full {
                    oldest_ms: *entries.iter().min().unwrap(),
                })
            }
        }

        async fn clear(&self, key: &str) -> BridgeResult<()> {
            self.windows.lock().unwrap().remove(key);
            Ok(())
        }
    }

    struct BrokenStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WindowCounterStore for BrokenStore {
        async fn try_admit(&self, _: &str, _: &str, _: i64, _: i64, _: u32) -> BridgeResult<Admission> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BridgeError::Storage("connection refused".to_string()))
        }

        async fn clear(&self, _: &str) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn ceil_div(n: u32, d: u32) -> u32 {
        (n + d - 1) / d
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_first_window_is_immediate() {
        let limiter = TokenBucketLimiter::new(5, Duration::from_millis(1000));
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_spreads_requests_over_windows() {
        let max = 2;
        let window = Duration::from_millis(500);
        let n = 7;
        let limiter = TokenBucketLimiter::new(max, window);
        let start = Instant::now();

        for _ in 0..n {
            limiter.acquire().await;
        }

        let expected = window * (ceil_div(n, max) - 1);
        assert!(start.elapsed() >= expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_concurrent_acquire() {
        let limiter = Arc::new(TokenBucketLimiter::new(1, Duration::from_millis(1000)));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_waits_for_oldest_entry() {
        let store = Arc::new(MemoryWindowStore::default());
        let limiter = SlidingWindowLimiter::new(
            "musicbrainz",
            1,
            Duration::from_millis(1000),
            store.clone(),
            Arc::new(TokioClock::new()),
        );
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(2000));
        assert_eq!(limiter.key(), "ratelimit:musicbrainz");
        assert_eq!(store.windows.lock().unwrap()["ratelimit:musicbrainz"].len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_falls_back_to_local_bucket() {
        let store = Arc::new(BrokenStore {
            calls: AtomicUsize::new(0),
        });
        let limiter = SlidingWindowLimiter::new(
            "discogs",
            2,
            Duration::from_millis(1000),
            store.clone(),
            Arc::new(TokioClock::new()),
        );
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[test]
    fn test_limiter_for_selects_backend() {
        let settings = RateLimitSettings {
            max_requests: 5,
            window_ms: 1000,
        };
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());

        // Only checks construction; behaviour is covered above.
        let _local = limiter_for("tidal", &settings, &RateLimitBackend::Local, clock.clone());
        let shared = RateLimitBackend::Shared(Arc::new(MemoryWindowStore::default()));
        let _shared = limiter_for("tidal", &settings, &shared, clock);
        assert_eq!(format!("{:?}", shared), "Shared");
    }
}
