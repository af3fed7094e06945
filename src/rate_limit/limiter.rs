use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, warn};

use super::error::RateLimitError;
use super::rate::{Decision, Rate};
use super::store::QuotaStore;
use crate::metrics;

/// Default upper bound on a single store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// Admission control per client identifier against a shared quota store.
///
/// The limiter itself is stateless; all counters live in the store, so any
/// number of instances pointing at the same store enforce one quota.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn QuotaStore>,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn QuotaStore>) -> Self {
        Self::with_timeout(store, DEFAULT_STORE_TIMEOUT)
    }

    /// Create a limiter whose store round trips are abandoned after `store_timeout`.
    pub fn with_timeout(store: Arc<dyn QuotaStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Build the bucket key for `scope` and `identifier`.
    pub fn bucket_key(scope: &str, identifier: &str) -> String {
        format!("{scope}:{identifier}")
    }

    /// Consume one request of `rate` for `identifier` within `scope`.
    ///
    /// Nothing is retried. On timeout the pending store future is dropped.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable` if the store call fails
    /// - `StoreTimeout` if it does not complete within the configured bound
    pub async fn allow(
        &self,
        scope: &str,
        identifier: &str,
        rate: Rate,
    ) -> Result<Decision, RateLimitError> {
        let key = Self::bucket_key(scope, identifier);
        let limit = rate.limit();
        let started = Instant::now();

        let result = tokio::time::timeout(
            self.store_timeout,
            self.store.acquire(&key, limit, rate.period()),
        )
        .await;
        metrics::record_store_duration(self.store.backend(), started.elapsed().as_secs_f64());

        let state = match result {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                error!(key = %key, backend = self.store.backend(), error = %e, "Rate limit store call failed");
                return Err(RateLimitError::StoreUnavailable(e));
            }
            Err(_) => {
                error!(
                    key = %key,
                    backend = self.store.backend(),
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "Rate limit store call timed out"
                );
                return Err(RateLimitError::StoreTimeout(self.store_timeout));
            }
        };

        if !state.admitted {
            warn!(key = %key, limit, "Rate limit quota exhausted");
        }

        Ok(Decision {
            allowed: state.admitted,
            limit,
            remaining: limit.saturating_sub(state.count),
            reset_after: state.reset_after,
        })
    }

    /// Check that the backing store is reachable within the timeout.
    pub async fn ping(&self) -> Result<(), RateLimitError> {
        match tokio::time::timeout(self.store_timeout, self.store.ping()).await {
            Ok(result) => result.map_err(RateLimitError::StoreUnavailable),
            Err(_) => Err(RateLimitError::StoreTimeout(self.store_timeout)),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Reclaim expired windows in stores that do not expire keys themselves.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::num::NonZeroU32;

    use async_trait::async_trait;

    use super::*;
    use crate::rate_limit::{MemoryStore, StoreError, WindowState};

    fn per_minute(n: u32) -> Rate {
        Rate::per_minute(NonZeroU32::new(n).unwrap())
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()))
    }

    /// Store that never answers.
    struct HangingStore;

    #[async_trait]
    impl QuotaStore for HangingStore {
        async fn acquire(
            &self,
            _key: &str,
            _limit: u32,
            _window: Duration,
        ) -> Result<WindowState, StoreError> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            std::future::pending().await
        }

        fn backend(&self) -> &'static str {
            "hanging"
        }
    }

    /// Store that always fails.
    struct DownStore;

    #[async_trait]
    impl QuotaStore for DownStore {
        async fn acquire(
            &self,
            _key: &str,
            _limit: u32,
            _window: Duration,
        ) -> Result<WindowState, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn backend(&self) -> &'static str {
            "down"
        }
    }

    #[test]
    fn test_bucket_key() {
        assert_eq!(
            RateLimiter::bucket_key("ipRateLimit", "10.0.0.1"),
            "ipRateLimit:10.0.0.1"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixty_per_minute_sequential() {
        let limiter = limiter();
        let rate = per_minute(60);

        for i in 0..60 {
            let decision = limiter.allow("ipRateLimit", "1.2.3.4", rate).await.unwrap();
            assert!(decision.allowed, "request {} should be allowed", i + 1);
            assert_eq!(decision.remaining, 59 - i);
        }

        let decision = limiter.allow("ipRateLimit", "1.2.3.4", rate).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.limit, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_monotonic_and_non_negative() {
        let limiter = limiter();
        let rate = per_minute(5);
        let mut last = u32::MAX;

        for _ in 0..20 {
            let decision = limiter.allow("scope", "client", rate).await.unwrap();
            assert!(decision.remaining <= last);
            last = decision.remaining;
        }
        assert_eq!(last, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_replenishes_after_window() {
        let limiter = limiter();
        let rate = per_minute(1);

        assert!(limiter.allow("s", "c", rate).await.unwrap().allowed);
        let denied = limiter.allow("s", "c", rate).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.reset_after <= Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(limiter.allow("s", "c", rate).await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scopes_isolate_buckets() {
        let limiter = limiter();
        let rate = per_minute(1);

        assert!(limiter.allow("ipRateLimit", "c", rate).await.unwrap().allowed);
        assert!(limiter.allow("loginRateLimit", "c", rate).await.unwrap().allowed);
        assert!(!limiter.allow("ipRateLimit", "c", rate).await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_reclaims_windows() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone());
        let rate = Rate::new(1, Duration::from_secs(1)).unwrap();

        for i in 0..1000 {
            limiter.allow("ipRateLimit", &format!("client-{i}"), rate).await.unwrap();
        }
        assert_eq!(store.len(), 1000);

        tokio::time::advance(Duration::from_millis(1100)).await;
        limiter.allow("ipRateLimit", "late", rate).await.unwrap();

        assert_eq!(limiter.purge_expired(), 1000);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_allows_never_overshoot() {
        let limiter = limiter();
        let rate = per_minute(25);

        let handles: Vec<_> = (0..200)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.allow("scope", "hot-key", rate).await })
            })
            .collect();

        let mut allowed = 0;
        let mut denied = 0;
        for handle in handles {
            let decision = handle.await.unwrap().unwrap();
            if decision.allowed {
                allowed += 1;
            } else {
                assert_eq!(decision.remaining, 0);
                denied += 1;
            }
        }

        assert_eq!(allowed, 25);
        assert_eq!(denied, 175);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout() {
        let limiter = RateLimiter::with_timeout(Arc::new(HangingStore), Duration::from_millis(50));

        let result = limiter.allow("s", "c", per_minute(10)).await;
        assert!(matches!(result, Err(RateLimitError::StoreTimeout(_))));

        let result = limiter.ping().await;
        assert!(matches!(result, Err(RateLimitError::StoreTimeout(_))));
    }

    #[tokio::test]
    async fn test_store_unavailable() {
        let limiter = RateLimiter::new(Arc::new(DownStore));

        let result = limiter.allow("s", "c", per_minute(10)).await;
        assert!(matches!(result, Err(RateLimitError::StoreUnavailable(_))));
        assert!(limiter.ping().await.is_err());
    }
}
