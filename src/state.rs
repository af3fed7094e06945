//! Shared application state for Axum handlers.
//!
//! Holds the pipeline components, built once from explicit settings and
//! shared by every request:
//!
//! - **Authenticator**: [`TokenAuthenticator`] for issuing and verifying credentials
//! - **Limiter**: [`RateLimiter`] over the configured quota store (absent when
//!   rate limiting is disabled)
//! - **Failure limiter**: [`AuthFailureLimiter`] shared by the auth layer and
//!   the refresh handler (absent when `AUTH_FAILURE_LIMIT_PER_MINUTE=0`)
//!
//! # Structured Concurrency
//!
//! A maintenance task runs every `HEALTH_CHECK_INTERVAL_SECS`: it pings the
//! quota store, purges expired in-process windows and prunes idle clients from
//! the failure limiter. It is managed by a `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop it before application exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::auth::TokenAuthenticator;
use crate::config::Config;
use crate::metrics;
use crate::middleware::{AuthFailureLimiter, TrustedProxyConfig};
use crate::rate_limit::RateLimiter;

/// Shared application state for Axum handlers.
///
/// Cloned per request; everything inside is reference counted.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config, authenticator, Some(limiter));
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Credential issuer and verifier
    pub authenticator: Arc<TokenAuthenticator>,
    /// Rate limiter, `None` when rate limiting is disabled
    pub limiter: Option<RateLimiter>,
    /// Failed-attempt counter per client IP, `None` when disabled
    pub failure_limiter: Option<Arc<AuthFailureLimiter>>,
    /// Peers allowed to supply `X-Forwarded-For`
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Last result of the background store ping
    store_up: Arc<AtomicBool>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create the state and start the maintenance task.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        config: Config,
        authenticator: Arc<TokenAuthenticator>,
        limiter: Option<RateLimiter>,
    ) -> Self {
        let failure_limiter =
            AuthFailureLimiter::per_minute(config.auth_failure_limit_per_minute).map(Arc::new);
        let trusted_proxies = Arc::new(TrustedProxyConfig::new(&config.trusted_proxies));

        let state = Self {
            config: Arc::new(config),
            authenticator,
            limiter,
            failure_limiter,
            trusted_proxies,
            started_at: Instant::now(),
            store_up: Arc::new(AtomicBool::new(true)),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        if state.limiter.is_some() || state.failure_limiter.is_some() {
            state.spawn_maintenance_task();
        }

        state
    }

    /// Whether the last store health check succeeded.
    ///
    /// Always `true` when rate limiting is disabled.
    pub fn store_reachable(&self) -> bool {
        self.store_up.load(Ordering::Relaxed)
    }

    /// Backend name of the quota store, or "disabled".
    pub fn store_backend(&self) -> &'static str {
        self.limiter.as_ref().map_or("disabled", RateLimiter::backend)
    }

    /// Spawn the periodic maintenance task.
    ///
    /// The first tick happens immediately so readiness reflects reality
    /// from the start.
    fn spawn_maintenance_task(&self) {
        let limiter = self.limiter.clone();
        let failure_limiter = self.failure_limiter.clone();
        let store_up = self.store_up.clone();
        let interval_duration = self.config.health_check_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(interval_duration);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Maintenance task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Some(limiter) = &limiter {
                            check_store(limiter, &store_up).await;
                            let purged = limiter.purge_expired();
                            if purged > 0 {
                                debug!(purged, "Purged expired rate limit windows");
                            }
                        }
                        if let Some(failure_limiter) = &failure_limiter {
                            failure_limiter.prune();
                            trace!(tracked = failure_limiter.len(), "Pruned auth failure limiter");
                        }
                    }
                }
            }

            debug!("Maintenance task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// Cancels the tasks, closes the tracker and waits for them to finish.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

async fn check_store(limiter: &RateLimiter, store_up: &AtomicBool) {
    let up = match limiter.ping().await {
        Ok(()) => {
            trace!(backend = limiter.backend(), "Health check: store OK");
            true
        }
        Err(e) => {
            warn!(backend = limiter.backend(), error = %e, "Health check: store is down");
            false
        }
    };

    let was_up = store_up.swap(up, Ordering::Relaxed);
    if up && !was_up {
        info!(backend = limiter.backend(), "Health check: store recovered");
    }
    metrics::set_store_status(up);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::JwtSettings;
    use crate::rate_limit::{MemoryStore, QuotaStore, Rate, StoreError, WindowState};
    use async_trait::async_trait;
    use std::time::Duration;

    struct DownStore;

    #[async_trait]
    impl QuotaStore for DownStore {
        async fn acquire(
            &self,
            _key: &str,
            _limit: u32,
            _window: Duration,
        ) -> Result<WindowState, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        fn backend(&self) -> &'static str {
            "down"
        }
    }

    fn authenticator() -> Arc<TokenAuthenticator> {
        Arc::new(TokenAuthenticator::new(JwtSettings::new("test-issuer", "test-key")).unwrap())
    }

    #[tokio::test]
    async fn test_without_limiter() {
        let state = AppState::new(Config::default(), authenticator(), None);

        assert_eq!(state.store_backend(), "disabled");
        assert!(state.store_reachable());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_task_marks_store_down() {
        let limiter = RateLimiter::new(Arc::new(DownStore));
        let state = AppState::new(Config::default(), authenticator(), Some(limiter));

        // The first ping runs immediately
        tokio::time::timeout(Duration::from_secs(1), async {
            while state.store_reachable() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("store should be marked down");

        assert_eq!(state.store_backend(), "down");
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_health_task() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let state = AppState::new(Config::default(), authenticator(), Some(limiter));

        tokio::time::timeout(Duration::from_secs(1), state.shutdown())
            .await
            .expect("shutdown should complete");
        assert!(state.store_reachable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_purges_expired_windows() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone());
        let rate = Rate::new(1, Duration::from_secs(1)).unwrap();
        for i in 0..1000 {
            limiter.allow("ipRateLimit", &format!("client-{i}"), rate).await.unwrap();
        }

        let config = Config {
            health_check_interval: Duration::from_secs(1),
            ..Config::default()
        };
        let state = AppState::new(config, authenticator(), Some(limiter));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        for _ in 0..100 {
            if store.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(store.is_empty(), "{} windows left after expiry", store.len());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_limiter_follows_config() {
        let state = AppState::new(Config::default(), authenticator(), None);
        assert!(state.failure_limiter.is_some());
        state.shutdown().await;

        let config = Config {
            auth_failure_limit_per_minute: 0,
            ..Config::default()
        };
        let state = AppState::new(config, authenticator(), None);
        assert!(state.failure_limiter.is_none());
        state.shutdown().await;
    }
}
