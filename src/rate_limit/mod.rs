//! Distributed fixed-window rate limiting.
//!
//! # Algorithm
//!
//! Each `scope:identifier` pair owns a counter in a [`QuotaStore`] that lives
//! for exactly one window. An acquire atomically checks the counter against the
//! limit and increments it only when there is capacity left, so:
//!
//! - the counter never exceeds the limit
//! - exhausted requests are rejected without touching the counter
//! - for `N` capacity and `M > N` concurrent callers, exactly `N` are admitted
//!
//! # Stores
//!
//! - [`RedisStore`]: shared by every instance; correct across processes
//! - [`MemoryStore`]: single process only; for local runs and tests
//!
//! # Failure Policy
//!
//! Store errors and timeouts are returned as [`RateLimitError`]. The HTTP
//! layer fails closed on them (500) rather than admitting traffic unchecked
//! during a store outage.

mod error;
mod limiter;
mod rate;
mod redis_store;
mod store;

pub use error::{RateLimitError, StoreError};
pub use limiter::{DEFAULT_STORE_TIMEOUT, RateLimiter};
pub use rate::{Decision, Rate};
pub use redis_store::RedisStore;
pub use store::{MemoryStore, QuotaStore, WindowState};

use std::sync::Arc;

/// URL scheme selecting the in-process store.
pub const MEMORY_STORE_URL: &str = "memory://";

/// Open the quota store named by `url`.
///
/// `memory://` selects [`MemoryStore`]; anything else is handed to Redis.
pub async fn connect_store(url: &str) -> Result<Arc<dyn QuotaStore>, StoreError> {
    if url == MEMORY_STORE_URL {
        tracing::warn!("Using in-process rate limit store; quotas are not shared between instances");
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(RedisStore::connect(url).await?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory_store() {
        let store = connect_store(MEMORY_STORE_URL).await.unwrap();
        assert_eq!(store.backend(), "memory");
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        assert!(connect_store("not a store url").await.is_err());
    }
}
