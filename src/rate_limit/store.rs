//! Quota store abstraction and the in-process implementation.
//!
//! A store owns one counter per key. [`QuotaStore::acquire`] must be a single
//! indivisible operation: read the counter, reject if it has reached the
//! limit, otherwise increment it and start the window when the key is new.
//! Splitting this into read-then-write lets two concurrent callers both see
//! spare capacity and overshoot the limit.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::error::StoreError;

/// Result of one atomic acquire against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Whether a unit of quota was consumed.
    pub admitted: bool,
    /// Counter value after the operation; never greater than the limit.
    pub count: u32,
    /// Remaining lifetime of the window.
    pub reset_after: Duration,
}

/// Shared counter store backing the rate limiter.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Atomically consume one unit of `limit` for `key` in a window of `window`.
    async fn acquire(&self, key: &str, limit: u32, window: Duration)
    -> Result<WindowState, StoreError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Drop windows that have already expired, returning how many went.
    ///
    /// Stores whose keys expire on their own (Redis TTLs) keep the default.
    fn purge_expired(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    expires_at: Instant,
}

/// In-process quota store.
///
/// Atomic across tasks in one process only. Use it for single-instance
/// deployments and tests; multi-instance deployments need a shared store such
/// as [`RedisStore`](super::RedisStore).
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, Window>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys (including not yet purged expired ones).
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn acquire(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowState, StoreError> {
        let now = Instant::now();

        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            expires_at: now + window,
        });

        if entry.expires_at <= now {
            *entry = Window {
                count: 0,
                expires_at: now + window,
            };
        }

        let admitted = entry.count < limit;
        if admitted {
            entry.count += 1;
        }

        Ok(WindowState {
            admitted,
            count: entry.count,
            reset_after: entry.expires_at.saturating_duration_since(now),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| w.expires_at > now);
        before.saturating_sub(self.windows.len())
    }
}
