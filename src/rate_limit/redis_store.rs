//! Redis-backed quota store shared by every server instance.
//!
//! The acquire step runs as one Lua script, so Redis executes the read,
//! compare, increment and expiry as a single unit regardless of how many
//! processes call it concurrently. Keys expire with their window, so
//! exhausted buckets clean themselves up.

use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::error::StoreError;
use super::store::{QuotaStore, WindowState};

/// Fixed-window acquire.
///
/// KEYS[1] = bucket key, ARGV[1] = limit, ARGV[2] = window in milliseconds.
/// Returns `{admitted, count, ttl_ms}`. A key without a TTL (left over from a
/// manual write) is given one so it cannot pin the bucket shut forever.
const ACQUIRE_SCRIPT: &str = r#"
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local current = tonumber(redis.call('GET', KEYS[1]) or '0')

if current >= limit then
  local ttl = redis.call('PTTL', KEYS[1])
  if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], window)
    ttl = window
  end
  return {0, current, ttl}
end

current = redis.call('INCR', KEYS[1])
if current == 1 then
  redis.call('PEXPIRE', KEYS[1], window)
end

local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], window)
  ttl = window
end
return {1, current, ttl}
"#;

/// Quota store backed by a Redis server.
///
/// Cloning is cheap; clones share the multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    script: Script,
}

impl RedisStore {
    /// Connect to the Redis server at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// `StoreError::Unavailable` if the URL is invalid or the server cannot be
    /// reached.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        info!(backend = "redis", "Connected to rate limit store");

        Ok(Self {
            connection,
            script: Script::new(ACQUIRE_SCRIPT),
        })
    }
}

#[async_trait]
impl QuotaStore for RedisStore {
    async fn acquire(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowState, StoreError> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut connection = self.connection.clone();

        let reply: Vec<i64> = self
            .script
            .key(key)
            .arg(limit)
            .arg(window_ms)
            .invoke_async(&mut connection)
            .await?;

        let state = parse_reply(&reply)?;
        debug!(key, admitted = state.admitted, count = state.count, "Quota acquire");
        Ok(state)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

fn parse_reply(reply: &[i64]) -> Result<WindowState, StoreError> {
    let [admitted, count, ttl_ms] = reply else {
        return Err(StoreError::Protocol(format!(
            "expected 3 elements, got {}",
            reply.len()
        )));
    };

    let count = u32::try_from(*count)
        .map_err(|_| StoreError::Protocol(format!("counter out of range: {count}")))?;

    Ok(WindowState {
        admitted: *admitted == 1,
        count,
        reset_after: Duration::from_millis(u64::try_from(*ttl_ms).unwrap_or(0)),
    })
}
