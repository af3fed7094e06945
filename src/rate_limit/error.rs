use std::time::Duration;

use thiserror::Error;

/// Failures talking to the shared quota store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store unreachable or the command failed.
    #[error("Quota store unavailable: {0}")]
    Unavailable(String),

    /// Store answered with something we cannot interpret.
    #[error("Unexpected quota store reply: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.kind() == redis::ErrorKind::TypeError {
            StoreError::Protocol(err.to_string())
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

/// Errors returned by the rate limiter.
///
/// `ZeroLimit` and `ZeroPeriod` are construction errors and carry no data, so
/// they are cheap to match on. Store failures are operational faults and must
/// be surfaced separately from a quota rejection.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Limit must be greater than zero.
    #[error("rate limit must be greater than 0; disable the limiter instead")]
    ZeroLimit,

    /// Window length must be greater than zero.
    #[error("rate limit period must be greater than 0")]
    ZeroPeriod,

    /// The shared store could not be reached.
    #[error("rate limit store unavailable")]
    StoreUnavailable(#[source] StoreError),

    /// The store round trip did not finish in time.
    #[error("rate limit store timed out after {0:?}")]
    StoreTimeout(Duration),
}

impl RateLimitError {
    /// Whether this is an operational store fault (as opposed to bad configuration).
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            RateLimitError::StoreUnavailable(_) | RateLimitError::StoreTimeout(_)
        )
    }
}

impl From<StoreError> for RateLimitError {
    fn from(err: StoreError) -> Self {
        RateLimitError::StoreUnavailable(err)
    }
}
