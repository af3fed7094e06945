use std::num::NonZeroU32;
use std::time::Duration;

use super::error::RateLimitError;

/// A quota of `limit` requests per fixed `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    limit: NonZeroU32,
    period: Duration,
}

impl Rate {
    /// # Errors
    ///
    /// `ZeroLimit` if `limit` is 0, `ZeroPeriod` if `period` is zero.
    pub fn new(limit: u32, period: Duration) -> Result<Self, RateLimitError> {
        let limit = NonZeroU32::new(limit).ok_or(RateLimitError::ZeroLimit)?;
        if period.is_zero() {
            return Err(RateLimitError::ZeroPeriod);
        }
        Ok(Self { limit, period })
    }

    pub const fn per_second(limit: NonZeroU32) -> Self {
        Self {
            limit,
            period: Duration::from_secs(1),
        }
    }

    pub const fn per_minute(limit: NonZeroU32) -> Self {
        Self {
            limit,
            period: Duration::from_secs(60),
        }
    }

    pub const fn per_hour(limit: NonZeroU32) -> Self {
        Self {
            limit,
            period: Duration::from_secs(60 * 60),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit.get()
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Quota for the window.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Time until the window's quota replenishes.
    pub reset_after: Duration,
}

impl Decision {
    /// Whole seconds until reset, rounded up so clients never retry early.
    pub fn reset_after_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}
