//! HTTP middleware for authentication, rate limiting, and observability.
//!
//! - **Rate Limiting**: Per-client fixed window quotas in a shared store
//! - **Bearer Authentication**: Signed credential verification with uniform 401s
//! - **Request ID**: Generation and propagation for correlation
//! - **Trusted Proxy Validation**: CIDR-based client IP resolution
//!
//! # Architecture
//!
//! ```text
//! Request → Request ID → Rate Limiter → Auth → Handler → Response
//!                             ↓           ↓
//!                      429 / 500      401 Unauthorized / 429 after repeated failures
//! ```
//!
//! Rate limiting runs before authentication so that unauthenticated floods
//! are counted too.

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod request_id;

pub use auth::{AuthFailureLimiter, BearerAuthLayer};
pub use ip::{CidrRange, TrustedProxyConfig, UNKNOWN_IP, resolve_client_ip};
pub use rate_limit::RateLimitLayer;
pub use request_id::{RequestId, RequestIdLayer};
