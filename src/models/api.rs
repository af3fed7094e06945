use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::{Claims, IssuedToken};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy", or "degraded" when the quota store was last seen down
    pub status: String,
    /// Node id of this instance
    pub node: u16,
    /// Quota store status
    pub store: StoreHealth,
    /// Service version
    pub version: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Quota store status as seen by the background health check.
#[derive(Debug, Serialize)]
pub struct StoreHealth {
    /// Backend name ("redis", "memory"), or "disabled" without rate limiting
    pub backend: String,
    pub reachable: bool,
}

/// A freshly issued credential.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    /// Always "Bearer"
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    /// Seconds until `expires_at`
    pub expires_in: i64,
}

impl TokenResponse {
    pub fn new(issued: IssuedToken, now: DateTime<Utc>) -> Self {
        Self {
            expires_in: (issued.expires_at - now).num_seconds().max(0),
            token: issued.token,
            token_type: "Bearer",
            expires_at: issued.expires_at,
        }
    }
}

/// The authenticated caller's identity.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub subject: String,
    /// Role, or "anon" when the credential carries none
    pub role: String,
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Claims> for MeResponse {
    fn from(claims: &Claims) -> Self {
        Self {
            subject: claims.sub.clone(),
            role: claims.tier().to_string(),
            issuer: claims.iss.clone(),
            issued_at: claims.issued_at(),
            expires_at: claims.expires_at(),
        }
    }
}
