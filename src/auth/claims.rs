//! Credential claim schema.
//!
//! The payload is a fixed struct rather than an open JSON map. Optional fields
//! are explicit, and `ver` allows the schema to evolve without guessing.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Current claim schema version.
pub const CLAIMS_VERSION: u32 = 1;

/// Tier reported for credentials without a role.
pub const ANONYMOUS_ROLE: &str = "anon";

fn default_version() -> u32 {
    CLAIMS_VERSION
}

/// Decoded credential payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject identity (e.g. user id).
    pub sub: String,
    /// Role claim; absent or empty means anonymous.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Issuer.
    pub iss: String,
    /// Issued at, Unix seconds.
    pub iat: i64,
    /// Expires at, Unix seconds.
    pub exp: i64,
    /// Claim schema version.
    #[serde(default = "default_version")]
    pub ver: u32,
}

impl Claims {
    /// Build claims for `subject` valid for `timeout` from `now`.
    pub(crate) fn new(
        subject: &str,
        role: &str,
        issuer: &str,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Self {
        let iat = now.timestamp();
        let exp = iat.saturating_add(i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX));

        Self {
            sub: subject.to_string(),
            role: (!role.is_empty()).then(|| role.to_string()),
            iss: issuer.to_string(),
            iat,
            exp,
            ver: CLAIMS_VERSION,
        }
    }

    /// Role name, or [`ANONYMOUS_ROLE`] when no role was issued.
    pub fn tier(&self) -> &str {
        match self.role.as_deref() {
            Some(role) if !role.is_empty() => role,
            _ => ANONYMOUS_ROLE,
        }
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        timestamp(self.iat)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp(self.exp)
    }

    /// Whether the credential is still valid at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() < self.exp
    }

    /// Last instant at which this credential may be exchanged for a new one.
    pub fn refresh_deadline(&self, max_refresh: Duration) -> DateTime<Utc> {
        let window = i64::try_from(max_refresh.as_secs()).unwrap_or(i64::MAX);
        timestamp(self.exp.saturating_add(window))
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_new_claims_timestamps() {
        let now = fixed_now();
        let claims = Claims::new("user-1", "admin", "issuer", now, Duration::from_secs(3600));

        assert_eq!(claims.iat, now.timestamp());
        assert_eq!(claims.exp, now.timestamp() + 3600);
        assert_eq!(claims.expires_at(), now + chrono::Duration::hours(1));
        assert_eq!(claims.ver, CLAIMS_VERSION);
    }

    #[test]
    fn test_empty_role_is_anonymous() {
        let claims = Claims::new("user-1", "", "issuer", fixed_now(), Duration::from_secs(60));
        assert!(claims.role.is_none());
        assert_eq!(claims.tier(), ANONYMOUS_ROLE);
    }

    #[test]
    fn test_tier_uses_role() {
        let claims = Claims::new("user-1", "service_role", "issuer", fixed_now(), Duration::ZERO);
        assert_eq!(claims.tier(), "service_role");
    }

    #[test]
    fn test_validity_boundary() {
        let now = fixed_now();
        let claims = Claims::new("user-1", "", "issuer", now, Duration::from_secs(10));

        assert!(claims.is_valid_at(now));
        assert!(claims.is_valid_at(now + chrono::Duration::seconds(9)));
        assert!(!claims.is_valid_at(now + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_refresh_deadline() {
        let now = fixed_now();
        let claims = Claims::new("user-1", "", "issuer", now, Duration::from_secs(3600));

        assert_eq!(
            claims.refresh_deadline(Duration::from_secs(12 * 3600)),
            now + chrono::Duration::hours(13)
        );
    }

    #[test]
    fn test_missing_version_defaults_to_current() {
        let json = r#"{"sub":"u","iss":"i","iat":1,"exp":2}"#;
        let claims: Claims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.ver, CLAIMS_VERSION);
        assert!(claims.role.is_none());
    }
}
