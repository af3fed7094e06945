//! Application configuration loaded from environment variables.
//!
//! All configuration is loaded from environment variables (or a `.env` file)
//! with development defaults. `JWT_ISSUER` and `JWT_KEY` have no default and
//! must be set.
//!
//! # Server
//!
//! - `SERVER_HOST`, `SERVER_PORT`: bind address (default: `0.0.0.0:9000`)
//! - `SERVER_MODE`: `release` (JSON logs), `debug` or `test` (default: `release`)
//! - `SERVER_NODE`: node id reported by `/health` (default: 1)
//! - `SERVER_MIDDLEWARES`: comma-separated subset of [`Middleware`] names
//!   (default: all)
//! - `TRUSTED_PROXIES`: CIDR ranges allowed to set `X-Forwarded-For`
//!
//! # Authentication
//!
//! - `JWT_ISSUER`, `JWT_REALM`, `JWT_KEY`
//! - `JWT_TIMEOUT_SECS`: credential lifetime (default: 3600)
//! - `JWT_MAX_REFRESH_SECS`: refresh window after expiry (default: 43200)
//! - `AUTH_BYPASS_PATHS`: exact paths served without a credential
//! - `AUTH_FAILURE_LIMIT_PER_MINUTE`: failed attempts per client before
//!   further failures are answered with 429 (default: 10, 0 = disabled)
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_STORE_URL`: `redis://host:port` or `memory://`
//! - `RATE_LIMIT_PER_MINUTE`: requests per minute per client (default: 60, 0 = disabled)
//! - `RATE_LIMIT_SCOPE`: key namespace (default: `ipRateLimit`)
//! - `RATE_LIMIT_STORE_TIMEOUT_MS`: bound on each store round trip (default: 500)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::JwtSettings;
use crate::error::{AppError, AppResult};
use crate::middleware::CidrRange;

/// Optional pipeline stages that can be switched on per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Middleware {
    RateLimit,
    Auth,
    RequestId,
    Trace,
    Cors,
}

impl Middleware {
    pub const ALL: [Middleware; 5] = [
        Middleware::RateLimit,
        Middleware::Auth,
        Middleware::RequestId,
        Middleware::Trace,
        Middleware::Cors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Middleware::RateLimit => "ratelimit",
            Middleware::Auth => "auth",
            Middleware::RequestId => "request-id",
            Middleware::Trace => "trace",
            Middleware::Cors => "cors",
        }
    }
}

impl FromStr for Middleware {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Middleware::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown middleware '{s}'"))
    }
}

impl fmt::Display for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 9000)
    pub port: u16,

    /// Run mode: "release", "debug" or "test" (default: "release")
    pub mode: String,

    /// Node id for multi-instance deployments (default: 1)
    pub node: u16,

    /// Enabled pipeline stages (default: all)
    pub middlewares: Vec<Middleware>,

    /// Trusted proxy CIDR ranges.
    ///
    /// `X-Forwarded-For` is only honoured when the connecting peer falls inside
    /// one of these ranges. Empty means every peer is trusted, which is only
    /// safe when the service is unreachable except through a proxy.
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Issuer written to and required in every credential
    pub jwt_issuer: String,

    /// Realm announced in `WWW-Authenticate` challenges
    pub jwt_realm: String,

    /// HMAC signing key; never logged
    pub jwt_key: String,

    /// Credential lifetime (default: 1 hour)
    pub jwt_timeout: Duration,

    /// Refresh window after expiry (default: 12 hours)
    pub jwt_max_refresh: Duration,

    /// Paths that bypass authentication (exact match).
    /// Default: ["/health", "/ready", "/auth/refresh"]
    pub auth_bypass_paths: Vec<String>,

    /// Failed authentication attempts per client per minute (default: 10, 0 = disabled)
    pub auth_failure_limit_per_minute: u32,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Quota store address: `redis://...` or `memory://`
    pub rate_limit_store_url: String,

    /// Requests per minute per client (default: 60, 0 = disabled)
    pub rate_limit_per_minute: u32,

    /// Key namespace for the per-IP bucket (default: "ipRateLimit")
    pub rate_limit_scope: String,

    /// Upper bound on a single store round trip (default: 500ms)
    pub rate_limit_store_timeout: Duration,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Comma-separated list of allowed CORS origins ("*" for any)
    pub cors_allowed_origins: Vec<String>,

    /// Interval for the background store health check (default: 30 seconds)
    pub health_check_interval: Duration,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` listing every invalid or missing value.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("SERVER_PORT", 9000)?,
            mode: env::var("SERVER_MODE").unwrap_or_else(|_| "release".to_string()),
            node: Self::parse_env("SERVER_NODE", 1)?,
            middlewares: Self::parse_middlewares(env::var("SERVER_MIDDLEWARES").ok().as_deref())?,
            trusted_proxies: parse_list(&env::var("TRUSTED_PROXIES").unwrap_or_default()),

            // Authentication
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_default(),
            jwt_realm: env::var("JWT_REALM").unwrap_or_default(),
            jwt_key: env::var("JWT_KEY").unwrap_or_default(),
            jwt_timeout: Duration::from_secs(Self::parse_env("JWT_TIMEOUT_SECS", 3600)?),
            jwt_max_refresh: Duration::from_secs(Self::parse_env(
                "JWT_MAX_REFRESH_SECS",
                12 * 3600,
            )?),
            auth_bypass_paths: parse_list(
                &env::var("AUTH_BYPASS_PATHS")
                    .unwrap_or_else(|_| "/health,/ready,/auth/refresh".to_string()),
            )
            .into_iter()
            .filter(|p| p.starts_with('/'))
            .collect(),
            auth_failure_limit_per_minute: Self::parse_env("AUTH_FAILURE_LIMIT_PER_MINUTE", 10)?,

            // Rate limiting
            rate_limit_store_url: env::var("RATE_LIMIT_STORE_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            rate_limit_per_minute: Self::parse_env("RATE_LIMIT_PER_MINUTE", 60)?,
            rate_limit_scope: env::var("RATE_LIMIT_SCOPE")
                .unwrap_or_else(|_| "ipRateLimit".to_string()),
            rate_limit_store_timeout: Duration::from_millis(Self::parse_env(
                "RATE_LIMIT_STORE_TIMEOUT_MS",
                500,
            )?),

            // Observability
            cors_allowed_origins: parse_list(
                &env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string()),
            ),
            health_check_interval: Duration::from_secs(Self::parse_env(
                "HEALTH_CHECK_INTERVAL_SECS",
                30,
            )?),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values, reporting every problem at once.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        let mut errors = Vec::new();

        if self.jwt_issuer.is_empty() {
            errors.push("JWT_ISSUER is required".to_string());
        }
        if self.jwt_key.is_empty() {
            errors.push("JWT_KEY is required".to_string());
        }
        if self.jwt_timeout.is_zero() {
            errors.push("JWT_TIMEOUT_SECS must be greater than 0".to_string());
        }
        if self.rate_limit_scope.is_empty() {
            errors.push("RATE_LIMIT_SCOPE must not be empty".to_string());
        }
        if self.rate_limit_store_timeout.is_zero() {
            errors.push("RATE_LIMIT_STORE_TIMEOUT_MS must be greater than 0".to_string());
        }
        if self.health_check_interval.is_zero() {
            errors.push("HEALTH_CHECK_INTERVAL_SECS must be greater than 0".to_string());
        }
        // An unparsable entry would be dropped, and an empty list trusts every peer
        for cidr in &self.trusted_proxies {
            if CidrRange::parse(cidr).is_none() {
                errors.push(format!("TRUSTED_PROXIES has an invalid CIDR range '{cidr}'"));
            }
        }
        if !matches!(self.mode.as_str(), "release" | "debug" | "test") {
            errors.push(format!(
                "SERVER_MODE must be one of release, debug, test (got '{}')",
                self.mode
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::ConfigError(errors.join("; ")))
        }
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for the token authenticator.
    pub fn jwt_settings(&self) -> JwtSettings {
        JwtSettings {
            issuer: self.jwt_issuer.clone(),
            realm: self.jwt_realm.clone(),
            key: self.jwt_key.as_bytes().to_vec(),
            timeout: self.jwt_timeout,
            max_refresh: self.jwt_max_refresh,
        }
    }

    /// Store URL with any credentials masked, for logging.
    pub fn rate_limit_store_url_redacted(&self) -> String {
        let url = &self.rate_limit_store_url;
        match (url.split_once("://"), url.rsplit_once('@')) {
            (Some((scheme, _)), Some((_, host))) => format!("{scheme}://***@{host}"),
            _ => url.clone(),
        }
    }

    /// Check whether a pipeline stage is enabled.
    pub fn middleware_enabled(&self, middleware: Middleware) -> bool {
        self.middlewares.contains(&middleware)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_per_minute > 0 && self.middleware_enabled(Middleware::RateLimit)
    }

    /// Whether logs should be emitted as JSON.
    pub fn json_logs(&self) -> bool {
        self.mode == "release"
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address, or `None` if metrics are disabled.
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse the enabled middleware list. Unset or empty enables everything.
    fn parse_middlewares(raw: Option<&str>) -> AppResult<Vec<Middleware>> {
        let names = parse_list(raw.unwrap_or_default());
        if names.is_empty() {
            return Ok(Middleware::ALL.to_vec());
        }

        names
            .iter()
            .map(|name| {
                name.parse()
                    .map_err(|e| AppError::ConfigError(format!("Invalid SERVER_MIDDLEWARES: {e}")))
            })
            .collect()
    }
}

/// Split a comma-separated value, trimming and dropping empty entries.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("mode", &self.mode)
            .field("node", &self.node)
            .field("middlewares", &self.middlewares)
            .field("trusted_proxies", &self.trusted_proxies)
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_realm", &self.jwt_realm)
            .field("jwt_key", &"<redacted>")
            .field("jwt_timeout", &self.jwt_timeout)
            .field("jwt_max_refresh", &self.jwt_max_refresh)
            .field("auth_bypass_paths", &self.auth_bypass_paths)
            .field(
                "auth_failure_limit_per_minute",
                &self.auth_failure_limit_per_minute,
            )
            .field("rate_limit_store_url", &self.rate_limit_store_url_redacted())
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("rate_limit_scope", &self.rate_limit_scope)
            .field("rate_limit_store_timeout", &self.rate_limit_store_timeout)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("health_check_interval", &self.health_check_interval)
            .field("metrics_port", &self.metrics_port)
            .finish()
    }
}

/// Default configuration for testing and development.
///
/// Issuer and key are left empty, so `validate()` fails until they are set.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 9000,
            mode: "release".to_string(),
            node: 1,
            middlewares: Middleware::ALL.to_vec(),
            trusted_proxies: vec![], // Empty = trust all (dev mode)
            // Authentication
            jwt_issuer: String::new(),
            jwt_realm: String::new(),
            jwt_key: String::new(),
            jwt_timeout: Duration::from_secs(3600),
            jwt_max_refresh: Duration::from_secs(12 * 3600),
            auth_bypass_paths: vec![
                "/health".to_string(),
                "/ready".to_string(),
                "/auth/refresh".to_string(),
            ],
            auth_failure_limit_per_minute: 10,
            // Rate limiting
            rate_limit_store_url: "redis://127.0.0.1:6379".to_string(),
            rate_limit_per_minute: 60,
            rate_limit_scope: "ipRateLimit".to_string(),
            rate_limit_store_timeout: Duration::from_millis(500),
            // Observability
            cors_allowed_origins: vec!["*".to_string()],
            health_check_interval: Duration::from_secs(30),
            metrics_port: 9090,
        }
    }
}
