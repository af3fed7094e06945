//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Adds X-Request-Id header
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers, answers preflight
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded, 500 if the store is down
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← 401 if invalid (bypassed for AUTH_BYPASS_PATHS)
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! Each stage can be switched off through `SERVER_MIDDLEWARES`.
//!
//! # Routes
//!
//! - `/health`, `/ready` - Health & monitoring (auth bypassed)
//! - `/auth/refresh` - Credential exchange (auth bypassed, checks its own credential)
//! - `/me` - Caller identity

use std::num::NonZeroU32;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span};

use crate::config::Middleware;
use crate::handlers;
use crate::middleware::{BearerAuthLayer, RateLimitLayer, RequestId, RequestIdLayer};
use crate::rate_limit::Rate;
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// - **Rate Limiting**: when `ratelimit` is enabled, `RATE_LIMIT_PER_MINUTE > 0`
///   and the state carries a limiter
/// - **Authentication**: when `auth` is enabled
/// - **CORS**: configured from `cors_allowed_origins`
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();
    let trusted_proxies = state.trusted_proxies.clone();

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/auth/refresh", post(handlers::refresh_token))
        .route("/me", get(handlers::me));

    // =========================================================================
    // Apply Middleware Stack (order matters - applied innermost first)
    // =========================================================================

    // 1. Authentication
    if config.middleware_enabled(Middleware::Auth) {
        info!(
            issuer = state.authenticator.issuer(),
            bypass_paths = ?config.auth_bypass_paths,
            "Bearer authentication enabled"
        );
        router = router.layer(
            BearerAuthLayer::new(
                state.authenticator.clone(),
                config.auth_bypass_paths.clone(),
            )
            .with_failure_limiter(state.failure_limiter.clone())
            .with_trusted_proxies(trusted_proxies.clone()),
        );
    } else {
        info!("Authentication disabled (not in SERVER_MIDDLEWARES)");
    }

    // 2. Rate limiting
    match (
        config.rate_limiting_enabled(),
        NonZeroU32::new(config.rate_limit_per_minute),
        &state.limiter,
    ) {
        (true, Some(limit), Some(limiter)) => {
            info!(
                per_minute = limit.get(),
                scope = %config.rate_limit_scope,
                backend = limiter.backend(),
                trusted_proxies = config.trusted_proxies.len(),
                "Rate limiting enabled"
            );
            router = router.layer(
                RateLimitLayer::new(
                    limiter.clone(),
                    Rate::per_minute(limit),
                    config.rate_limit_scope.as_str(),
                )
                .with_trusted_proxies(trusted_proxies),
            );
        }
        _ => info!("Rate limiting disabled"),
    }

    // 3. CORS
    if config.middleware_enabled(Middleware::Cors) {
        router = router.layer(build_cors_layer(&config.cors_allowed_origins));
    }

    // 4. Tracing
    if config.middleware_enabled(Middleware::Trace) {
        router = router.layer(TraceLayer::new_for_http().make_span_with(
            |req: &Request<Body>| {
                let request_id = req
                    .extensions()
                    .get::<RequestId>()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                info_span!(
                    "http_request",
                    method = %req.method(),
                    path = %req.uri().path(),
                    request_id = %request_id,
                )
            },
        ));
    }

    // 5. Request ID (outermost, so the trace span can see it)
    if config.middleware_enabled(Middleware::RequestId) {
        router = router.layer(RequestIdLayer::new());
    }

    router.with_state(state)
}

/// Build CORS layer from configuration.
///
/// `*` allows any origin. Convenient for development; list explicit origins
/// in production.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_cors_layer_any() {
        let origins = vec!["*".to_string()];
        let _layer = build_cors_layer(&origins);
    }

    #[test]
    fn test_build_cors_layer_specific() {
        let origins = vec![
            "https://example.com".to_string(),
            "https://app.example.com".to_string(),
        ];
        let _layer = build_cors_layer(&origins);
    }
}
