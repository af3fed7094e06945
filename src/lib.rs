//! # Tollgate
//!
//! Stateless bearer authentication and distributed rate limiting for Axum
//! services:
//!
//! - **Credentials**: HS256-signed, time-bounded tokens verified without any
//!   shared session state, with a bounded refresh window
//! - **Rate Limiting**: Per-client fixed windows in Redis, so every replica
//!   enforces one quota; fails closed when the store is unreachable
//! - **Observability**: Request IDs, structured logging, Prometheus metrics,
//!   health endpoints
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Trace → CORS → Rate Limit → Auth) │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, ready, me, refresh)                      │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  TokenAuthenticator          │  RateLimiter                 │
//! │  (jsonwebtoken, HS256)       │  (QuotaStore trait)          │
//! ├──────────────────────────────┼──────────────────────────────┤
//! │                              │  RedisStore │ MemoryStore    │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tollgate::rate_limit::{RateLimiter, connect_store};
//! use tollgate::{AppState, Config, TokenAuthenticator, build_router};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let authenticator = Arc::new(TokenAuthenticator::new(config.jwt_settings())?);
//! let store = connect_store(&config.rate_limit_store_url).await?;
//! let limiter = RateLimiter::with_timeout(store, config.rate_limit_store_timeout);
//!
//! let state = AppState::new(config, authenticator, Some(limiter));
//! let app = build_router(state);
//! // Serve with `into_make_service_with_connect_info::<SocketAddr>()`...
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! JWT_ISSUER=my-service JWT_KEY=change-me RATE_LIMIT_STORE_URL=redis://127.0.0.1:6379 cargo run
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use auth::{Claims, TokenAuthenticator};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use rate_limit::RateLimiter;
pub use routes::build_router;
pub use state::AppState;
