//! Health and readiness endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness with node id and quota store status
//! - `GET /ready` - Readiness probe; pings the quota store
//!
//! # Health vs Readiness
//!
//! - **Health** (`/health`): Returns 200 even if degraded, includes details
//! - **Readiness** (`/ready`): Returns 503 if the store cannot be reached,
//!   since every rate-limited request would fail closed

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::{instrument, warn};

use crate::models::{HealthResponse, StoreHealth};
use crate::state::AppState;

/// Health check endpoint.
///
/// Reports the result of the last background store ping rather than pinging
/// on every call. Always returns 200 OK.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "node": 1,
///   "store": { "backend": "redis", "reachable": true },
///   "version": "0.1.0",
///   "uptime_seconds": 3600,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = state.store_reachable();

    Json(HealthResponse {
        status: if reachable { "healthy" } else { "degraded" }.to_string(),
        node: state.config.node,
        store: StoreHealth {
            backend: state.store_backend().to_string(),
            reachable,
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint for Kubernetes probes.
///
/// ```yaml
/// readinessProbe:
///   httpGet:
///     path: /ready
///     port: 9000
///   periodSeconds: 10
/// ```
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    let Some(limiter) = &state.limiter else {
        return StatusCode::OK;
    };

    match limiter.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Not ready: quota store unreachable");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
