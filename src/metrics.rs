//! Prometheus metrics for the authentication and rate limiting gates.
//!
//! Metrics are exposed via a dedicated HTTP listener (default port 9090).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `tollgate_rate_limit_decisions_total` - Admission decisions (labels: scope, outcome)
//! - `tollgate_auth_verifications_total` - Credential checks (label: outcome)
//! - `tollgate_tokens_issued_total` - Credentials signed
//!
//! ## Histograms
//! - `tollgate_store_duration_seconds` - Quota store round trip (label: backend)
//!
//! ## Gauges
//! - `tollgate_store_status` - Quota store reachability (1 = up, 0 = down)
//!
//! Recording functions are no-ops until [`init_metrics`] installs a recorder.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "tollgate_rate_limit_decisions_total";
    pub const AUTH_VERIFICATIONS_TOTAL: &str = "tollgate_auth_verifications_total";
    pub const TOKENS_ISSUED_TOTAL: &str = "tollgate_tokens_issued_total";
    pub const STORE_DURATION_SECONDS: &str = "tollgate_store_duration_seconds";
    pub const STORE_STATUS: &str = "tollgate_store_status";
}

/// Install the Prometheus exporter listening on `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::RATE_LIMIT_DECISIONS_TOTAL,
        "Rate limit admission decisions by outcome"
    );
    describe_counter!(
        names::AUTH_VERIFICATIONS_TOTAL,
        "Credential verifications by outcome"
    );
    describe_counter!(names::TOKENS_ISSUED_TOTAL, "Credentials issued");
    describe_histogram!(
        names::STORE_DURATION_SECONDS,
        "Quota store round trip duration in seconds"
    );
    describe_gauge!(
        names::STORE_STATUS,
        "Quota store reachability (1 = up, 0 = down)"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record a rate limit decision. `outcome` is `allowed`, `denied` or `error`.
pub fn record_rate_limit_decision(scope: &str, outcome: &'static str) {
    counter!(names::RATE_LIMIT_DECISIONS_TOTAL, "scope" => scope.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Record a credential verification. `outcome` is `ok` or an error kind.
pub fn record_auth_verification(outcome: &'static str) {
    counter!(names::AUTH_VERIFICATIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_token_issued() {
    counter!(names::TOKENS_ISSUED_TOTAL).increment(1);
}

pub fn record_store_duration(backend: &'static str, duration_secs: f64) {
    histogram!(names::STORE_DURATION_SECONDS, "backend" => backend).record(duration_secs);
}

pub fn set_store_status(up: bool) {
    gauge!(names::STORE_STATUS).set(if up { 1.0 } else { 0.0 });
}
