use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tollgate::rate_limit::{RateLimiter, connect_store};
use tollgate::{AppState, Config, TokenAuthenticator, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();

    // Logs are JSON unless SERVER_MODE says otherwise; a broken config still logs as JSON
    init_tracing(config.as_ref().map_or(true, Config::json_logs));

    info!("Starting tollgate v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(?config, "Configuration loaded");

    let authenticator = TokenAuthenticator::new(config.jwt_settings()).map_err(|e| {
        error!("Invalid credential settings: {e}");
        exitcode::CONFIG
    })?;

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    let limiter = if config.rate_limiting_enabled() {
        info!(
            url = %config.rate_limit_store_url_redacted(),
            "Connecting to rate limit store..."
        );
        let store = connect_store(&config.rate_limit_store_url)
            .await
            .map_err(|e| {
                error!("Failed to connect to rate limit store: {e}");
                exitcode::UNAVAILABLE
            })?;
        info!(backend = store.backend(), "Rate limit store connected");
        Some(RateLimiter::with_timeout(
            store,
            config.rate_limit_store_timeout,
        ))
    } else {
        None
    };

    let state = AppState::new(config.clone(), Arc::new(authenticator), limiter);
    let app = build_router(state.clone());

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!(node = config.node, "Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /health        - Health check");
    info!("  GET  /ready         - Readiness check");
    info!("  POST /auth/refresh  - Exchange a credential for a fresh one");
    info!("  GET  /me            - Caller identity");

    // Peer addresses are needed to decide whether X-Forwarded-For is trusted
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

