//! Ponto Server - Main entry point
//!
//! Time-clock event service with an authoritative, reference-backed clock.

use std::sync::Arc;

use ponto_core::{
    api::{self, AppState},
    authority::TimeAuthority,
    clock::AuthoritativeClock,
    config::Config,
    record::EventRecorder,
    skew::SkewPolicy,
    store::JsonFileStore,
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration; a bad file or variable stops startup
    let config = Config::load()?;

    let metrics = telemetry::init_telemetry(&config.telemetry)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.telemetry.environment,
        "Starting Ponto Server"
    );

    let clock = Arc::new(AuthoritativeClock::from_config(&config.clock)?);
    tracing::info!(
        references = ?clock.status().references,
        freshness_window = ?clock.freshness_window(),
        "Authoritative clock configured"
    );

    let store = Arc::new(JsonFileStore::new(&config.store.path));
    tracing::info!(path = %config.store.path, "Using JSON file record store");

    let policy = SkewPolicy::new(config.skew.tolerance);
    tracing::info!(
        tolerance_millis = policy.tolerance_millis(),
        "Client time tolerance"
    );

    let authority = Arc::new(TimeAuthority::new(
        clock,
        policy,
        EventRecorder::with_uuid_ids(config.record.clone()),
        store,
    ));

    // Warm the clock cache before accepting traffic.
    let warm = authority.clock().now().await;
    if warm.is_degraded() {
        tracing::warn!("No clock reference reachable at startup; serving host time until one is");
    }

    let app = api::build_router(AppState::new(authority, metrics));

    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    tracing::info!(address = %listener.local_addr()?, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
