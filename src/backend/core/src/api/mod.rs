//! HTTP layer.
//!
//! Routes:
//!
//! - `GET /` - liveness text
//! - `GET /time` - authoritative time for client offset sync
//! - `GET /marcacoes` - every stored record
//! - `POST /marcacoes` - submit one event, `201` with the record
//! - `GET /health` - clock and store status
//! - `GET /metrics` - Prometheus text format
//!
//! Every response carries `Cache-Control: no-store` and a `Date` header taken
//! from the authoritative clock, so clients can sync from any response.

mod handlers;
pub mod middleware;

use axum::{
    http::{header::DATE, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::authority::TimeAuthority;
use crate::telemetry::MetricsRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub authority: Arc<TimeAuthority>,
    pub metrics: MetricsRegistry,
}

impl AppState {
    pub fn new(authority: Arc<TimeAuthority>, metrics: MetricsRegistry) -> Self {
        Self { authority, metrics }
    }
}

/// Build the API router.
///
/// # Example
///
/// ```rust,ignore
/// let state = AppState::new(authority, metrics);
/// let app = build_router(state);
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([DATE]);

    Router::new()
        .route("/", get(handlers::root))
        .route("/time", get(handlers::authoritative_time))
        .route(
            "/marcacoes",
            get(handlers::list_events).post(handlers::submit_event),
        )
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::clock_headers,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
