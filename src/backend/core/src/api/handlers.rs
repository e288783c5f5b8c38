//! API request handlers.
//!
//! Handlers return `Result<impl IntoResponse, PontoError>` so failures map
//! to HTTP status codes through `PontoError`'s `IntoResponse`.

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    Extension, Json,
};

use super::AppState;
use crate::error::{ErrorCode, PontoError};
use crate::record::EventInput;

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn root() -> &'static str {
    "OK"
}

/// `healthy` while the last clock answer came from a reference; `degraded`
/// after a host fallback. Submissions keep working either way.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.authority.clock_status();
    let degraded = status.is_degraded();

    Json(serde_json::json!({
        "status": if degraded { "degraded" } else { "healthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "clock": status,
        "store": state.authority.store_name(),
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Time
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn authoritative_time(State(state): State<AppState>) -> impl IntoResponse {
    let time = state.authority.get_authoritative_time().await;
    (Extension(time.reading()), Json(time))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn list_events(State(state): State<AppState>) -> Result<impl IntoResponse, PontoError> {
    let records = state.authority.list_events().await?;
    Ok(Json(records))
}

/// An empty body is an empty submission; every field takes its default.
pub async fn submit_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, PontoError> {
    let input = if body.iter().all(u8::is_ascii_whitespace) {
        EventInput::default()
    } else {
        serde_json::from_slice::<EventInput>(&body).map_err(|e| {
            PontoError::with_internal(
                ErrorCode::InvalidJson,
                "The request body must be a JSON object",
                e.to_string(),
            )
        })?
    };

    let reading = state.authority.clock().now().await;
    let record = state.authority.submit_event_at(input, reading).await?;
    Ok((StatusCode::CREATED, Extension(reading), Json(record)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

