//! Router tests for the HTTP boundary.
//!
//! Tests cover:
//! - Liveness and time endpoints
//! - Date and Cache-Control headers on every response
//! - Event submission and listing
//! - Error responses for bad bodies and store failures
//! - Health status under a degraded clock

mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use common::{fixture, fixture_with_store, FailingStore, Fixture, StubReference, T0};
use ponto_core::api::{build_router, AppState};
use ponto_core::store::InMemoryStore;
use ponto_core::telemetry::MetricsRegistry;
use serde_json::{json, Value};
use tower::ServiceExt;

fn router(fx: &Fixture) -> Router {
    build_router(AppState::new(fx.authority.clone(), MetricsRegistry::disabled()))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ============================================================================
// Liveness and Time
// ============================================================================

#[tokio::test]
async fn test_root_returns_ok() {
    let fx = fixture();
    let (status, _, body) = send(router(&fx), get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn test_time_returns_authoritative_time() {
    let fx = fixture();
    let (status, _, body) = send(router(&fx), get("/time")).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["serverEpochMs"], T0);
    assert_eq!(json["serverIso"], "2024-01-01T00:00:00.000Z");
    assert_eq!(json["source"], "reference");
}

#[tokio::test]
async fn test_every_response_carries_clock_headers() {
    let fx = fixture();

    for uri in ["/", "/time", "/marcacoes", "/health"] {
        let (_, headers, _) = send(router(&fx), get(uri)).await;

        assert_eq!(
            headers.get(header::DATE).unwrap(),
            "Mon, 01 Jan 2024 00:00:00 GMT",
            "{uri}"
        );
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    }
}

#[tokio::test]
async fn test_cors_exposes_date_header() {
    let fx = fixture();
    let request = Request::builder()
        .uri("/time")
        .header(header::ORIGIN, "https://app.example.com")
        .body(Body::empty())
        .unwrap();

    let (_, headers, _) = send(router(&fx), request).await;

    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    let exposed = headers
        .get(header::ACCESS_CONTROL_EXPOSE_HEADERS)
        .unwrap()
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(exposed.contains("date"));
}

// ============================================================================
// Event Submission
// ============================================================================

#[tokio::test]
async fn test_submit_event_returns_created_record() {
    let fx = fixture();
    let request = post_json(
        "/marcacoes",
        json!({
            "usuario": "ana",
            "tipo": "entrada",
            "approxServerMillis": T0 - 5_000,
            "lat": -23.55,
            "lng": -46.63,
            "timeZone": "America/Sao_Paulo",
        }),
    );

    let (status, _, body) = send(router(&fx), request).await;

    assert_eq!(status, StatusCode::CREATED);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["id"], "rec-1");
    assert_eq!(json["user"], "ana");
    assert_eq!(json["officialTimestamp"], "2023-12-31T23:59:55.000Z");
    assert_eq!(json["approxServerMillis"], T0 - 5_000);
    assert_eq!(json["lat"], -23.55);
    assert_eq!(json["audit"]["confidence"], "client_accepted");
}

#[tokio::test]
async fn test_empty_body_uses_defaults() {
    let fx = fixture();
    let request = Request::builder()
        .method("POST")
        .uri("/marcacoes")
        .body(Body::empty())
        .unwrap();

    let (status, _, body) = send(router(&fx), request).await;

    assert_eq!(status, StatusCode::CREATED);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["user"], "Desconhecido");
    assert_eq!(json["kind"], "entrada");
    assert_eq!(json["origin"], "online");
    assert_eq!(json["officialTimestamp"], "2024-01-01T00:00:00.000Z");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let fx = fixture();
    let request = Request::builder()
        .method("POST")
        .uri("/marcacoes")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();

    let (status, _, body) = send(router(&fx), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "INVALID_JSON");
    assert!(fx.authority.list_events().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_failure_is_service_unavailable() {
    let fx = fixture_with_store(StubReference::answering(T0), Arc::new(FailingStore));
    let request = post_json("/marcacoes", json!({ "user": "ana" }));

    let (status, _, body) = send(router(&fx), request).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], "STORAGE_WRITE_FAILED");
    assert_eq!(json["error"]["retryable"], true);
}

#[tokio::test]
async fn test_list_returns_submitted_records() {
    let fx = fixture();
    let app = router(&fx);

    for user in ["ana", "joao"] {
        let (status, _, _) = send(
            app.clone(),
            post_json("/marcacoes", json!({ "user": user })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, _, body) = send(app, get("/marcacoes")).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    let users: Vec<_> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["user"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(users, vec!["ana", "joao"]);
}

// ============================================================================
// Health and Metrics
// ============================================================================

#[tokio::test]
async fn test_health_is_healthy_with_reference() {
    let fx = fixture();
    let app = router(&fx);
    send(app.clone(), get("/time")).await;

    let (status, _, body) = send(app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["clock"]["cached"], true);
    assert_eq!(json["clock"]["reference"], "stub");
    assert_eq!(json["store"], "memory");
}

#[tokio::test]
async fn test_health_reports_degraded_clock() {
    let fx = fixture_with_store(StubReference::down(), Arc::new(InMemoryStore::new()));
    let app = router(&fx);

    let (_, headers, body) = send(app.clone(), get("/time")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["source"], "host");
    assert!(headers.get(header::DATE).is_some());

    let (status, _, body) = send(app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["clock"]["cached"], false);
}

#[tokio::test]
async fn test_outage_costs_one_reference_round_per_request() {
    let fx = fixture_with_store(StubReference::down(), Arc::new(InMemoryStore::new()));
    let app = router(&fx);

    let (status, headers, body) = send(
        app.clone(),
        post_json("/marcacoes", json!({ "user": "ana" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["audit"]["clockSource"], "host");
    assert_eq!(
        headers.get(header::DATE).unwrap(),
        "Sun, 31 Dec 2023 23:00:00 GMT"
    );
    assert_eq!(fx.reference.calls(), 1);

    send(app, get("/time")).await;
    assert_eq!(fx.reference.calls(), 2);
}

#[tokio::test]
async fn test_metrics_endpoint_is_plain_text() {
    let fx = fixture();
    let (status, headers, _) = send(router(&fx), get("/metrics")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(headers
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
}
