//! Response headers shared by every route.

use axum::{
    extract::{Request, State},
    http::header::{HeaderName, HeaderValue, CACHE_CONTROL, DATE},
    middleware::Next,
    response::Response,
};
use chrono::{TimeZone, Utc};

use super::AppState;
use crate::clock::ClockReading;

/// Stamp `Date` from the authoritative clock and forbid caching.
///
/// Clients derive their offset from `Date`, so a cached or host-clock
/// value would skew them. A handler that already read the clock leaves its
/// [`ClockReading`] in the response extensions and that reading is reused.
pub async fn clock_headers(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut response = next.run(req).await;

    let reading = match response.extensions().get::<ClockReading>().copied() {
        Some(reading) => reading,
        None => state.authority.clock().now().await,
    };
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&http_date(reading.epoch_millis())) {
        headers.insert(DATE, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        let _ = headers.try_insert(HeaderName::from_static("x-request-id"), value);
    }

    response
}

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(epoch_millis: i64) -> String {
    Utc.timestamp_millis_opt(epoch_millis)
        .single()
        .unwrap_or_default()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
