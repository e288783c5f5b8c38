//! HTTP client for communicating with the Ponto server.

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Body of `GET /time`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_iso: String,
    pub server_epoch_ms: i64,
    pub source: String,
}

/// One time exchange with the server and the offset derived from it.
///
/// The server is assumed to have read its clock at the midpoint of the
/// round trip.
#[derive(Debug, Clone, Serialize)]
pub struct TimeSync {
    pub server: ServerTime,
    pub local_midpoint_ms: i64,
    pub offset_ms: i64,
    pub round_trip_ms: i64,
}

impl TimeSync {
    pub fn from_exchange(server: ServerTime, sent_ms: i64, received_ms: i64) -> Self {
        let round_trip_ms = (received_ms - sent_ms).max(0);
        let local_midpoint_ms = sent_ms + round_trip_ms / 2;
        Self {
            offset_ms: server.server_epoch_ms - local_midpoint_ms,
            server,
            local_midpoint_ms,
            round_trip_ms,
        }
    }

    /// Estimated server time at local time `local_ms`.
    pub fn server_time_at(&self, local_ms: i64) -> i64 {
        local_ms + self.offset_ms
    }
}

fn local_now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// HTTP client for the Ponto API.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform a GET request and deserialize the JSON body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        Self::decode(resp, &url).await
    }

    /// Perform a POST request with a JSON body and deserialize the response.
    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        Self::decode(resp, &url).await
    }

    /// Sync with the server clock, keeping the sample with the shortest
    /// round trip.
    pub async fn sync_time(&self, samples: u32) -> Result<TimeSync> {
        let mut best: Option<TimeSync> = None;

        for _ in 0..samples.max(1) {
            let sent = local_now_ms();
            let server: ServerTime = self.get("/time").await?;
            let received = local_now_ms();

            let sync = TimeSync::from_exchange(server, sent, received);
            if best
                .as_ref()
                .map_or(true, |b| sync.round_trip_ms < b.round_trip_ms)
            {
                best = Some(sync);
            }
        }

        best.context("No time samples collected")
    }

    async fn decode<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, error_message(&body));
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

/// The server's `error.message`, or the raw body when it is not an error
/// document.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}
