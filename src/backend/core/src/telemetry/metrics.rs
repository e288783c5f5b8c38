//! Prometheus Metrics for the Clock, Skew Decisions, and Records.
//!
//! # Example
//!
//! ```rust,no_run
//! use ponto_core::telemetry::metrics::ClockMetrics;
//!
//! ClockMetrics::record_query("time.google.com:123", "ok");
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for skew magnitudes (in milliseconds)
    #[serde(default = "default_skew_buckets")]
    pub skew_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            skew_buckets: default_skew_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_skew_buckets() -> Vec<f64> {
    vec![
        100.0, 1_000.0, 5_000.0, 30_000.0, 60_000.0, 300_000.0, 600_000.0, 3_600_000.0,
        43_200_000.0,
    ]
}

/// Handle to the installed Prometheus recorder, if any.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry that renders nothing (metrics disabled or in tests).
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Initialize the metrics subsystem.
///
/// # Errors
///
/// Returns an error if the buckets are invalid or a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new();

    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    builder = builder.set_buckets(&config.skew_buckets)?;

    let handle = builder.install_recorder()?;

    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    describe_counter!(
        "ponto_clock_queries_total",
        "External time reference queries by reference and outcome"
    );
    describe_counter!(
        "ponto_clock_cache_hits_total",
        "Clock reads served by extrapolating the cached reading"
    );
    describe_counter!(
        "ponto_clock_host_fallbacks_total",
        "Clock reads that fell back to the host clock"
    );
    describe_counter!(
        "ponto_skew_decisions_total",
        "Client time claims evaluated, by acceptance"
    );
    describe_histogram!(
        "ponto_skew_millis",
        "Absolute distance between client claims and authoritative now"
    );
    describe_counter!("ponto_records_total", "Event records persisted, by kind");
    describe_counter!("ponto_errors_total", "Errors by code, category and severity");
}

/// Clock source metrics.
pub struct ClockMetrics;

impl ClockMetrics {
    /// Record one external reference query (`ok`, `timeout`, `error`).
    pub fn record_query(reference: &str, outcome: &'static str) {
        counter!(
            "ponto_clock_queries_total",
            "reference" => reference.to_string(),
            "outcome" => outcome,
        )
        .increment(1);
    }

    pub fn record_cache_hit() {
        counter!("ponto_clock_cache_hits_total").increment(1);
    }

    pub fn record_host_fallback() {
        counter!("ponto_clock_host_fallbacks_total").increment(1);
    }
}

/// Skew policy and recorder metrics.
pub struct RecordMetrics;

impl RecordMetrics {
    /// Record a skew decision for a client claim that was present.
    pub fn record_skew(accepted: bool, skew_millis: i64) {
        counter!(
            "ponto_skew_decisions_total",
            "accepted" => if accepted { "true" } else { "false" },
        )
        .increment(1);
        histogram!("ponto_skew_millis").record(skew_millis.unsigned_abs() as f64);
    }

    /// `kind` is client-supplied, so it is folded into [`kind_label`]'s
    /// fixed set before becoming a label.
    pub fn record_persisted(kind: &str) {
        counter!("ponto_records_total", "kind" => kind_label(kind)).increment(1);
    }
}

/// Bounded label for an event kind: `entrada`, `saida` or `other`.
pub fn kind_label(kind: &str) -> &'static str {
    match kind.trim().to_lowercase().as_str() {
        "entrada" => "entrada",
        "saida" | "saída" => "saida",
        _ => "other",
    }
}
