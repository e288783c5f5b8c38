//! Telemetry: Structured Logging and Prometheus Metrics.
//!
//! - **Logging**: JSON/pretty/compact structured logging via `tracing-subscriber`
//! - **Metrics**: Prometheus counters and histograms for the clock, the skew
//!   policy and the record store
//!
//! # Example
//!
//! ```rust,no_run
//! use ponto_core::telemetry::{TelemetryConfig, init_telemetry};
//!
//! let config = TelemetryConfig::default();
//! init_telemetry(&config).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, ClockMetrics, MetricsConfig, MetricsRegistry, RecordMetrics};

use serde::Deserialize;

/// Unified telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Service name for identification in logs and metrics
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "ponto-server".to_string()
}

fn default_environment() -> String {
    std::env::var("PONTO_ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

/// Initialize the complete telemetry stack.
///
/// Call once at application startup.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<MetricsRegistry> {
    let registry = init_metrics(&config.metrics, &config.service_name)?;
    init_logging(&config.logging, &config.environment)?;
    Ok(registry)
}
