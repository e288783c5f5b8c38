//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

use crate::error::Result;
use crate::telemetry::TelemetryConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Authoritative clock configuration
    #[serde(default)]
    pub clock: ClockConfig,

    /// Client time acceptance configuration
    #[serde(default)]
    pub skew: SkewConfig,

    /// Record store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Event record assembly configuration
    #[serde(default)]
    pub record: RecordConfig,

    /// Logging and metrics configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClockConfig {
    /// Maximum age of a cached reference reading before it is refreshed
    #[serde(default = "default_freshness_window", with = "humantime_serde")]
    pub freshness_window: Duration,

    /// External time references, queried in this order
    #[serde(default = "default_references")]
    pub references: Vec<ReferenceConfig>,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            freshness_window: default_freshness_window(),
            references: default_references(),
        }
    }
}

/// One external time reference.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceConfig {
    /// SNTP server over UDP
    Sntp {
        host: String,
        #[serde(default = "default_sntp_port")]
        port: u16,
        #[serde(default = "default_reference_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
    /// `Date` header of an HTTP endpoint
    HttpDate {
        url: String,
        #[serde(default = "default_reference_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkewConfig {
    /// Largest accepted distance between a client-claimed time and authoritative now
    #[serde(default = "default_tolerance", with = "humantime_serde")]
    pub tolerance: Duration,
}

impl Default for SkewConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path of the JSON record file
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordConfig {
    /// User stored when the submission names none
    #[serde(default = "default_user")]
    pub default_user: String,

    /// Event kind stored when the submission names none
    #[serde(default = "default_kind")]
    pub default_kind: String,

    /// Origin stored when the submission names none
    #[serde(default = "default_origin")]
    pub default_origin: String,

    /// Attach confidence, skew, clock source and device metadata to records
    #[serde(default = "default_audit_metadata")]
    pub audit_metadata: bool,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            default_user: default_user(),
            default_kind: default_kind(),
            default_origin: default_origin(),
            audit_metadata: default_audit_metadata(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 3000 }
fn default_freshness_window() -> Duration { Duration::from_secs(30) }
fn default_sntp_port() -> u16 { 123 }
fn default_reference_timeout() -> Duration { Duration::from_secs(2) }
fn default_tolerance() -> Duration { Duration::from_secs(10 * 60) }
fn default_store_path() -> String { "db.json".to_string() }
fn default_user() -> String { "Desconhecido".to_string() }
fn default_kind() -> String { "entrada".to_string() }
fn default_origin() -> String { "online".to_string() }
fn default_audit_metadata() -> bool { true }

fn default_references() -> Vec<ReferenceConfig> {
    ["time.google.com", "time.cloudflare.com", "pool.ntp.org"]
        .into_iter()
        .map(|host| ReferenceConfig::Sntp {
            host: host.to_string(),
            port: default_sntp_port(),
            timeout: default_reference_timeout(),
        })
        .collect()
}

impl Config {
    /// Load configuration from the file named by `PONTO_CONFIG` (if set)
    /// and `PONTO__*` environment variables.
    ///
    /// A named file that is missing or invalid is an error, never a silent
    /// switch to defaults.
    pub fn load() -> Result<Self> {
        match std::env::var("PONTO_CONFIG") {
            Ok(path) => Self::from_file(&path),
            Err(_) => {
                let config = config::Config::builder()
                    .add_source(config::Environment::with_prefix("PONTO").separator("__"))
                    .build()?;

                let cfg: Config = config.try_deserialize()?;
                Ok(cfg)
            }
        }
    }

    /// Load from a specific file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("PONTO").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
