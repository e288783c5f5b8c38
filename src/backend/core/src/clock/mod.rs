//! Authoritative clock.
//!
//! Produces the best available approximation of true UTC time:
//!
//! 1. A cached reference reading younger than the freshness window is
//!    extrapolated forward by local monotonic elapsed time.
//! 2. Otherwise references are queried in priority order, each bounded by
//!    its own timeout; the first success replaces the cached reading.
//! 3. If every reference fails, the host wall clock is returned and nothing
//!    is cached, so the next call tries the references again. Callers that
//!    were already queued behind that failed refresh share its outcome and
//!    answer from the host clock without querying again.
//!
//! `now()` never fails. Degraded answers are tagged
//! [`ClockReading::FromHostFallback`].

pub mod cache;
pub mod host;
pub mod reference;

pub use cache::{ClockCache, TimeReading};
pub use host::{HostClock, ManualHostClock, SystemHostClock};
pub use reference::{HttpDateReference, ReferenceError, SntpReference, TimeReference};

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ClockConfig;
use crate::error::{PontoError, Result};
use crate::telemetry::ClockMetrics;

/// Where a clock reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSource {
    Reference,
    Host,
}

/// Result of one `now()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockReading {
    /// Fresh reference reading, or a cached one extrapolated.
    FromReference(i64),
    /// Every reference failed; host wall clock.
    FromHostFallback(i64),
}

impl ClockReading {
    pub fn epoch_millis(&self) -> i64 {
        match *self {
            Self::FromReference(ms) | Self::FromHostFallback(ms) => ms,
        }
    }

    pub fn source(&self) -> ClockSource {
        match self {
            Self::FromReference(_) => ClockSource::Reference,
            Self::FromHostFallback(_) => ClockSource::Host,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::FromHostFallback(_))
    }
}

/// Snapshot of the clock for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ClockStatus {
    pub cached: bool,
    pub fresh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading_age_millis: Option<u64>,
    pub consecutive_host_fallbacks: u64,
    pub references: Vec<String>,
}

impl ClockStatus {
    /// The last `now()` call had to fall back to the host clock.
    pub fn is_degraded(&self) -> bool {
        self.consecutive_host_fallbacks > 0
    }
}

/// Server-trusted source of current time.
pub struct AuthoritativeClock {
    references: Vec<Arc<dyn TimeReference>>,
    cache: ClockCache,
    host: Arc<dyn HostClock>,
    /// Serializes refreshes so concurrent stale readers issue one round of queries.
    refresh: tokio::sync::Mutex<()>,
    /// Bumped when a refresh round finishes, successful or not.
    refresh_generation: AtomicU64,
    last_round_failed: AtomicBool,
    consecutive_fallbacks: AtomicU64,
}

impl std::fmt::Debug for AuthoritativeClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthoritativeClock")
            .field(
                "references",
                &self.references.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("cache", &self.cache)
            .finish()
    }
}

impl AuthoritativeClock {
    pub fn new(
        references: Vec<Arc<dyn TimeReference>>,
        freshness_window: Duration,
        host: Arc<dyn HostClock>,
    ) -> Self {
        Self {
            references,
            cache: ClockCache::new(freshness_window),
            host,
            refresh: tokio::sync::Mutex::new(()),
            refresh_generation: AtomicU64::new(0),
            last_round_failed: AtomicBool::new(false),
            consecutive_fallbacks: AtomicU64::new(0),
        }
    }

    /// Build the clock from configuration with the system host clock.
    pub fn from_config(config: &ClockConfig) -> Result<Self> {
        let references = config
            .references
            .iter()
            .map(|r| {
                reference::from_config(r).map_err(|e| {
                    PontoError::configuration("A clock reference could not be built")
                        .with_internal_message(format!("{:?}: {}", r, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if references.is_empty() {
            tracing::warn!("No clock references configured; serving host time only");
        }

        Ok(Self::new(
            references,
            config.freshness_window,
            Arc::new(SystemHostClock::new()),
        ))
    }

    /// Best available current time.
    pub async fn now(&self) -> ClockReading {
        if let Some(ms) = self.cache.fresh_now(self.host.monotonic_millis()) {
            ClockMetrics::record_cache_hit();
            return ClockReading::FromReference(ms);
        }

        let seen_generation = self.refresh_generation.load(Ordering::Acquire);
        let _refresh = self.refresh.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(ms) = self.cache.fresh_now(self.host.monotonic_millis()) {
            ClockMetrics::record_cache_hit();
            return ClockReading::FromReference(ms);
        }

        // A round finished while we waited and left nothing fresh: every
        // reference just failed, so share that outcome.
        if self.refresh_generation.load(Ordering::Acquire) != seen_generation
            && self.last_round_failed.load(Ordering::Acquire)
        {
            ClockMetrics::record_host_fallback();
            return ClockReading::FromHostFallback(self.host.wall_millis());
        }

        let reading = self.refresh_from_references().await;
        self.last_round_failed
            .store(reading.is_degraded(), Ordering::Release);
        self.refresh_generation.fetch_add(1, Ordering::Release);
        reading
    }

    /// One failover round over every reference. Caller holds `refresh`.
    async fn refresh_from_references(&self) -> ClockReading {
        for reference in &self.references {
            match tokio::time::timeout(reference.timeout(), reference.query()).await {
                Ok(Ok(epoch_millis)) if epoch_millis >= 0 => {
                    let reading = TimeReading {
                        epoch_millis,
                        obtained_at: self.host.monotonic_millis(),
                    };
                    self.cache.store(reading, reference.name());
                    self.consecutive_fallbacks.store(0, Ordering::Relaxed);
                    ClockMetrics::record_query(reference.name(), "ok");
                    tracing::debug!(
                        reference = reference.name(),
                        epoch_millis,
                        host_offset_millis = epoch_millis - self.host.wall_millis(),
                        "Clock refreshed from reference"
                    );
                    return ClockReading::FromReference(epoch_millis);
                }
                Ok(Ok(epoch_millis)) => {
                    ClockMetrics::record_query(reference.name(), "error");
                    tracing::warn!(
                        reference = reference.name(),
                        epoch_millis,
                        "Reference returned a pre-epoch time; trying next"
                    );
                }
                Ok(Err(error)) => {
                    ClockMetrics::record_query(reference.name(), "error");
                    tracing::warn!(
                        reference = reference.name(),
                        error = %error,
                        "Reference query failed; trying next"
                    );
                }
                Err(_) => {
                    ClockMetrics::record_query(reference.name(), "timeout");
                    tracing::warn!(
                        reference = reference.name(),
                        timeout_ms = reference.timeout().as_millis() as u64,
                        "Reference query timed out; trying next"
                    );
                }
            }
        }

        let fallbacks = self.consecutive_fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
        let host_now = self.host.wall_millis();
        ClockMetrics::record_host_fallback();
        tracing::warn!(
            references = self.references.len(),
            consecutive_fallbacks = fallbacks,
            "All clock references unavailable; using host clock"
        );
        ClockReading::FromHostFallback(host_now)
    }

    pub fn status(&self) -> ClockStatus {
        let monotonic_now = self.host.monotonic_millis();
        let snapshot = self.cache.snapshot();
        ClockStatus {
            cached: snapshot.is_some(),
            fresh: self.cache.fresh_now(monotonic_now).is_some(),
            reading_age_millis: snapshot
                .as_ref()
                .map(|(r, _)| monotonic_now.saturating_sub(r.obtained_at)),
            reference: snapshot.map(|(_, name)| name),
            consecutive_host_fallbacks: self.consecutive_fallbacks.load(Ordering::Relaxed),
            references: self.references.iter().map(|r| r.name().to_string()).collect(),
        }
    }

    pub fn freshness_window(&self) -> Duration {
        self.cache.freshness_window()
    }
}

/// Whether `epoch_millis` can be rendered as a calendar timestamp.
pub fn is_representable(epoch_millis: i64) -> bool {
    Utc.timestamp_millis_opt(epoch_millis).single().is_some()
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-01-01T12:00:00.000Z`.
///
/// Values outside chrono's range render as the Unix epoch; callers only
/// pass authoritative or range-checked values.
pub fn iso_from_millis(epoch_millis: i64) -> String {
    Utc.timestamp_millis_opt(epoch_millis)
        .single()
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
