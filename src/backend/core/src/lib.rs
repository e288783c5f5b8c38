#![allow(clippy::result_large_err)]
//! # Ponto Core
//!
//! Time-clock event recording with server-authoritative timestamps.
//!
//! ## Architecture
//!
//! - **Clock**: Reference-backed UTC clock with a freshness-window cache,
//!   ordered failover and host-clock fallback
//! - **Skew**: Tolerance check deciding whether a client's claimed time is used
//! - **Record**: Assembly of immutable event records with audit metadata
//! - **Store**: Append-only record persistence (JSON file, in-memory)
//! - **Authority**: The service tying the above together
//! - **API**: Axum routes for time sync and event submission
//! - **Telemetry**: Structured logging and Prometheus metrics

pub mod api;
pub mod authority;
pub mod clock;
pub mod config;
pub mod error;
pub mod record;
pub mod skew;
pub mod store;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorSeverity, PontoError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::authority::{AuthoritativeTime, TimeAuthority};
    pub use crate::clock::{
        AuthoritativeClock, ClockReading, ClockSource, ClockStatus, HostClock, ManualHostClock,
        SystemHostClock, TimeReference,
    };
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, ErrorContext, ErrorSeverity, PontoError, Result};
    pub use crate::record::{EventInput, EventRecord, EventRecorder, IdSource, UuidIdSource};
    pub use crate::skew::{Confidence, SkewDecision, SkewPolicy};
    pub use crate::store::{InMemoryStore, JsonFileStore, RecordStore};
}
