//! The time authority service.
//!
//! Ties the clock, the skew policy, the recorder and the store together into
//! the three operations the HTTP layer exposes.

use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

use crate::clock::{self, AuthoritativeClock, ClockReading, ClockSource, ClockStatus};
use crate::error::Result;
use crate::record::{EventInput, EventRecord, EventRecorder};
use crate::skew::SkewPolicy;
use crate::store::RecordStore;
use crate::telemetry::RecordMetrics;

/// Current authoritative time as served to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthoritativeTime {
    #[serde(rename = "serverIso")]
    pub iso: String,
    #[serde(rename = "serverEpochMs")]
    pub epoch_millis: i64,
    pub source: ClockSource,
}

impl AuthoritativeTime {
    fn from_reading(reading: ClockReading) -> Self {
        Self {
            iso: clock::iso_from_millis(reading.epoch_millis()),
            epoch_millis: reading.epoch_millis(),
            source: reading.source(),
        }
    }

    /// The clock reading this answer was built from.
    pub fn reading(&self) -> ClockReading {
        match self.source {
            ClockSource::Reference => ClockReading::FromReference(self.epoch_millis),
            ClockSource::Host => ClockReading::FromHostFallback(self.epoch_millis),
        }
    }
}

pub struct TimeAuthority {
    clock: Arc<AuthoritativeClock>,
    policy: SkewPolicy,
    recorder: EventRecorder,
    store: Arc<dyn RecordStore>,
}

impl std::fmt::Debug for TimeAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeAuthority")
            .field("clock", &self.clock)
            .field("policy", &self.policy)
            .field("recorder", &self.recorder)
            .field("store", &self.store.name())
            .finish()
    }
}

impl TimeAuthority {
    pub fn new(
        clock: Arc<AuthoritativeClock>,
        policy: SkewPolicy,
        recorder: EventRecorder,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            clock,
            policy,
            recorder,
            store,
        }
    }

    pub fn clock(&self) -> &AuthoritativeClock {
        &self.clock
    }

    pub fn clock_status(&self) -> ClockStatus {
        self.clock.status()
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Current authoritative time. Never fails.
    pub async fn get_authoritative_time(&self) -> AuthoritativeTime {
        AuthoritativeTime::from_reading(self.clock.now().await)
    }

    /// Record one event with a server-chosen official timestamp.
    ///
    /// Clock trouble and rejected client claims never fail the submission;
    /// only a store failure does, and then nothing was committed.
    pub async fn submit_event(&self, input: EventInput) -> Result<EventRecord> {
        let reading = self.clock.now().await;
        self.submit_event_at(input, reading).await
    }

    /// [`submit_event`](Self::submit_event) against a reading the caller
    /// already took.
    #[instrument(skip(self, input), fields(record_id = tracing::field::Empty))]
    pub async fn submit_event_at(
        &self,
        input: EventInput,
        reading: ClockReading,
    ) -> Result<EventRecord> {
        let decision = self
            .policy
            .resolve(input.approx_server_claim(), reading.epoch_millis());

        if decision.claim_present {
            RecordMetrics::record_skew(decision.accepted, decision.skew_millis.unwrap_or(0));
            if !decision.accepted {
                tracing::info!(
                    skew_millis = ?decision.skew_millis,
                    tolerance_millis = self.policy.tolerance_millis(),
                    "Client time claim rejected; using authoritative time"
                );
            }
        }

        let record = self.recorder.record(&input, &decision, reading.source());
        tracing::Span::current().record("record_id", record.id.as_str());

        if let Err(error) = self.store.append(&record).await {
            tracing::error!(
                store = self.store.name(),
                error = %error,
                "Record could not be persisted"
            );
            return Err(error);
        }

        RecordMetrics::record_persisted(&record.kind);
        tracing::info!(
            user = %record.user,
            kind = %record.kind,
            official_timestamp = %record.official_timestamp,
            accepted_client_time = decision.accepted,
            degraded_clock = reading.is_degraded(),
            "Event recorded"
        );

        Ok(record)
    }

    /// Every stored record, unchanged.
    pub async fn list_events(&self) -> Result<Vec<EventRecord>> {
        self.store.list_all().await
    }
}
