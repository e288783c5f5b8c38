//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ponto_core::clock::{AuthoritativeClock, ManualHostClock, ReferenceError, TimeReference};
use ponto_core::config::RecordConfig;
use ponto_core::error::{PontoError, Result};
use ponto_core::record::{EventRecord, EventRecorder, IdSource};
use ponto_core::skew::SkewPolicy;
use ponto_core::store::{InMemoryStore, RecordStore};
use ponto_core::authority::TimeAuthority;

/// 2024-01-01T00:00:00.000Z
pub const T0: i64 = 1_704_067_200_000;
pub const TOLERANCE_MILLIS: i64 = 600_000;

/// Reference answering a settable value; `None` fails.
pub struct StubReference {
    pub value: Mutex<Option<i64>>,
    calls: AtomicUsize,
}

impl StubReference {
    pub fn answering(value: i64) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(Some(value)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn down() -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeReference for StubReference {
    fn name(&self) -> &str {
        "stub"
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(100)
    }

    async fn query(&self) -> std::result::Result<i64, ReferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let value = *self.value.lock();
        value.ok_or_else(|| ReferenceError::Malformed("stub is down".to_string()))
    }
}

pub struct SequentialIds(AtomicUsize);

impl SequentialIds {
    pub fn new() -> Self {
        Self(AtomicUsize::new(1))
    }
}

impl IdSource for SequentialIds {
    fn new_id(&self) -> String {
        format!("rec-{}", self.0.fetch_add(1, Ordering::SeqCst))
    }
}

/// Store whose appends always fail.
pub struct FailingStore;

#[async_trait]
impl RecordStore for FailingStore {
    async fn append(&self, _record: &EventRecord) -> Result<()> {
        Err(PontoError::storage_write("disk full"))
    }

    async fn list_all(&self) -> Result<Vec<EventRecord>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

pub struct Fixture {
    pub authority: Arc<TimeAuthority>,
    pub host: Arc<ManualHostClock>,
    pub reference: Arc<StubReference>,
}

/// Authority over a stub reference and a manual host clock whose wall time
/// is an hour behind the reference.
pub fn fixture_with_store(reference: Arc<StubReference>, store: Arc<dyn RecordStore>) -> Fixture {
    let host = Arc::new(ManualHostClock::new(T0 - 3_600_000));
    let clock = AuthoritativeClock::new(
        vec![reference.clone() as Arc<dyn TimeReference>],
        Duration::from_secs(30),
        host.clone(),
    );
    let authority = TimeAuthority::new(
        Arc::new(clock),
        SkewPolicy::from_millis(TOLERANCE_MILLIS),
        EventRecorder::new(Arc::new(SequentialIds::new()), RecordConfig::default()),
        store,
    );

    Fixture {
        authority: Arc::new(authority),
        host,
        reference,
    }
}

pub fn fixture() -> Fixture {
    fixture_with_store(StubReference::answering(T0), Arc::new(InMemoryStore::new()))
}
