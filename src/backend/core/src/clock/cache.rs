//! Single-slot cache for the last reference reading.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;

/// One successful reference query.
///
/// `obtained_at` is a [`HostClock::monotonic_millis`](super::HostClock::monotonic_millis)
/// value. It only ages the reading and is never sent anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeReading {
    pub epoch_millis: i64,
    pub obtained_at: u64,
}

impl TimeReading {
    /// Reading extrapolated to `monotonic_now` by local elapsed time.
    pub fn extrapolate(&self, monotonic_now: u64) -> i64 {
        let elapsed = monotonic_now.saturating_sub(self.obtained_at);
        self.epoch_millis
            .saturating_add(i64::try_from(elapsed).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone)]
struct Entry {
    reading: TimeReading,
    reference: String,
}

/// Process-wide cache holding at most one [`TimeReading`].
///
/// The reading and the name of the reference that produced it live under
/// one lock, so a reader never sees halves of two different queries.
#[derive(Debug)]
pub struct ClockCache {
    entry: Mutex<Option<Entry>>,
    freshness_window: Duration,
}

impl ClockCache {
    pub fn new(freshness_window: Duration) -> Self {
        Self {
            entry: Mutex::new(None),
            freshness_window,
        }
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    fn is_fresh(&self, reading: &TimeReading, monotonic_now: u64) -> bool {
        let age = monotonic_now.saturating_sub(reading.obtained_at);
        u128::from(age) < self.freshness_window.as_millis()
    }

    /// Extrapolated time if the cached reading is younger than the window.
    pub fn fresh_now(&self, monotonic_now: u64) -> Option<i64> {
        let entry = self.entry.lock();
        entry
            .as_ref()
            .filter(|e| self.is_fresh(&e.reading, monotonic_now))
            .map(|e| e.reading.extrapolate(monotonic_now))
    }

    /// Replace whatever is cached.
    pub fn store(&self, reading: TimeReading, reference: impl Into<String>) {
        *self.entry.lock() = Some(Entry {
            reading,
            reference: reference.into(),
        });
    }

    /// Cached reading and its reference name, fresh or not.
    pub fn snapshot(&self) -> Option<(TimeReading, String)> {
        self.entry
            .lock()
            .as_ref()
            .map(|e| (e.reading, e.reference.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.entry.lock().is_none()
    }
}
