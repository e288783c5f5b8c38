//! Host clock access.
//!
//! The authoritative clock needs two readings from the host: wall time (the
//! fallback when every reference is down) and a monotonic counter (to age
//! and extrapolate the cached reading). Both sit behind [`HostClock`] so
//! tests can drive them by hand.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of host wall time and monotonic elapsed time.
pub trait HostClock: Send + Sync {
    /// Host wall clock, Unix epoch milliseconds.
    fn wall_millis(&self) -> i64;

    /// Milliseconds on a monotonic counter with an arbitrary origin.
    fn monotonic_millis(&self) -> u64;
}

/// Production host clock backed by `chrono::Utc` and `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct SystemHostClock {
    origin: Instant,
}

impl SystemHostClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemHostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for SystemHostClock {
    fn wall_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn monotonic_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Hand-driven host clock for tests and simulations.
///
/// `advance` moves wall and monotonic time together; `set_wall` moves only
/// the wall clock, the way an operator changing the system time would.
#[derive(Debug, Default)]
pub struct ManualHostClock {
    wall: AtomicI64,
    monotonic: AtomicU64,
}

impl ManualHostClock {
    pub fn new(wall_millis: i64) -> Self {
        Self {
            wall: AtomicI64::new(wall_millis),
            monotonic: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.monotonic.fetch_add(millis, Ordering::SeqCst);
        self.wall.fetch_add(millis as i64, Ordering::SeqCst);
    }

    pub fn set_wall(&self, wall_millis: i64) {
        self.wall.store(wall_millis, Ordering::SeqCst);
    }
}

impl HostClock for ManualHostClock {
    fn wall_millis(&self) -> i64 {
        self.wall.load(Ordering::SeqCst)
    }

    fn monotonic_millis(&self) -> u64 {
        self.monotonic.load(Ordering::SeqCst)
    }
}
