//! Clock Capability
//!
//! Wall-clock access for the rate limiter, message timestamps, request
//! timestamps and the fingerprint's time zone. Everything that needs "now"
//! receives a [`Clock`] at construction, so tests can drive time by hand.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use chrono::{Local, Offset};

/// Source of the current time in Unix epoch milliseconds
pub trait Clock: Send + Sync {
    /// Current time (Unix timestamp ms)
    fn now_ms(&self) -> u64;

    /// Local offset from UTC in minutes
    fn utc_offset_minutes(&self) -> i32 {
        0
    }
}

/// Clock backed by the system wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn utc_offset_minutes(&self) -> i32 {
        Local::now().offset().fix().local_minus_utc() / 60
    }
}

/// Manually advanced clock
///
/// Starts at the given instant and only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    offset_minutes: AtomicI32,
}

impl ManualClock {
    /// Create a clock frozen at `start_ms`
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
            offset_minutes: AtomicI32::new(0),
        }
    }

    /// Pretend to run in a time zone `minutes` ahead of UTC
    #[must_use]
    pub fn with_utc_offset(self, minutes: i32) -> Self {
        self.offset_minutes.store(minutes, Ordering::SeqCst);
        self
    }

    /// Move the clock forward
    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jump to an absolute instant
    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn utc_offset_minutes(&self) -> i32 {
        self.offset_minutes.load(Ordering::SeqCst)
    }
}
