//! Send Rate Limiting
//!
//! Client-side throttle on outgoing messages. It implements:
//!
//! - A sliding window over the trailing `window_ms` interval
//! - A pure admission query separate from the recording step
//! - Retry hints for surfaces that want to show a countdown
//!
//! # Design
//!
//! A fixed bucket admits up to twice the limit around a bucket boundary.
//! The sliding window keeps the instant of every admitted send and counts
//! only the ones younger than the window, so at no point in time do more
//! than `max_messages` sends fall within any `window_ms` span.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use widget_core::clock::ManualClock;
//! use widget_core::rate_limit::{RateLimitConfig, SlidingWindowLimiter};
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let mut limiter = SlidingWindowLimiter::new(RateLimitConfig::strict(), clock.clone());
//!
//! if limiter.can_send() {
//!     limiter.record_send();
//! }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the send rate limiter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum sends admitted within one window
    pub max_messages: u32,

    /// Window length in milliseconds
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            window_ms: 60_000,
        }
    }
}

impl RateLimitConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum sends per window
    #[must_use]
    pub fn with_max_messages(mut self, max: u32) -> Self {
        self.max_messages = max;
        self
    }

    /// Set the window length
    #[must_use]
    pub fn with_window_ms(mut self, window_ms: u64) -> Self {
        self.window_ms = window_ms;
        self
    }

    /// Tighter limits used by the embedded deployment (5 per 30 s)
    #[must_use]
    pub fn strict() -> Self {
        Self {
            max_messages: 5,
            window_ms: 30_000,
        }
    }
}

// =============================================================================
// Sliding Window Limiter
// =============================================================================

/// Sliding-window send limiter
pub struct SlidingWindowLimiter {
    /// Configuration
    config: RateLimitConfig,

    /// Admitted send instants, oldest first (Unix timestamp ms)
    timestamps: VecDeque<u64>,

    /// Time source
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Create a new limiter
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            timestamps: VecDeque::with_capacity(config.max_messages as usize),
            clock,
        }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Whether a send attempted now would be admitted
    ///
    /// Pure query: does not record anything or prune the log.
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.in_window(self.clock.now_ms()) < self.config.max_messages as usize
    }

    /// Record an admitted send at the current instant
    ///
    /// Only call this after [`can_send`](Self::can_send) returned true for
    /// the same attempt.
    pub fn record_send(&mut self) {
        let now = self.clock.now_ms();
        self.timestamps.push_back(now);
        self.prune(now);

        tracing::debug!(
            in_window = self.timestamps.len(),
            max = self.config.max_messages,
            "Recorded send"
        );
    }

    /// Sends still available in the current window
    #[must_use]
    pub fn remaining(&self) -> u32 {
        let used = self.in_window(self.clock.now_ms());
        (self.config.max_messages as usize).saturating_sub(used) as u32
    }

    /// Milliseconds until the next send would be admitted (0 if now)
    ///
    /// A limit of zero admits nothing, ever; that reports `u64::MAX`.
    #[must_use]
    pub fn retry_after_ms(&self) -> u64 {
        let max = self.config.max_messages as usize;
        if max == 0 {
            return u64::MAX;
        }

        let now = self.clock.now_ms();
        let counted: Vec<u64> = self
            .timestamps
            .iter()
            .copied()
            .filter(|&t| self.counts(now, t))
            .collect();

        // The send that must age out is the one `max_messages` places from the newest
        match counted.len().checked_sub(max) {
            Some(index) => (counted[index] + self.config.window_ms).saturating_sub(now),
            None => 0,
        }
    }

    /// Forget all recorded sends
    pub fn reset(&mut self) {
        self.timestamps.clear();
    }

    /// Whether a send at `t` still counts against the window at `now`
    fn counts(&self, now: u64, t: u64) -> bool {
        now.saturating_sub(t) < self.config.window_ms
    }

    fn in_window(&self, now: u64) -> usize {
        self.timestamps.iter().filter(|&&t| self.counts(now, t)).count()
    }

    fn prune(&mut self, now: u64) {
        while let Some(&oldest) = self.timestamps.front() {
            if self.counts(now, oldest) {
                break;
            }
            self.timestamps.pop_front();
        }
    }
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("config", &self.config)
            .field("recorded", &self.timestamps.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
