//! # Wall Clock
//!
//! Snapshot history, lag compensation and prediction all stamp state with
//! nanosecond wall time. Going through [`Clock`] lets tests pin time to
//! exact values instead of sleeping.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of nanosecond timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in nanoseconds.
    fn now_ns(&self) -> u64;
}

/// Real wall time (nanoseconds since the Unix epoch).
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        // A clock set before 1970 reads as zero rather than failing.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, duration_to_ns)
    }
}

/// Manually driven clock for deterministic tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `start_ns`.
    #[must_use]
    pub const fn new(start_ns: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ns),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now_ns: u64) {
        self.now.store(now_ns, Ordering::SeqCst);
    }

    /// Moves time forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_to_ns(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Converts a duration to whole nanoseconds, saturating at `u64::MAX`.
#[inline]
#[must_use]
pub fn duration_to_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Converts nanoseconds to a duration.
#[inline]
#[must_use]
pub const fn ns_to_duration(ns: u64) -> Duration {
    Duration::from_nanos(ns)
}
