//! # Simulation Tick Loop
//!
//! Fixed-rate timer for the simulation side: drain input queues, step the
//! world, capture a snapshot, broadcast. The loop blocks only on its own
//! timer, never on a connection.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::DEFAULT_TICK_RATE;

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickStats {
    /// Minimum tick duration observed.
    pub min_tick_us: u64,
    /// Maximum tick duration observed.
    pub max_tick_us: u64,
    /// Average tick duration (rolling).
    pub avg_tick_us: u64,
    /// Ticks that took longer than the budget.
    pub late_ticks: u64,
    /// Deadlines skipped after falling behind.
    pub skipped_ticks: u64,
    /// Total ticks measured.
    pub total_ticks: u64,
}

impl TickStats {
    fn fresh(budget: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: budget.as_micros() as u64,
            late_ticks: 0,
            skipped_ticks: 0,
            total_ticks: 0,
        }
    }
}

/// Fixed-rate tick controller.
#[derive(Debug)]
pub struct TickLoop {
    tick_duration: Duration,
    next_deadline: Instant,
    tick_count: u64,
    stats: TickStats,
}

impl TickLoop {
    /// Creates a loop ticking `tick_rate` times per second (minimum 1).
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        Self {
            tick_duration,
            next_deadline: Instant::now() + tick_duration,
            tick_count: 0,
            stats: TickStats::fresh(tick_duration),
        }
    }

    /// Sleeps until the next tick is due.
    ///
    /// A loop that fell more than one tick behind resynchronises instead of
    /// bursting through the missed deadlines.
    pub async fn wait_for_next_tick(&mut self) {
        tokio::time::sleep_until(self.next_deadline).await;
        let now = Instant::now();
        self.next_deadline += self.tick_duration;
        if self.next_deadline < now {
            let behind = now.duration_since(self.next_deadline);
            let skipped = (behind.as_micros() / self.tick_duration.as_micros().max(1)) as u64 + 1;
            self.stats.skipped_ticks += skipped;
            self.next_deadline = now + self.tick_duration;
            debug!(skipped, "tick loop fell behind");
        }
    }

    /// Marks the start of a tick. Returns the start time for
    /// [`end_tick`](Self::end_tick).
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.tick_count += 1;
        Instant::now()
    }

    /// Marks the end of a tick and records its duration.
    pub fn end_tick(&mut self, start: Instant) {
        let duration = start.elapsed();
        let duration_us = duration.as_micros() as u64;

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(duration_us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(duration_us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + duration_us) / 16;

        if duration > self.tick_duration {
            self.stats.late_ticks += 1;
        }
    }

    /// Ticks started so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Target tick duration.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Resets statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TickStats::fresh(self.tick_duration);
    }
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_RATE)
    }
}
