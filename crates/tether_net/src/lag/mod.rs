//! # Lag Compensation
//!
//! Server-side rewind over the snapshot history. A shot is judged against
//! the world as the shooter saw it, `latency` ago, not against current
//! server truth.
//!
//! ```text
//! server now ─────────────────────────────────────────► t
//!              ▲ target = now - clamp(latency, min, max)
//!              │
//!        nearest snapshot ──► target's historical position
//!                             │
//!                  |hit - position| <= radius ?
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tether_core::{duration_to_ns, Position};
use tracing::{debug, trace};

use crate::config::LagCompensationConfig;
use crate::error::{LagCompensationError, LagResult};
use crate::snapshot::{SnapshotStore, WorldSnapshot};

/// Outcome of a rewind.
#[derive(Clone, Debug, PartialEq)]
pub struct RewindResult {
    /// Snapshot nearest to the target time.
    pub snapshot: WorldSnapshot,
    /// Latency asked for.
    pub requested: Duration,
    /// Latency used after clamping.
    pub effective: Duration,
    /// True if `requested` was outside the bounds.
    pub was_clamped: bool,
    /// `now - effective` (ns).
    pub target_time_ns: u64,
}

/// Outcome of a hit check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HitValidation {
    /// Hit accepted.
    pub hit: bool,
    /// Distance from the claimed hit point to the target's rewound position.
    pub distance: f64,
    /// Target position in the rewound snapshot.
    pub target_position: Position,
    /// Sequence of the rewound snapshot.
    pub sequence: u32,
    /// True if the latency was clamped.
    pub was_clamped: bool,
}

/// Lag compensator counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LagStats {
    /// Successful rewinds.
    pub rewinds: u64,
    /// Rewinds whose latency was clamped.
    pub clamped: u64,
    /// Hits accepted.
    pub hits_accepted: u64,
    /// Hits rejected on distance.
    pub hits_rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    rewinds: AtomicU64,
    clamped: AtomicU64,
    hits_accepted: AtomicU64,
    hits_rejected: AtomicU64,
}

/// Rewinds a shared [`SnapshotStore`] by client latency.
#[derive(Debug)]
pub struct LagCompensator {
    store: Arc<SnapshotStore>,
    bounds: RwLock<LagCompensationConfig>,
    counters: Counters,
}

impl LagCompensator {
    /// Wraps `store` with the given latency bounds.
    #[must_use]
    pub fn new(store: Arc<SnapshotStore>, bounds: LagCompensationConfig) -> Self {
        Self {
            store,
            bounds: RwLock::new(bounds),
            counters: Counters::default(),
        }
    }

    /// Snapshot store being rewound.
    #[must_use]
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Current bounds.
    #[must_use]
    pub fn bounds(&self) -> LagCompensationConfig {
        *self.bounds.read()
    }

    /// Replaces the bounds (e.g. switching to
    /// [`LagCompensationConfig::high_latency`]).
    pub fn set_bounds(&self, bounds: LagCompensationConfig) {
        *self.bounds.write() = bounds;
    }

    /// Clamps `latency` into the bounds, returning the effective latency and
    /// whether clamping happened.
    #[must_use]
    pub fn clamp_latency(&self, latency: Duration) -> (Duration, bool) {
        let bounds = self.bounds();
        let (min, max) = (bounds.min_compensation(), bounds.max_compensation());
        if latency > max {
            (max, true)
        } else if latency < min {
            (min, true)
        } else {
            (latency, false)
        }
    }

    /// Snapshot nearest to `now - clamp(latency)`.
    ///
    /// # Errors
    ///
    /// [`LagCompensationError::NoSnapshot`] if the store is empty.
    pub fn rewind_to_player_time(&self, latency: Duration) -> LagResult<RewindResult> {
        let (effective, was_clamped) = self.clamp_latency(latency);
        let now = self.store.clock().now_ns();
        let target_time_ns = now.saturating_sub(duration_to_ns(effective));

        let snapshot = self
            .store
            .get_snapshot_at_time(target_time_ns)
            .map_err(|_| LagCompensationError::NoSnapshot { target_time_ns })?;

        self.counters.rewinds.fetch_add(1, Ordering::Relaxed);
        if was_clamped {
            self.counters.clamped.fetch_add(1, Ordering::Relaxed);
            debug!(
                requested_ms = latency.as_millis() as u64,
                effective_ms = effective.as_millis() as u64,
                "latency clamped"
            );
        }

        Ok(RewindResult {
            snapshot,
            requested: latency,
            effective,
            was_clamped,
            target_time_ns,
        })
    }

    /// Checks a hit claim against the rewound world.
    ///
    /// Both entities must exist in the rewound snapshot. The hit is accepted
    /// if `hit_position` lies within `radius` of the target's rewound
    /// position.
    ///
    /// # Errors
    ///
    /// [`LagCompensationError::NoSnapshot`] if nothing can be rewound to,
    /// [`LagCompensationError::EntityAbsent`] if either entity is missing.
    pub fn validate_hit(
        &self,
        attacker_id: u64,
        target_id: u64,
        hit_position: Position,
        latency: Duration,
        radius: f64,
    ) -> LagResult<HitValidation> {
        let rewind = self.rewind_to_player_time(latency)?;
        let sequence = rewind.snapshot.sequence;
        let absent = |entity_id| LagCompensationError::EntityAbsent { entity_id, sequence };

        rewind.snapshot.entity(attacker_id).ok_or_else(|| absent(attacker_id))?;
        let target = rewind.snapshot.entity(target_id).ok_or_else(|| absent(target_id))?;

        let distance = hit_position.distance(target.position);
        let hit = distance <= radius;
        if hit {
            self.counters.hits_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.hits_rejected.fetch_add(1, Ordering::Relaxed);
        }
        trace!(attacker_id, target_id, sequence, distance, radius, hit, "hit validated");

        Ok(HitValidation {
            hit,
            distance,
            target_position: target.position,
            sequence,
            was_clamped: rewind.was_clamped,
        })
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> LagStats {
        LagStats {
            rewinds: self.counters.rewinds.load(Ordering::Relaxed),
            clamped: self.counters.clamped.load(Ordering::Relaxed),
            hits_accepted: self.counters.hits_accepted.load(Ordering::Relaxed),
            hits_rejected: self.counters.hits_rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::EntitySnapshot;
    use tether_core::{ManualClock, Velocity};

    fn compensator() -> (LagCompensator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000_000_000));
        let store = Arc::new(SnapshotStore::with_clock(16, clock.clone()));
        (
            LagCompensator::new(store, LagCompensationConfig::default()),
            clock,
        )
    }

    #[test]
    fn test_clamp_latency() {
        let (lag, _) = compensator();
        assert_eq!(
            lag.clamp_latency(Duration::from_secs(2)),
            (Duration::from_millis(500), true)
        );
        assert_eq!(
            lag.clamp_latency(Duration::from_millis(1)),
            (Duration::from_millis(10), true)
        );
        assert_eq!(
            lag.clamp_latency(Duration::from_millis(100)),
            (Duration::from_millis(100), false)
        );

        lag.set_bounds(LagCompensationConfig::high_latency());
        assert_eq!(
            lag.clamp_latency(Duration::from_secs(2)),
            (Duration::from_secs(2), false)
        );
    }

    #[test]
    fn test_empty_store_has_no_snapshot() {
        let (lag, _) = compensator();
        assert!(matches!(
            lag.rewind_to_player_time(Duration::from_millis(100)),
            Err(LagCompensationError::NoSnapshot { .. })
        ));
    }

    #[test]
    fn test_missing_attacker() {
        let (lag, clock) = compensator();
        let sequence = lag.store().add_snapshot(WorldSnapshot::new().with_entity(
            EntitySnapshot::new(2, Position::ZERO, Velocity::ZERO),
        ));
        clock.advance(Duration::from_millis(100));

        assert_eq!(
            lag.validate_hit(1, 2, Position::ZERO, Duration::from_millis(100), 1.0),
            Err(LagCompensationError::EntityAbsent {
                entity_id: 1,
                sequence
            })
        );
    }
}
