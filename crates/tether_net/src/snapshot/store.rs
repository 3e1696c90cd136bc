//! Fixed-capacity ring of world snapshots.

use std::sync::Arc;

use parking_lot::RwLock;
use tether_core::{Clock, SystemClock};
use tracing::trace;

use super::index::{LinearScan, RingView, SnapshotIndex};
use super::{EntitySnapshot, SnapshotDelta, WorldSnapshot};
use crate::config::SnapshotConfig;
use crate::error::{SnapshotError, SnapshotResult};

/// Smallest ring that can bracket an interpolation.
const MIN_CAPACITY: usize = 2;

#[derive(Debug)]
struct Ring {
    slots: Vec<Option<WorldSnapshot>>,
    write_index: usize,
    count: usize,
    next_sequence: u32,
    index: Box<dyn SnapshotIndex>,
}

impl Ring {
    fn view(&self) -> RingView<'_> {
        RingView::new(&self.slots, self.write_index, self.count)
    }

    fn at_sequence(&self, sequence: u32) -> Option<&WorldSnapshot> {
        let view = self.view();
        let slot = self.index.slot_of(view, sequence)?;
        view.get(slot)
    }

    fn at_sequence_or_err(&self, sequence: u32) -> SnapshotResult<&WorldSnapshot> {
        self.at_sequence(sequence)
            .ok_or(SnapshotError::SequenceNotFound(sequence))
    }
}

/// Snapshot history shared by interpolation, delta compression and lag
/// compensation.
///
/// Writers take an exclusive lock, readers a shared one. Every accessor
/// returns owned copies so callers never hold the lock.
#[derive(Debug)]
pub struct SnapshotStore {
    ring: RwLock<Ring>,
    clock: Arc<dyn Clock>,
}

impl SnapshotStore {
    /// Creates a store holding `capacity` snapshots (minimum 2), stamped with
    /// wall time.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    /// Creates a store from configuration.
    #[must_use]
    pub fn from_config(config: &SnapshotConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_clock(config.capacity, clock)
    }

    /// Creates a store stamping snapshots with `clock`.
    #[must_use]
    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self::with_index(capacity, clock, Box::new(LinearScan))
    }

    /// Creates a store with a specific sequence lookup strategy.
    #[must_use]
    pub fn with_index(
        capacity: usize,
        clock: Arc<dyn Clock>,
        index: Box<dyn SnapshotIndex>,
    ) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            ring: RwLock::new(Ring {
                slots: vec![None; capacity],
                write_index: 0,
                count: 0,
                next_sequence: 1,
                index,
            }),
            clock,
        }
    }

    /// Clock used for stamping.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Stores `snapshot`, overwriting the oldest slot when full.
    ///
    /// The snapshot and every entity in it are stamped with the next
    /// sequence number and the current time. Returns the sequence.
    pub fn add_snapshot(&self, mut snapshot: WorldSnapshot) -> u32 {
        let now = self.clock.now_ns();
        let mut ring = self.ring.write();

        let sequence = ring.next_sequence;
        // Zero marks an unfilled slot, so it is skipped on wrap.
        ring.next_sequence = match sequence.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        snapshot.stamp(sequence, now);

        let slot = ring.write_index;
        let evicted = ring.slots[slot]
            .replace(snapshot)
            .map(|old| old.sequence);
        ring.index.inserted(sequence, slot, evicted);

        let capacity = ring.slots.len();
        ring.write_index = (slot + 1) % capacity;
        ring.count = (ring.count + 1).min(capacity);

        trace!(sequence, slot, ?evicted, "snapshot stored");
        sequence
    }

    /// Copy of the snapshot with `sequence`.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::SequenceNotFound`] if it was never stored or has
    /// been evicted.
    pub fn get_snapshot_at_sequence(&self, sequence: u32) -> SnapshotResult<WorldSnapshot> {
        self.ring.read().at_sequence_or_err(sequence).cloned()
    }

    /// Copy of the snapshot whose timestamp is closest to `time_ns`. Ties go
    /// to the newer snapshot.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::Empty`] if nothing is stored.
    pub fn get_snapshot_at_time(&self, time_ns: u64) -> SnapshotResult<WorldSnapshot> {
        let ring = self.ring.read();
        let mut best: Option<(&WorldSnapshot, u64)> = None;
        for (_, snapshot) in ring.view().newest_first() {
            let diff = snapshot.timestamp_ns.abs_diff(time_ns);
            if !best.is_some_and(|(_, best_diff)| diff >= best_diff) {
                best = Some((snapshot, diff));
            }
        }
        best.map(|(snapshot, _)| snapshot.clone())
            .ok_or(SnapshotError::Empty)
    }

    /// Entity state at `render_time_ns`, interpolated between the two
    /// retained snapshots containing the entity that bracket that time.
    ///
    /// Outside the retained range the nearest capture is returned as is.
    /// Position and velocity are blended; component blobs and the sequence
    /// come from the later capture.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::Empty`] if nothing is stored,
    /// [`SnapshotError::EntityNotFound`] if no retained snapshot has it.
    pub fn interpolate_entity(
        &self,
        entity_id: u64,
        render_time_ns: u64,
    ) -> SnapshotResult<EntitySnapshot> {
        let ring = self.ring.read();
        if ring.count == 0 {
            return Err(SnapshotError::Empty);
        }

        let mut before: Option<&EntitySnapshot> = None;
        let mut after: Option<&EntitySnapshot> = None;
        for (_, snapshot) in ring.view().newest_first() {
            let Some(entity) = snapshot.entities.get(&entity_id) else {
                continue;
            };
            if snapshot.timestamp_ns <= render_time_ns
                && !before.is_some_and(|b| b.timestamp_ns >= snapshot.timestamp_ns)
            {
                before = Some(entity);
            }
            if snapshot.timestamp_ns >= render_time_ns
                && !after.is_some_and(|a| a.timestamp_ns <= snapshot.timestamp_ns)
            {
                after = Some(entity);
            }
        }

        match (before, after) {
            (Some(b), Some(a)) if a.timestamp_ns > b.timestamp_ns => {
                let span = (a.timestamp_ns - b.timestamp_ns) as f64;
                let t = ((render_time_ns - b.timestamp_ns) as f64 / span).clamp(0.0, 1.0);
                Ok(EntitySnapshot {
                    entity_id,
                    timestamp_ns: render_time_ns,
                    sequence: a.sequence,
                    position: b.position.lerp(a.position, t),
                    velocity: b.velocity.lerp(a.velocity, t),
                    components: a.components.clone(),
                })
            }
            (Some(only), _) | (None, Some(only)) => Ok(only.clone()),
            (None, None) => Err(SnapshotError::EntityNotFound(entity_id)),
        }
    }

    /// Difference between two retained snapshots.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::SequenceNotFound`] if either is not retained.
    pub fn create_delta(&self, from_sequence: u32, to_sequence: u32) -> SnapshotResult<SnapshotDelta> {
        let ring = self.ring.read();
        let from = ring.at_sequence_or_err(from_sequence)?;
        let to = ring.at_sequence_or_err(to_sequence)?;
        Ok(SnapshotDelta::compute(from, to))
    }

    /// Rebuilds a snapshot by applying `delta` on top of retained
    /// `base_sequence`.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::SequenceNotFound`] if the base is not retained.
    pub fn apply_delta(&self, base_sequence: u32, delta: &SnapshotDelta) -> SnapshotResult<WorldSnapshot> {
        let ring = self.ring.read();
        let base = ring.at_sequence_or_err(base_sequence)?;
        Ok(delta.apply(base))
    }

    /// Copy of the newest snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<WorldSnapshot> {
        let ring = self.ring.read();
        let latest = ring.view().newest_first().next().map(|(_, s)| s.clone());
        latest
    }

    /// Retained sequence numbers, oldest first.
    #[must_use]
    pub fn sequences(&self) -> Vec<u32> {
        let ring = self.ring.read();
        let mut sequences: Vec<u32> = ring.view().newest_first().map(|(_, s)| s.sequence).collect();
        sequences.reverse();
        sequences
    }

    /// Retained snapshot count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.read().count
    }

    /// True if nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ring size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.read().slots.len()
    }

    /// Drops every snapshot. Sequence numbering continues where it was.
    pub fn clear(&self) {
        let mut ring = self.ring.write();
        ring.slots.iter_mut().for_each(|slot| *slot = None);
        ring.write_index = 0;
        ring.count = 0;
        ring.index.clear();
    }
}
