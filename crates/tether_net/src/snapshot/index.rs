//! Sequence lookup strategies for [`SnapshotStore`](super::SnapshotStore).
//!
//! The store keeps its ring; an index only answers "which slot holds
//! sequence N". A backward scan is fine for a few hundred slots. Larger
//! histories can switch to a hash index without touching callers.

use std::collections::HashMap;
use std::fmt;

use super::WorldSnapshot;

/// Read-only view of the store's ring buffer.
#[derive(Clone, Copy)]
pub struct RingView<'a> {
    slots: &'a [Option<WorldSnapshot>],
    write_index: usize,
    count: usize,
}

impl<'a> RingView<'a> {
    pub(crate) const fn new(
        slots: &'a [Option<WorldSnapshot>],
        write_index: usize,
        count: usize,
    ) -> Self {
        Self {
            slots,
            write_index,
            count,
        }
    }

    /// Filled slot count.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// True if nothing is stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Snapshot in `slot`, if filled.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&'a WorldSnapshot> {
        self.slots.get(slot)?.as_ref()
    }

    /// `(slot, snapshot)` pairs from newest to oldest.
    pub fn newest_first(&self) -> impl Iterator<Item = (usize, &'a WorldSnapshot)> + 'a {
        let slots = self.slots;
        let capacity = slots.len();
        let write_index = self.write_index;
        (0..self.count).filter_map(move |i| {
            let slot = (write_index + capacity - 1 - i) % capacity;
            slots[slot].as_ref().map(|snapshot| (slot, snapshot))
        })
    }
}

/// Maps sequence numbers to ring slots.
pub trait SnapshotIndex: Send + Sync + fmt::Debug {
    /// Called after `sequence` was written to `slot`, replacing `evicted`.
    fn inserted(&mut self, sequence: u32, slot: usize, evicted: Option<u32>);

    /// Slot holding `sequence`, if retained.
    fn slot_of(&self, ring: RingView<'_>, sequence: u32) -> Option<usize>;

    /// Forgets everything.
    fn clear(&mut self);
}

/// Scans newest to oldest, stopping at the first unfilled or
/// never-sequenced slot. O(capacity) per lookup, no bookkeeping.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearScan;

impl SnapshotIndex for LinearScan {
    fn inserted(&mut self, _sequence: u32, _slot: usize, _evicted: Option<u32>) {}

    fn slot_of(&self, ring: RingView<'_>, sequence: u32) -> Option<usize> {
        ring.newest_first()
            .take_while(|(_, snapshot)| snapshot.sequence != 0)
            .find(|(_, snapshot)| snapshot.sequence == sequence)
            .map(|(slot, _)| slot)
    }

    fn clear(&mut self) {}
}

/// Hash map from sequence to slot. O(1) lookups.
#[derive(Clone, Debug, Default)]
pub struct SequenceMap {
    slots: HashMap<u32, usize>,
}

impl SnapshotIndex for SequenceMap {
    fn inserted(&mut self, sequence: u32, slot: usize, evicted: Option<u32>) {
        if let Some(old) = evicted {
            self.slots.remove(&old);
        }
        self.slots.insert(sequence, slot);
    }

    fn slot_of(&self, ring: RingView<'_>, sequence: u32) -> Option<usize> {
        let slot = *self.slots.get(&sequence)?;
        // Guard against a stale entry surviving a missed eviction.
        ring.get(slot)
            .filter(|snapshot| snapshot.sequence == sequence)
            .map(|_| slot)
    }

    fn clear(&mut self) {
        self.slots.clear();
    }
}
