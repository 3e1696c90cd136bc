//! Entity-level difference between two snapshots.

use std::collections::BTreeMap;

use tether_core::KINEMATIC_EPSILON;

use super::{EntitySnapshot, WorldSnapshot};

/// What changed between two retained snapshots.
///
/// `added` is always a subset of the keys of `changed`. Entities kept in
/// both snapshots only appear in `changed` when their position or velocity
/// moved by at least [`KINEMATIC_EPSILON`]; component blobs are not diffed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotDelta {
    /// Base sequence.
    pub from_sequence: u32,
    /// Target sequence.
    pub to_sequence: u32,
    /// Target snapshot time (ns).
    pub timestamp_ns: u64,
    /// Present in the target only (ascending).
    pub added: Vec<u64>,
    /// Present in the base only (ascending).
    pub removed: Vec<u64>,
    /// Added or materially changed entities, as they are in the target.
    pub changed: BTreeMap<u64, EntitySnapshot>,
}

impl SnapshotDelta {
    /// Diffs `from` against `to`.
    #[must_use]
    pub fn compute(from: &WorldSnapshot, to: &WorldSnapshot) -> Self {
        let mut delta = Self {
            from_sequence: from.sequence,
            to_sequence: to.sequence,
            timestamp_ns: to.timestamp_ns,
            ..Self::default()
        };

        for (&id, entity) in &to.entities {
            match from.entities.get(&id) {
                None => {
                    delta.added.push(id);
                    delta.changed.insert(id, entity.clone());
                }
                Some(before) if !before.kinematics_match(entity, KINEMATIC_EPSILON) => {
                    delta.changed.insert(id, entity.clone());
                }
                Some(_) => {}
            }
        }

        delta.removed = from
            .entities
            .keys()
            .filter(|id| !to.entities.contains_key(id))
            .copied()
            .collect();

        delta
    }

    /// Rebuilds the target snapshot from `base`: drop `removed`, overlay
    /// `changed`, and take the target's sequence and time.
    #[must_use]
    pub fn apply(&self, base: &WorldSnapshot) -> WorldSnapshot {
        let mut result = base.clone();
        for id in &self.removed {
            result.entities.remove(id);
        }
        for (&id, entity) in &self.changed {
            result.entities.insert(id, entity.clone());
        }
        result.stamp(self.to_sequence, self.timestamp_ns);
        result
    }

    /// True if nothing was added, removed or changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}
