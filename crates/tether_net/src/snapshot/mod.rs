//! # Snapshot System
//!
//! Time-indexed history of whole-world captures, held in a fixed ring.
//!
//! ```text
//! add_snapshot ──► stamp (sequence, now) ──► ring slot (oldest evicted)
//!                                               │
//!            ┌──────────────────┬───────────────┼──────────────────┐
//!            ▼                  ▼               ▼                  ▼
//!   at_sequence (index)   at_time (nearest)  interpolate_entity  create_delta
//!                               │            (bracketing pair)   (from ─► to)
//!                               ▼
//!                    LagCompensator rewind
//! ```
//!
//! Sequence lookups go through a swappable [`SnapshotIndex`]. Time lookups
//! and interpolation walk the ring newest first.

mod delta;
mod index;
mod store;

pub use delta::SnapshotDelta;
pub use index::{LinearScan, RingView, SequenceMap, SnapshotIndex};
pub use store::SnapshotStore;

use std::collections::BTreeMap;

use tether_core::{Component, Position, Velocity};

use crate::error::CodecResult;
use crate::protocol::{ComponentData, StateUpdate};

/// One entity as captured in a snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntitySnapshot {
    /// Entity.
    pub entity_id: u64,
    /// Capture time (ns). Inherited from the owning snapshot.
    pub timestamp_ns: u64,
    /// Inherited from the owning snapshot.
    pub sequence: u32,
    /// Interpolated position.
    pub position: Position,
    /// Interpolated velocity.
    pub velocity: Velocity,
    /// Opaque component blobs keyed by wire type name. Never interpolated.
    pub components: BTreeMap<String, Vec<u8>>,
}

impl EntitySnapshot {
    /// Creates an entity capture with no extra components.
    #[must_use]
    pub fn new(entity_id: u64, position: Position, velocity: Velocity) -> Self {
        Self {
            entity_id,
            position,
            velocity,
            ..Self::default()
        }
    }

    /// Attaches a typed component blob.
    #[must_use]
    pub fn with_component<C: Component>(mut self, component: &C) -> Self {
        self.components
            .insert(C::KIND.type_name().to_owned(), component.encode());
        self
    }

    /// True if position and velocity both match `other` within `epsilon`.
    #[must_use]
    pub fn kinematics_match(&self, other: &Self, epsilon: f64) -> bool {
        self.position.approx_eq(other.position, epsilon)
            && self.velocity.approx_eq(other.velocity, epsilon)
    }

    /// Builds the wire update for this entity: position, velocity, then the
    /// component blobs in type-name order.
    #[must_use]
    pub fn to_state_update(&self) -> StateUpdate {
        let mut update = StateUpdate::new(self.entity_id, self.timestamp_ns)
            .with_component(&self.position)
            .with_component(&self.velocity);
        update.sequence = self.sequence;
        update.components.extend(
            self.components
                .iter()
                .map(|(name, data)| ComponentData::new(name.clone(), data.clone())),
        );
        update
    }

    /// Reads an entity back from a wire update. Missing kinematics default
    /// to zero; every other component is kept as an opaque blob.
    ///
    /// # Errors
    ///
    /// Fails if the position or velocity blob has the wrong length.
    pub fn from_state_update(update: &StateUpdate) -> CodecResult<Self> {
        let mut entity = Self {
            entity_id: update.entity_id,
            timestamp_ns: update.timestamp_ns,
            sequence: update.sequence,
            position: update.get::<Position>()?.unwrap_or_default(),
            velocity: update.get::<Velocity>()?.unwrap_or_default(),
            components: BTreeMap::new(),
        };
        let position = Position::KIND.type_name();
        let velocity = Velocity::KIND.type_name();
        for component in &update.components {
            if component.type_name != position && component.type_name != velocity {
                entity
                    .components
                    .insert(component.type_name.clone(), component.data.clone());
            }
        }
        Ok(entity)
    }
}

/// Capture of every entity at one instant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorldSnapshot {
    /// Capture time (ns).
    pub timestamp_ns: u64,
    /// Store-assigned sequence (starts at 1; 0 means "not yet stored").
    pub sequence: u32,
    /// Entities by ID.
    pub entities: BTreeMap<u64, EntitySnapshot>,
}

impl WorldSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an entity.
    pub fn insert(&mut self, entity: EntitySnapshot) {
        self.entities.insert(entity.entity_id, entity);
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with_entity(mut self, entity: EntitySnapshot) -> Self {
        self.insert(entity);
        self
    }

    /// Looks up an entity.
    #[must_use]
    pub fn entity(&self, entity_id: u64) -> Option<&EntitySnapshot> {
        self.entities.get(&entity_id)
    }

    /// Number of captured entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if no entities were captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Sets the snapshot's sequence and time, and pushes both down onto
    /// every entity.
    pub(crate) fn stamp(&mut self, sequence: u32, timestamp_ns: u64) {
        self.sequence = sequence;
        self.timestamp_ns = timestamp_ns;
        for entity in self.entities.values_mut() {
            entity.sequence = sequence;
            entity.timestamp_ns = timestamp_ns;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::Health;

    #[test]
    fn test_stamp_propagates_to_entities() {
        let mut snapshot = WorldSnapshot::new()
            .with_entity(EntitySnapshot::new(1, Position::ZERO, Velocity::ZERO))
            .with_entity(EntitySnapshot::new(2, Position::new(1.0, 1.0), Velocity::ZERO));
        snapshot.stamp(7, 1_000);

        assert_eq!(snapshot.sequence, 7);
        for entity in snapshot.entities.values() {
            assert_eq!(entity.sequence, 7);
            assert_eq!(entity.timestamp_ns, 1_000);
        }
    }

    #[test]
    fn test_state_update_conversion() {
        let mut entity = EntitySnapshot::new(42, Position::new(3.0, 4.0), Velocity::new(1.0, 0.0))
            .with_component(&Health::new(80.0, 100.0));
        entity.sequence = 9;
        entity.timestamp_ns = 123;

        let update = entity.to_state_update();
        assert_eq!(update.components.len(), 3);
        assert_eq!(update.sequence, 9);

        let back = EntitySnapshot::from_state_update(&update).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_kinematics_match_ignores_components() {
        let a = EntitySnapshot::new(1, Position::new(1.0, 1.0), Velocity::ZERO);
        let b = EntitySnapshot::new(1, Position::new(1.0005, 1.0), Velocity::ZERO)
            .with_component(&Health::new(1.0, 100.0));
        assert!(a.kinematics_match(&b, tether_core::KINEMATIC_EPSILON));

        let c = EntitySnapshot::new(1, Position::new(1.01, 1.0), Velocity::ZERO);
        assert!(!a.kinematics_match(&c, tether_core::KINEMATIC_EPSILON));
    }
}
