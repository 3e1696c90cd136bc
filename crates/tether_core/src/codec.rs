//! # Component Registry
//!
//! Maps wire type strings to the fixed-size component codecs. State updates
//! carry components as `(type, bytes)` pairs; unknown type strings travel
//! through the transport untouched and only fail here, when a consumer asks
//! for a typed value.

use std::fmt;

use crate::component::{
    Attack, Component, Health, Input, Item, Level, Position, Stats, Team, Velocity,
};
use crate::error::{ComponentError, ComponentResult};

/// Known component kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ComponentKind {
    /// [`Position`]
    Position,
    /// [`Velocity`]
    Velocity,
    /// [`Health`]
    Health,
    /// [`Stats`]
    Stats,
    /// [`Team`]
    Team,
    /// [`Level`]
    Level,
    /// [`Attack`]
    Attack,
    /// [`Item`]
    Item,
    /// [`Input`]
    Input,
}

impl ComponentKind {
    /// Every registered kind.
    pub const ALL: [Self; 9] = [
        Self::Position,
        Self::Velocity,
        Self::Health,
        Self::Stats,
        Self::Team,
        Self::Level,
        Self::Attack,
        Self::Item,
        Self::Input,
    ];

    /// Wire type string.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Velocity => "velocity",
            Self::Health => "health",
            Self::Stats => "stats",
            Self::Team => "team",
            Self::Level => "level",
            Self::Attack => "attack",
            Self::Item => "item",
            Self::Input => "input",
        }
    }

    /// Looks up a kind by wire type string.
    #[must_use]
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_name() == name)
    }

    /// Constant encoded length of this kind.
    #[must_use]
    pub const fn encoded_len(self) -> usize {
        match self {
            Self::Position => Position::ENCODED_LEN,
            Self::Velocity => Velocity::ENCODED_LEN,
            Self::Health => Health::ENCODED_LEN,
            Self::Stats => Stats::ENCODED_LEN,
            Self::Team => Team::ENCODED_LEN,
            Self::Level => Level::ENCODED_LEN,
            Self::Attack => Attack::ENCODED_LEN,
            Self::Item => Item::ENCODED_LEN,
            Self::Input => Input::ENCODED_LEN,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A decoded component of any registered kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AnyComponent {
    /// Position.
    Position(Position),
    /// Velocity.
    Velocity(Velocity),
    /// Health.
    Health(Health),
    /// Stats.
    Stats(Stats),
    /// Team.
    Team(Team),
    /// Level.
    Level(Level),
    /// Attack.
    Attack(Attack),
    /// Item.
    Item(Item),
    /// Input.
    Input(Input),
}

impl AnyComponent {
    /// Decodes `bytes` as the component named by `type_name`.
    ///
    /// # Errors
    ///
    /// [`ComponentError::UnknownComponent`] for an unregistered type string,
    /// [`ComponentError::LengthMismatch`] for a wrong-sized buffer.
    pub fn decode(type_name: &str, bytes: &[u8]) -> ComponentResult<Self> {
        let kind = ComponentKind::from_type_name(type_name)
            .ok_or_else(|| ComponentError::UnknownComponent(type_name.to_owned()))?;

        Ok(match kind {
            ComponentKind::Position => Self::Position(Position::decode(bytes)?),
            ComponentKind::Velocity => Self::Velocity(Velocity::decode(bytes)?),
            ComponentKind::Health => Self::Health(Health::decode(bytes)?),
            ComponentKind::Stats => Self::Stats(Stats::decode(bytes)?),
            ComponentKind::Team => Self::Team(Team::decode(bytes)?),
            ComponentKind::Level => Self::Level(Level::decode(bytes)?),
            ComponentKind::Attack => Self::Attack(Attack::decode(bytes)?),
            ComponentKind::Item => Self::Item(Item::decode(bytes)?),
            ComponentKind::Input => Self::Input(Input::decode(bytes)?),
        })
    }

    /// Kind of the wrapped component.
    #[must_use]
    pub const fn kind(&self) -> ComponentKind {
        match self {
            Self::Position(_) => ComponentKind::Position,
            Self::Velocity(_) => ComponentKind::Velocity,
            Self::Health(_) => ComponentKind::Health,
            Self::Stats(_) => ComponentKind::Stats,
            Self::Team(_) => ComponentKind::Team,
            Self::Level(_) => ComponentKind::Level,
            Self::Attack(_) => ComponentKind::Attack,
            Self::Item(_) => ComponentKind::Item,
            Self::Input(_) => ComponentKind::Input,
        }
    }

    /// Encodes the wrapped component.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Position(c) => c.encode(),
            Self::Velocity(c) => c.encode(),
            Self::Health(c) => c.encode(),
            Self::Stats(c) => c.encode(),
            Self::Team(c) => c.encode(),
            Self::Level(c) => c.encode(),
            Self::Attack(c) => c.encode(),
            Self::Item(c) => c.encode(),
            Self::Input(c) => c.encode(),
        }
    }
}

macro_rules! impl_from_component {
    ($($ty:ident),* $(,)?) => {
        $(
            impl From<$ty> for AnyComponent {
                fn from(value: $ty) -> Self {
                    Self::$ty(value)
                }
            }
        )*
    };
}

impl_from_component!(Position, Velocity, Health, Stats, Team, Level, Attack, Item, Input);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_resolve() {
        for kind in ComponentKind::ALL {
            assert_eq!(ComponentKind::from_type_name(kind.type_name()), Some(kind));
        }
        assert_eq!(ComponentKind::from_type_name("Position"), None);
        assert_eq!(ComponentKind::from_type_name(""), None);
    }

    #[test]
    fn test_decode_by_name() {
        let bytes = Team { id: 3 }.encode();
        let decoded = AnyComponent::decode("team", &bytes).unwrap();
        assert_eq!(decoded, AnyComponent::Team(Team { id: 3 }));
        assert_eq!(decoded.kind(), ComponentKind::Team);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let err = AnyComponent::decode("shield", &[0; 8]).unwrap_err();
        assert_eq!(err, ComponentError::UnknownComponent("shield".into()));
    }

    #[test]
    fn test_length_checked_through_registry() {
        // A position-sized buffer handed to a team decoder.
        let bytes = Position::new(1.0, 2.0).encode();
        let err = AnyComponent::decode("team", &bytes).unwrap_err();
        assert!(matches!(
            err,
            ComponentError::LengthMismatch { expected: 8, actual: 16, .. }
        ));
    }

    #[test]
    fn test_encoded_len_table() {
        assert_eq!(ComponentKind::Stats.encoded_len(), 24);
        assert_eq!(ComponentKind::Input.encoded_len(), 2);
        assert_eq!(AnyComponent::from(Item::default()).kind(), ComponentKind::Item);
    }
}
