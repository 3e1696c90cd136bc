//! # Component System
//!
//! Components are pure data containers with no behavior beyond their wire
//! encoding. Each one has a constant encoded length; decoding a buffer of any
//! other length is rejected outright instead of guessing at what went wrong.
//!
//! | Component  | Bytes | Layout (little-endian)      |
//! |------------|-------|-----------------------------|
//! | `Position` | 16    | x: f64, y: f64              |
//! | `Velocity` | 16    | vx: f64, vy: f64            |
//! | `Health`   | 16    | current: f64, max: f64      |
//! | `Stats`    | 24    | speed, armor, power: f64    |
//! | `Team`     | 8     | id: u64                     |
//! | `Level`    | 8     | level: u32, experience: u32 |
//! | `Attack`   | 8     | damage: u32, cooldown: u32  |
//! | `Item`     | 8     | item_id: u32, quantity: u32 |
//! | `Input`    | 2     | dx: i8, dy: i8              |

use bytemuck::{Pod, Zeroable};

use crate::codec::ComponentKind;
use crate::error::{ComponentError, ComponentResult};

/// Marker trait for wire components.
///
/// Components must be:
/// - `Copy` + `Pod`: bitwise copyable, no heap data
/// - fixed size: `ENCODED_LEN` bytes on the wire, always
pub trait Component: Copy + Pod + Zeroable + Default + PartialEq + Send + Sync + 'static {
    /// Registry entry (wire type string) of this component.
    const KIND: ComponentKind;

    /// Exact number of bytes in the encoding.
    const ENCODED_LEN: usize;

    /// Writes the encoding into `out`, which is exactly `ENCODED_LEN` long.
    fn write_le(&self, out: &mut [u8]);

    /// Reads the encoding from `bytes`, which is exactly `ENCODED_LEN` long.
    fn read_le(bytes: &[u8]) -> Self;

    /// Encodes the component into a fresh buffer.
    #[must_use]
    fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::ENCODED_LEN];
        self.write_le(&mut out);
        out
    }

    /// Decodes the component, rejecting any buffer that isn't exactly
    /// `ENCODED_LEN` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::LengthMismatch`] on a wrong-sized buffer.
    fn decode(bytes: &[u8]) -> ComponentResult<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(ComponentError::LengthMismatch {
                component: Self::KIND.type_name(),
                expected: Self::ENCODED_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self::read_le(bytes))
    }
}

#[inline]
fn put_f64(out: &mut [u8], at: usize, value: f64) {
    out[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn get_f64(bytes: &[u8], at: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    f64::from_le_bytes(raw)
}

#[inline]
fn put_u32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn get_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

/// Position component.
///
/// World-space 2D position. Shared by prediction, snapshots and lag
/// compensation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

impl Position {
    /// Origin.
    pub const ZERO: Self = Self::new(0.0, 0.0);

    /// Creates a new position.
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Returns the squared distance to another position.
    ///
    /// This avoids the sqrt call for distance comparisons.
    #[inline]
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Euclidean distance to another position.
    #[inline]
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Linear interpolation towards `other` (`t` is not clamped).
    #[inline]
    #[must_use]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        Self::new(lerp(self.x, other.x, t), lerp(self.y, other.y, t))
    }

    /// Position after moving at `velocity` for `dt` seconds.
    #[inline]
    #[must_use]
    pub fn advanced(self, velocity: Velocity, dt: f64) -> Self {
        Self::new(self.x + velocity.vx * dt, self.y + velocity.vy * dt)
    }

    /// True if both axes differ by less than `epsilon`.
    #[inline]
    #[must_use]
    pub fn approx_eq(self, other: Self, epsilon: f64) -> bool {
        (self.x - other.x).abs() < epsilon && (self.y - other.y).abs() < epsilon
    }
}

impl Component for Position {
    const KIND: ComponentKind = ComponentKind::Position;
    const ENCODED_LEN: usize = 16;

    fn write_le(&self, out: &mut [u8]) {
        put_f64(out, 0, self.x);
        put_f64(out, 8, self.y);
    }

    fn read_le(bytes: &[u8]) -> Self {
        Self::new(get_f64(bytes, 0), get_f64(bytes, 8))
    }
}

/// Velocity component.
///
/// Movement speed in world units per second.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Velocity {
    /// X velocity.
    pub vx: f64,
    /// Y velocity.
    pub vy: f64,
}

impl Velocity {
    /// At rest.
    pub const ZERO: Self = Self::new(0.0, 0.0);

    /// Creates a new velocity.
    #[inline]
    #[must_use]
    pub const fn new(vx: f64, vy: f64) -> Self {
        Self { vx, vy }
    }

    /// Component-wise sum.
    #[inline]
    #[must_use]
    pub fn plus(self, other: Self) -> Self {
        Self::new(self.vx + other.vx, self.vy + other.vy)
    }

    /// Component-wise difference (`self - other`).
    #[inline]
    #[must_use]
    pub fn minus(self, other: Self) -> Self {
        Self::new(self.vx - other.vx, self.vy - other.vy)
    }

    /// Linear interpolation towards `other` (`t` is not clamped).
    #[inline]
    #[must_use]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        Self::new(lerp(self.vx, other.vx, t), lerp(self.vy, other.vy, t))
    }

    /// True if both axes differ by less than `epsilon`.
    #[inline]
    #[must_use]
    pub fn approx_eq(self, other: Self, epsilon: f64) -> bool {
        (self.vx - other.vx).abs() < epsilon && (self.vy - other.vy).abs() < epsilon
    }
}

impl Component for Velocity {
    const KIND: ComponentKind = ComponentKind::Velocity;
    const ENCODED_LEN: usize = 16;

    fn write_le(&self, out: &mut [u8]) {
        put_f64(out, 0, self.vx);
        put_f64(out, 8, self.vy);
    }

    fn read_le(bytes: &[u8]) -> Self {
        Self::new(get_f64(bytes, 0), get_f64(bytes, 8))
    }
}

/// Health component.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Health {
    /// Remaining hit points.
    pub current: f64,
    /// Maximum hit points.
    pub max: f64,
}

impl Health {
    /// Creates a new health value.
    #[inline]
    #[must_use]
    pub const fn new(current: f64, max: f64) -> Self {
        Self { current, max }
    }

    /// True once hit points are exhausted.
    #[inline]
    #[must_use]
    pub fn is_depleted(self) -> bool {
        self.current <= 0.0
    }
}

impl Component for Health {
    const KIND: ComponentKind = ComponentKind::Health;
    const ENCODED_LEN: usize = 16;

    fn write_le(&self, out: &mut [u8]) {
        put_f64(out, 0, self.current);
        put_f64(out, 8, self.max);
    }

    fn read_le(bytes: &[u8]) -> Self {
        Self::new(get_f64(bytes, 0), get_f64(bytes, 8))
    }
}

/// Derived character stats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Stats {
    /// Movement speed multiplier.
    pub speed: f64,
    /// Damage reduction.
    pub armor: f64,
    /// Outgoing damage multiplier.
    pub power: f64,
}

impl Stats {
    /// Creates a new stats block.
    #[inline]
    #[must_use]
    pub const fn new(speed: f64, armor: f64, power: f64) -> Self {
        Self { speed, armor, power }
    }
}

impl Component for Stats {
    const KIND: ComponentKind = ComponentKind::Stats;
    const ENCODED_LEN: usize = 24;

    fn write_le(&self, out: &mut [u8]) {
        put_f64(out, 0, self.speed);
        put_f64(out, 8, self.armor);
        put_f64(out, 16, self.power);
    }

    fn read_le(bytes: &[u8]) -> Self {
        Self::new(get_f64(bytes, 0), get_f64(bytes, 8), get_f64(bytes, 16))
    }
}

/// Team membership.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Team {
    /// Team identifier.
    pub id: u64,
}

impl Component for Team {
    const KIND: ComponentKind = ComponentKind::Team;
    const ENCODED_LEN: usize = 8;

    fn write_le(&self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.id.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        Self {
            id: u64::from_le_bytes(raw),
        }
    }
}

/// Character level and progress towards the next one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Level {
    /// Current level.
    pub level: u32,
    /// Experience accumulated within the level.
    pub experience: u32,
}

impl Component for Level {
    const KIND: ComponentKind = ComponentKind::Level;
    const ENCODED_LEN: usize = 8;

    fn write_le(&self, out: &mut [u8]) {
        put_u32(out, 0, self.level);
        put_u32(out, 4, self.experience);
    }

    fn read_le(bytes: &[u8]) -> Self {
        Self {
            level: get_u32(bytes, 0),
            experience: get_u32(bytes, 4),
        }
    }
}

/// Attack capability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Attack {
    /// Damage per hit.
    pub damage: u32,
    /// Minimum time between attacks, in milliseconds.
    pub cooldown_ms: u32,
}

impl Component for Attack {
    const KIND: ComponentKind = ComponentKind::Attack;
    const ENCODED_LEN: usize = 8;

    fn write_le(&self, out: &mut [u8]) {
        put_u32(out, 0, self.damage);
        put_u32(out, 4, self.cooldown_ms);
    }

    fn read_le(bytes: &[u8]) -> Self {
        Self {
            damage: get_u32(bytes, 0),
            cooldown_ms: get_u32(bytes, 4),
        }
    }
}

/// Held or dropped item stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Item {
    /// Item definition ID.
    pub item_id: u32,
    /// Stack size.
    pub quantity: u32,
}

impl Component for Item {
    const KIND: ComponentKind = ComponentKind::Item;
    const ENCODED_LEN: usize = 8;

    fn write_le(&self, out: &mut [u8]) {
        put_u32(out, 0, self.item_id);
        put_u32(out, 4, self.quantity);
    }

    fn read_le(bytes: &[u8]) -> Self {
        Self {
            item_id: get_u32(bytes, 0),
            quantity: get_u32(bytes, 4),
        }
    }
}

/// Directional input, quantized to one signed byte per axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Input {
    /// Horizontal axis (-128..=127).
    pub dx: i8,
    /// Vertical axis (-128..=127).
    pub dy: i8,
}

impl Input {
    /// Creates a new input.
    #[inline]
    #[must_use]
    pub const fn new(dx: i8, dy: i8) -> Self {
        Self { dx, dy }
    }

    /// Axis values normalized to roughly [-1, 1].
    #[inline]
    #[must_use]
    pub fn normalized(self) -> (f64, f64) {
        (f64::from(self.dx) / 127.0, f64::from(self.dy) / 127.0)
    }
}

impl Component for Input {
    const KIND: ComponentKind = ComponentKind::Input;
    const ENCODED_LEN: usize = 2;

    fn write_le(&self, out: &mut [u8]) {
        out[0] = self.dx.to_le_bytes()[0];
        out[1] = self.dy.to_le_bytes()[0];
    }

    fn read_le(bytes: &[u8]) -> Self {
        Self::new(i8::from_le_bytes([bytes[0]]), i8::from_le_bytes([bytes[1]]))
    }
}

/// Linear interpolation.
#[inline]
fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_sizes() {
        assert_eq!(Position::default().encode().len(), 16);
        assert_eq!(Velocity::default().encode().len(), 16);
        assert_eq!(Health::default().encode().len(), 16);
        assert_eq!(Stats::default().encode().len(), 24);
        assert_eq!(Team::default().encode().len(), 8);
        assert_eq!(Level::default().encode().len(), 8);
        assert_eq!(Attack::default().encode().len(), 8);
        assert_eq!(Item::default().encode().len(), 8);
        assert_eq!(Input::default().encode().len(), 2);
    }

    #[test]
    fn test_position_layout_is_little_endian() {
        let bytes = Position::new(1.0, -2.5).encode();
        assert_eq!(&bytes[..8], &1.0f64.to_le_bytes());
        assert_eq!(&bytes[8..], &(-2.5f64).to_le_bytes());
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let mut bytes = Stats::new(1.0, 2.0, 3.0).encode();
        bytes.push(0);

        let err = Stats::decode(&bytes).unwrap_err();
        assert_eq!(
            err,
            ComponentError::LengthMismatch {
                component: "stats",
                expected: 24,
                actual: 25,
            }
        );

        assert!(Input::decode(&[1]).is_err());
        assert!(Team::decode(&[]).is_err());
    }

    fn assert_codec<C: Component + std::fmt::Debug>(value: C) {
        let bytes = value.encode();
        assert_eq!(bytes.len(), C::ENCODED_LEN);
        assert_eq!(C::decode(&bytes).unwrap(), value);

        let mismatch = |actual| ComponentError::LengthMismatch {
            component: C::KIND.type_name(),
            expected: C::ENCODED_LEN,
            actual,
        };
        assert_eq!(C::decode(&bytes[..bytes.len() - 1]), Err(mismatch(bytes.len() - 1)));
        let mut long = bytes;
        long.push(0xAB);
        assert_eq!(C::decode(&long), Err(mismatch(long.len())));
    }

    #[test]
    fn test_every_component_roundtrips() {
        assert_codec(Position::new(-1.25e9, 3.5));
        assert_codec(Velocity::new(f64::MAX, -0.0));
        assert_codec(Health::new(12.5, 100.0));
        assert_codec(Stats::new(1.5, 20.0, 0.25));
        assert_codec(Team { id: u64::MAX - 1 });
        assert_codec(Level { level: 7, experience: 1234 });
        assert_codec(Attack { damage: 40, cooldown_ms: 750 });
        assert_codec(Item { item_id: u32::MAX, quantity: 3 });
        assert_codec(Input::new(-128, 127));
    }

    #[test]
    fn test_position_math() {
        let a = Position::new(100.0, 100.0);
        let b = Position::new(110.0, 100.0);
        assert!((a.distance(b) - 10.0).abs() < f64::EPSILON);

        let mid = a.lerp(b, 0.5);
        assert!(mid.approx_eq(Position::new(105.0, 100.0), 1e-9));

        let moved = a.advanced(Velocity::new(10.0, -20.0), 0.5);
        assert!(moved.approx_eq(Position::new(105.0, 90.0), 1e-9));
    }

    #[test]
    fn test_velocity_math() {
        let v = Velocity::new(1.0, 2.0).plus(Velocity::new(0.5, -1.0));
        assert_eq!(v, Velocity::new(1.5, 1.0));
        assert_eq!(v.minus(Velocity::new(1.5, 1.0)), Velocity::ZERO);
    }
}
