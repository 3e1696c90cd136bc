//! # TETHER Core
//!
//! Data model shared by every layer of the synchronization core:
//!
//! - **Kinematics**: 2D [`Position`] and [`Velocity`] in f64, the minimal state
//!   carried by snapshots and client prediction
//! - **Components**: fixed-size gameplay components with constant-length
//!   little-endian encodings (strict length checks catch corruption)
//! - **Clock**: nanosecond wall time behind a trait so history queries can be
//!   driven deterministically in tests
//!
//! ## Example
//!
//! ```rust
//! use tether_core::{Component, Health, Position};
//!
//! let bytes = Health::new(75.0, 100.0).encode();
//! assert_eq!(bytes.len(), Health::ENCODED_LEN);
//! assert_eq!(Health::decode(&bytes).unwrap().current, 75.0);
//!
//! let a = Position::new(0.0, 0.0);
//! assert_eq!(a.distance(Position::new(3.0, 4.0)), 5.0);
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod clock;
pub mod codec;
pub mod component;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock, duration_to_ns, ns_to_duration};
pub use codec::{AnyComponent, ComponentKind};
pub use component::{
    Attack, Component, Health, Input, Item, Level, Position, Stats, Team, Velocity,
};
pub use error::{ComponentError, ComponentResult};

/// Tolerance used when deciding whether two kinematic states are "the same".
///
/// Snapshot deltas exclude entities whose position and velocity moved less
/// than this on every axis.
pub const KINEMATIC_EPSILON: f64 = 1e-3;
