//! # TETHER Net - Real-Time State Synchronization
//!
//! Authoritative server, predictive client, and the snapshot history both
//! sides lean on.
//!
//! ## Architecture
//!
//! - **Protocol**: little-endian binary codec, `u32` length-prefixed frames
//! - **Transport**: TCP server/client; network tasks hand decoded messages
//!   to the simulation through bounded drop-on-full queues
//! - **Snapshots**: ring of world captures with lookup, interpolation and
//!   delta compression
//! - **Prediction**: client runs ahead of the server and replays pending
//!   inputs when corrected
//! - **Lag compensation**: hits are judged against the world the shooter saw
//! - **Sync helpers**: send-on-change animation state, predict-then-confirm
//!   projectiles
//!
//! ## Data Flow
//!
//! ```text
//! CLIENT                                   SERVER
//!   |                                        |
//!   |--- InputCommand (seq n) ------------->|  input queue ─► tick
//!   |  predict locally                       |  snapshot store ◄─┘
//!   |<-- StateUpdate (seq m) ---------------|  broadcast
//!   |  reconcile                             |
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use tether_net::config::NetConfig;
//! use tether_net::protocol::StateUpdate;
//! use tether_net::transport::Server;
//! use tether_core::Position;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NetConfig::default();
//! let server = Server::bind(config.server).await?;
//!
//! let update = StateUpdate::new(1, 0).with_component(&Position::new(3.0, 4.0));
//! let sequence = server.broadcast_state_update(update)?;
//! assert_eq!(sequence, 0);
//!
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod lag;
pub mod prediction;
pub mod protocol;
pub mod snapshot;
pub mod sync;
pub mod tick;
pub mod transport;

pub use config::NetConfig;
pub use error::{
    CodecError, ConfigError, LagCompensationError, PredictionError, ProjectileError,
    SnapshotError, TransportError,
};
pub use lag::{HitValidation, LagCompensator, RewindResult};
pub use prediction::{ClientPredictor, PredictedState, PredictionPhase, ReconcileOutcome};
pub use protocol::{ComponentData, InputCommand, StateUpdate};
pub use snapshot::{EntitySnapshot, SnapshotDelta, SnapshotStore, WorldSnapshot};
pub use tick::{TickLoop, TickStats};
pub use transport::{Client, ClientEvent, LeaveReason, PlayerId, Server, ServerEvent};

/// Simulation tick rate used by the relay server (updates per second).
///
/// At 20Hz, each tick is 50ms; the default prediction history of 128
/// inputs covers 6.4s.
pub const DEFAULT_TICK_RATE: u32 = 20;
