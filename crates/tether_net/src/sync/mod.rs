//! # Delta-Sync Helpers
//!
//! Narrow, bandwidth-lean sync for state that doesn't need full snapshots:
//!
//! - [`animation`]: send-on-change packets, buffered and reordered on the
//!   receiving side
//! - [`projectile`]: predict-then-confirm projectiles with short position
//!   histories

pub mod animation;
pub mod projectile;

pub use animation::{
    AnimationBatch, AnimationKind, AnimationPacket, AnimationReceiver, AnimationSender,
    ANIMATION_BATCH_HEADER_LEN, ANIMATION_PACKET_LEN, MAX_FRAME_INDEX,
};
pub use projectile::{ProjectileSample, ProjectileTracker, PruneReport, PrunerHandle};
