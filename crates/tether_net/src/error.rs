//! # Error Types
//!
//! One error enum per concern. Nothing here is fatal to the process: every
//! failure either drops a unit of work or closes one connection.

use std::io;
use std::time::Duration;

use tether_core::ComponentError;
use thiserror::Error;

use crate::transport::PlayerId;

/// Malformed or unencodable wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer ended before a field could be read.
    #[error("truncated message: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required by the next field (or the fixed header).
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// A variable-length field does not fit its length prefix.
    #[error("{field} is {len} bytes, limit is {max}")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Actual length.
        len: usize,
        /// Largest length the prefix can carry.
        max: usize,
    },

    /// A string field is not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Field name.
        field: &'static str,
    },

    /// Frame length prefix exceeds the configured maximum.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Announced frame length.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// A bounded field holds an out-of-range value.
    #[error("invalid value {value} for {field}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u64,
    },

    /// Fixed-size component codec failure.
    #[error(transparent)]
    Component(#[from] ComponentError),
}

/// Connection and queue failures.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Peer sent data that could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Operation requires a live connection.
    #[error("not connected")]
    NotConnected,

    /// Connection refused because the server is at capacity.
    #[error("server full ({max_players} players)")]
    ServerFull {
        /// Configured player limit.
        max_players: usize,
    },

    /// Bounded queue had no room; the item was not enqueued.
    #[error("queue full")]
    QueueFull,

    /// Operation did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being waited on.
        operation: &'static str,
        /// How long we waited.
        after: Duration,
    },

    /// Peer closed the stream.
    #[error("connection closed")]
    ConnectionClosed,

    /// Server was already stopped.
    #[error("already stopped")]
    AlreadyStopped,

    /// No connected player with this ID.
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
}

/// Snapshot history lookups.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotError {
    /// Sequence was never stored or has been evicted.
    #[error("snapshot {0} not found")]
    SequenceNotFound(u32),

    /// Entity does not appear in any retained snapshot.
    #[error("entity {0} not found in history")]
    EntityNotFound(u64),

    /// Store holds no snapshots.
    #[error("snapshot store is empty")]
    Empty,
}

/// Client prediction failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionError {
    /// `set_initial_state` has not been called.
    #[error("predictor has no initial state")]
    Uninitialized,
}

/// Lag compensation rewind failures.
///
/// These describe valid "too old" or "didn't exist" conditions, not
/// corruption.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagCompensationError {
    /// No snapshot available to rewind to.
    #[error("no snapshot near {target_time_ns}ns")]
    NoSnapshot {
        /// Rewind target time.
        target_time_ns: u64,
    },

    /// Entity did not exist in the rewound snapshot.
    #[error("entity {entity_id} absent from snapshot {sequence}")]
    EntityAbsent {
        /// Missing entity.
        entity_id: u64,
        /// Sequence of the rewound snapshot.
        sequence: u32,
    },
}

/// Projectile tracking failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectileError {
    /// No pending projectile with this local ID.
    #[error("no pending projectile with local id {0}")]
    UnknownLocal(u64),

    /// No tracked projectile with this server ID.
    #[error("unknown projectile {0}")]
    UnknownProjectile(u64),
}

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    /// File is not valid TOML for [`crate::config::NetConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parse but make no sense together.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
/// Result type for snapshot lookups.
pub type SnapshotResult<T> = Result<T, SnapshotError>;
/// Result type for prediction.
pub type PredictionResult<T> = Result<T, PredictionError>;
/// Result type for lag compensation.
pub type LagResult<T> = Result<T, LagCompensationError>;
/// Result type for projectile tracking.
pub type ProjectileResult<T> = Result<T, ProjectileError>;
/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
