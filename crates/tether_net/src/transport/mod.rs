//! # Transport Layer
//!
//! TCP connections with length-prefixed framing, exposed to the simulation
//! as drop-on-full queues.
//!
//! ```text
//!            ┌──────────── per connection ────────────┐
//! socket ──► │ read task ──► decode ──► input queue   │ ──► simulation
//!            │                                        │      (try_pop each tick)
//! socket ◄── │ write task ◄── outbound mpsc (owned)   │ ◄── broadcast / send_to
//!            └────────────────────────────────────────┘
//! ```
//!
//! Each connection's mutable state belongs to its two tasks. The server only
//! keeps a handle (outbound sender + close signal) per player; dropping the
//! handle is how a connection is told to go away.

mod client;
mod queue;
mod server;

pub use client::Client;
pub use queue::DropQueue;
pub use server::Server;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{TransportError, TransportResult};

/// Server-assigned player identifier (unique, ascending from 1).
pub type PlayerId = u64;

/// Why a connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaveReason {
    /// Peer closed the stream.
    ClientClosed,
    /// Read failed or the peer sent an unframeable stream.
    ReadError,
    /// Write failed.
    WriteError,
    /// A read or write deadline elapsed.
    Timeout,
    /// Local shutdown.
    ServerStopped,
    /// Removed by [`Server::kick`].
    Kicked,
}

/// Connection lifecycle events drained by the server's simulation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    /// A connection was admitted.
    PlayerJoined {
        /// Assigned ID.
        player_id: PlayerId,
        /// Peer address.
        addr: SocketAddr,
    },
    /// A connection ended. Emitted exactly once per joined player.
    PlayerLeft {
        /// Player that left.
        player_id: PlayerId,
        /// Why.
        reason: LeaveReason,
    },
}

/// Connection lifecycle events on the client side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// Connected to the server.
    Connected {
        /// Server address.
        addr: SocketAddr,
    },
    /// Connection ended. Emitted once.
    Disconnected {
        /// Why.
        reason: LeaveReason,
    },
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames written.
    pub frames_sent: u64,
    /// Frames read.
    pub frames_received: u64,
    /// Bytes written (including prefixes).
    pub bytes_sent: u64,
    /// Bytes read (including prefixes).
    pub bytes_received: u64,
    /// Inputs dropped on a full input queue.
    pub dropped_inputs: u64,
    /// Updates dropped on a full outbound or delivery queue.
    pub dropped_updates: u64,
    /// Frames that failed to decode.
    pub malformed_frames: u64,
    /// Connections refused at capacity.
    pub rejected_connections: u64,
}

/// Shared atomic counters behind [`TransportStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    dropped_inputs: AtomicU64,
    dropped_updates: AtomicU64,
    malformed_frames: AtomicU64,
    rejected_connections: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_sent(&self, payload_len: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add((payload_len + crate::protocol::FRAME_HEADER_LEN) as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, payload_len: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add((payload_len + crate::protocol::FRAME_HEADER_LEN) as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_input(&self) {
        self.dropped_inputs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_update(&self) {
        self.dropped_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TransportStats {
        TransportStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            dropped_inputs: self.dropped_inputs.load(Ordering::Relaxed),
            dropped_updates: self.dropped_updates.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
        }
    }
}

/// Runs `fut` under an optional deadline.
pub(crate) async fn with_deadline<F, T>(
    deadline: Option<Duration>,
    operation: &'static str,
    fut: F,
) -> TransportResult<T>
where
    F: Future<Output = TransportResult<T>>,
{
    match deadline {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| TransportError::Timeout { operation, after })?,
        None => fut.await,
    }
}

/// Resolves once `shutdown` flips to `true` or its sender is dropped.
pub(crate) async fn wait_stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|&stop| stop).await;
}

/// Maps a failed read or write to the leave reason it implies.
pub(crate) fn leave_reason_for(err: &TransportError, on_write: bool) -> LeaveReason {
    match err {
        TransportError::Timeout { .. } => LeaveReason::Timeout,
        TransportError::ConnectionClosed => LeaveReason::ClientClosed,
        _ if on_write => LeaveReason::WriteError,
        _ => LeaveReason::ReadError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let counters = StatsCounters::default();
        counters.record_sent(10);
        counters.record_received(6);
        counters.record_dropped_input();
        counters.record_malformed();

        let stats = counters.snapshot();
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.bytes_sent, 14);
        assert_eq!(stats.bytes_received, 10);
        assert_eq!(stats.dropped_inputs, 1);
        assert_eq!(stats.malformed_frames, 1);
        assert_eq!(stats.dropped_updates, 0);
    }

    #[tokio::test]
    async fn test_deadline_elapses() {
        let result: TransportResult<()> = with_deadline(
            Some(Duration::from_millis(10)),
            "read",
            std::future::pending(),
        )
        .await;
        assert!(matches!(
            result,
            Err(TransportError::Timeout { operation: "read", .. })
        ));
    }

    #[test]
    fn test_leave_reasons() {
        let timeout = TransportError::Timeout {
            operation: "write",
            after: Duration::from_secs(1),
        };
        assert_eq!(leave_reason_for(&timeout, true), LeaveReason::Timeout);
        assert_eq!(
            leave_reason_for(&TransportError::NotConnected, true),
            LeaveReason::WriteError
        );
        assert_eq!(
            leave_reason_for(&TransportError::ConnectionClosed, false),
            LeaveReason::ClientClosed
        );
    }
}
