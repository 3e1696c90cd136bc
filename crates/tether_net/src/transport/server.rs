//! # Authoritative Server
//!
//! One accept loop, two tasks per connection, and a handle map the
//! simulation talks to.
//!
//! ## Backpressure
//!
//! - Inbound: decoded inputs go to a shared [`DropQueue`] of
//!   `buffer_size * max_players`. Full means dropped.
//! - Outbound: each player has a bounded queue owned by its write task.
//!   Broadcasts `try_send`; a full queue drops the update for that player
//!   only (freshness over completeness).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{
    leave_reason_for, wait_stopped, with_deadline, DropQueue, LeaveReason, PlayerId, ServerEvent,
    StatsCounters, TransportStats,
};
use crate::config::ServerConfig;
use crate::error::{CodecError, CodecResult, TransportError, TransportResult};
use crate::protocol::{read_frame, write_frame, InputCommand, StateUpdate};

/// Encoded update shared by every recipient of a broadcast.
type Payload = Arc<[u8]>;

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// What the server keeps per connection.
///
/// Dropping the handle closes the outbound queue (write task exits) and the
/// close channel (read task exits).
struct PlayerHandle {
    addr: SocketAddr,
    outbound: mpsc::Sender<Payload>,
    _close: watch::Sender<()>,
}

struct Shared {
    config: ServerConfig,
    players: RwLock<HashMap<PlayerId, PlayerHandle>>,
    next_player_id: AtomicU64,
    next_sequence: AtomicU32,
    inputs: DropQueue<InputCommand>,
    events: DropQueue<ServerEvent>,
    errors: DropQueue<TransportError>,
    stats: StatsCounters,
}

impl Shared {
    /// Removes a player, emitting `PlayerLeft` only for the call that
    /// actually removed it.
    fn remove_player(&self, player_id: PlayerId, reason: LeaveReason) -> bool {
        let removed = self.players.write().remove(&player_id);
        match removed {
            Some(handle) => {
                info!(player_id, addr = %handle.addr, ?reason, "player left");
                self.events.try_push(ServerEvent::PlayerLeft { player_id, reason });
                true
            }
            None => false,
        }
    }

    fn accept_input(&self, player_id: PlayerId, payload: &[u8]) {
        self.stats.record_received(payload.len());
        match InputCommand::decode(payload) {
            Ok(mut command) => {
                // The connection, not the payload, decides who is speaking.
                command.player_id = player_id;
                if !self.inputs.try_push(command) {
                    self.stats.record_dropped_input();
                    debug!(player_id, "input queue full, dropping command");
                }
            }
            Err(e) => {
                self.stats.record_malformed();
                debug!(player_id, error = %e, "malformed input frame");
                self.errors.try_push(TransportError::Codec(e));
            }
        }
    }

    /// The sequence is taken only once the update is known to fit, so a
    /// rejected update leaves no gap.
    fn encode_with_sequence(&self, update: &StateUpdate) -> CodecResult<(u32, Payload)> {
        let mut bytes = update.encode()?;
        if bytes.len() > self.config.max_frame_bytes {
            return Err(CodecError::FrameTooLarge {
                len: bytes.len(),
                max: self.config.max_frame_bytes,
            });
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        StateUpdate::restamp_sequence(&mut bytes, sequence);
        Ok((sequence, bytes.into()))
    }

    fn enqueue(&self, player_id: PlayerId, handle: &PlayerHandle, payload: &Payload) {
        if handle.outbound.try_send(Arc::clone(payload)).is_err() {
            self.stats.record_dropped_update();
            debug!(player_id, "outbound queue full, dropping update");
        }
    }
}

/// Authoritative TCP server.
///
/// Must be created inside a Tokio runtime. The simulation drains
/// [`try_recv_input`](Self::try_recv_input) and
/// [`try_recv_event`](Self::try_recv_event) each tick and pushes state with
/// [`broadcast_state_update`](Self::broadcast_state_update).
pub struct Server {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    /// Yields `None` once every task has dropped its sender.
    tasks_done: Mutex<Option<mpsc::Receiver<()>>>,
    stopped: AtomicBool,
}

impl Server {
    /// Binds the listener and starts accepting connections.
    ///
    /// # Errors
    ///
    /// [`TransportError::Io`] if the address can't be bound.
    pub async fn bind(config: ServerConfig) -> TransportResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let queue_capacity = config.input_queue_capacity();
        let shared = Arc::new(Shared {
            inputs: DropQueue::new(queue_capacity),
            events: DropQueue::new(queue_capacity),
            errors: DropQueue::new(queue_capacity),
            players: RwLock::new(HashMap::with_capacity(config.max_players)),
            next_player_id: AtomicU64::new(1),
            next_sequence: AtomicU32::new(0),
            stats: StatsCounters::default(),
            config,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::channel(1);
        tokio::spawn(accept_loop(listener, Arc::clone(&shared), shutdown_rx, done_tx));

        info!(
            %local_addr,
            max_players = shared.config.max_players,
            buffer_size = shared.config.buffer_size,
            "server listening"
        );

        Ok(Self {
            shared,
            local_addr,
            shutdown_tx,
            tasks_done: Mutex::new(Some(done_rx)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// False once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Number of connected players.
    #[must_use]
    pub fn player_count(&self) -> usize {
        self.shared.players.read().len()
    }

    /// Connected player IDs, ascending.
    #[must_use]
    pub fn players(&self) -> Vec<PlayerId> {
        let mut ids: Vec<_> = self.shared.players.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Stamps `update` with the next global sequence number and enqueues it
    /// for every connected player without blocking.
    ///
    /// The sequence is consumed even with zero players connected. Players
    /// whose outbound queue is full miss this update.
    ///
    /// # Errors
    ///
    /// [`CodecError`] if the update can't be encoded within the frame limit.
    pub fn broadcast_state_update(&self, update: StateUpdate) -> CodecResult<u32> {
        let (sequence, payload) = self.shared.encode_with_sequence(&update)?;
        let players = self.shared.players.read();
        for (&player_id, handle) in players.iter() {
            self.shared.enqueue(player_id, handle, &payload);
        }
        Ok(sequence)
    }

    /// Like [`broadcast_state_update`](Self::broadcast_state_update) for a
    /// single player. Shares the same sequence counter.
    ///
    /// # Errors
    ///
    /// [`TransportError::AlreadyStopped`] after `stop`,
    /// [`TransportError::UnknownPlayer`] if not connected,
    /// [`TransportError::Codec`] on encode failure.
    pub fn send_to(&self, player_id: PlayerId, update: StateUpdate) -> TransportResult<u32> {
        if !self.is_running() {
            return Err(TransportError::AlreadyStopped);
        }
        if !self.shared.players.read().contains_key(&player_id) {
            return Err(TransportError::UnknownPlayer(player_id));
        }
        let (sequence, payload) = self.shared.encode_with_sequence(&update)?;
        // The player may have left between the check and the encode.
        let players = self.shared.players.read();
        let handle = players
            .get(&player_id)
            .ok_or(TransportError::UnknownPlayer(player_id))?;
        self.shared.enqueue(player_id, handle, &payload);
        Ok(sequence)
    }

    /// Disconnects a player. Emits `PlayerLeft { reason: Kicked }`.
    ///
    /// # Errors
    ///
    /// [`TransportError::UnknownPlayer`] if not connected.
    pub fn kick(&self, player_id: PlayerId) -> TransportResult<()> {
        if self.shared.remove_player(player_id, LeaveReason::Kicked) {
            Ok(())
        } else {
            Err(TransportError::UnknownPlayer(player_id))
        }
    }

    /// Next decoded input, if any.
    #[must_use]
    pub fn try_recv_input(&self) -> Option<InputCommand> {
        self.shared.inputs.try_pop()
    }

    /// Every queued input.
    #[must_use]
    pub fn drain_inputs(&self) -> Vec<InputCommand> {
        self.shared.inputs.drain()
    }

    /// Next join/leave event, if any.
    #[must_use]
    pub fn try_recv_event(&self) -> Option<ServerEvent> {
        self.shared.events.try_pop()
    }

    /// Every queued join/leave event.
    #[must_use]
    pub fn drain_events(&self) -> Vec<ServerEvent> {
        self.shared.events.drain()
    }

    /// Next connection error, if any.
    #[must_use]
    pub fn try_recv_error(&self) -> Option<TransportError> {
        self.shared.errors.try_pop()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.shared.stats.snapshot()
    }

    /// Stops accepting, closes every connection and waits for all tasks.
    ///
    /// Idempotent: later calls return `Ok(())` immediately.
    ///
    /// # Errors
    ///
    /// [`TransportError::Timeout`] if tasks outlive the shutdown timeout.
    pub async fn stop(&self) -> TransportResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(addr = %self.local_addr, players = self.player_count(), "stopping server");
        self.shutdown_tx.send_replace(true);

        let done = self.tasks_done.lock().take();
        let Some(mut done) = done else {
            return Ok(());
        };

        let after = self.shared.config.shutdown_timeout();
        if tokio::time::timeout(after, done.recv()).await.is_err() {
            warn!(?after, "server tasks did not exit in time");
            return Err(TransportError::Timeout {
                operation: "server stop",
                after,
            });
        }
        info!(addr = %self.local_addr, "server stopped");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
    done: mpsc::Sender<()>,
) {
    let conn_shutdown = shutdown.clone();
    loop {
        tokio::select! {
            _ = wait_stopped(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => admit(&shared, stream, addr, &conn_shutdown, &done),
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    shared.errors.try_push(TransportError::Io(e));
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    debug!("accept loop exited");
}

fn admit(
    shared: &Arc<Shared>,
    stream: TcpStream,
    addr: SocketAddr,
    shutdown: &watch::Receiver<bool>,
    done: &mpsc::Sender<()>,
) {
    let max_players = shared.config.max_players;
    let (outbound_tx, outbound_rx) = mpsc::channel(shared.config.buffer_size.max(1));
    let (close_tx, close_rx) = watch::channel(());

    let admitted = {
        let mut players = shared.players.write();
        if players.len() >= max_players {
            None
        } else {
            let player_id = shared.next_player_id.fetch_add(1, Ordering::Relaxed);
            players.insert(
                player_id,
                PlayerHandle {
                    addr,
                    outbound: outbound_tx,
                    _close: close_tx,
                },
            );
            // Under the lock so a concurrent kick can't report the leave first.
            shared.events.try_push(ServerEvent::PlayerJoined { player_id, addr });
            Some(player_id)
        }
    };

    let Some(player_id) = admitted else {
        shared.stats.record_rejected();
        warn!(%addr, max_players, "server full, closing connection");
        shared.errors.try_push(TransportError::ServerFull { max_players });
        drop(stream);
        return;
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!(player_id, error = %e, "set_nodelay failed");
    }
    info!(player_id, %addr, "player joined");

    let (reader, writer) = stream.into_split();
    tokio::spawn(read_loop(
        Arc::clone(shared),
        player_id,
        reader,
        close_rx,
        shutdown.clone(),
        done.clone(),
    ));
    tokio::spawn(write_loop(
        Arc::clone(shared),
        player_id,
        writer,
        outbound_rx,
        shutdown.clone(),
        done.clone(),
    ));
}

async fn read_loop(
    shared: Arc<Shared>,
    player_id: PlayerId,
    mut reader: OwnedReadHalf,
    mut closed: watch::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
    _done: mpsc::Sender<()>,
) {
    let max_frame = shared.config.max_frame_bytes;
    let read_timeout = shared.config.read_timeout();

    let reason = loop {
        let frame = tokio::select! {
            _ = wait_stopped(&mut shutdown) => break LeaveReason::ServerStopped,
            _ = closed.changed() => break LeaveReason::Kicked,
            frame = with_deadline(read_timeout, "read", read_frame(&mut reader, max_frame)) => frame,
        };
        match frame {
            Ok(Some(payload)) => shared.accept_input(player_id, &payload),
            Ok(None) => break LeaveReason::ClientClosed,
            Err(e) => {
                let reason = leave_reason_for(&e, false);
                debug!(player_id, error = %e, ?reason, "read loop ending");
                if reason != LeaveReason::ClientClosed {
                    shared.errors.try_push(e);
                }
                break reason;
            }
        }
    };

    shared.remove_player(player_id, reason);
}

async fn write_loop(
    shared: Arc<Shared>,
    player_id: PlayerId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Payload>,
    mut shutdown: watch::Receiver<bool>,
    _done: mpsc::Sender<()>,
) {
    let max_frame = shared.config.max_frame_bytes;
    let write_timeout = shared.config.write_timeout();

    let reason = loop {
        let payload = tokio::select! {
            _ = wait_stopped(&mut shutdown) => break LeaveReason::ServerStopped,
            next = outbound.recv() => match next {
                Some(payload) => payload,
                None => break LeaveReason::Kicked,
            },
        };
        match with_deadline(write_timeout, "write", write_frame(&mut writer, &payload, max_frame)).await {
            Ok(()) => shared.stats.record_sent(payload.len()),
            Err(e) => {
                let reason = leave_reason_for(&e, true);
                warn!(player_id, error = %e, "write failed");
                shared.errors.try_push(e);
                break reason;
            }
        }
    };

    // Best effort FIN; the peer may already be gone.
    let _ = writer.shutdown().await;
    shared.remove_player(player_id, reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_broadcast_sequences_without_players() {
        let server = Server::bind(loopback_config()).await.unwrap();
        for expected in 0..5 {
            let seq = server.broadcast_state_update(StateUpdate::new(1, 0)).unwrap();
            assert_eq!(seq, expected);
        }
        assert_eq!(server.player_count(), 0);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let server = Server::bind(loopback_config()).await.unwrap();
        assert!(server.is_running());
        server.stop().await.unwrap();
        server.stop().await.unwrap();
        assert!(!server.is_running());
        assert!(matches!(
            server.send_to(1, StateUpdate::default()),
            Err(TransportError::AlreadyStopped)
        ));
    }

    #[tokio::test]
    async fn test_unknown_player() {
        let server = Server::bind(loopback_config()).await.unwrap();
        assert!(matches!(
            server.send_to(99, StateUpdate::default()),
            Err(TransportError::UnknownPlayer(99))
        ));
        assert!(matches!(server.kick(99), Err(TransportError::UnknownPlayer(99))));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_update_rejected() {
        let config = ServerConfig {
            max_frame_bytes: 32,
            ..loopback_config()
        };
        let server = Server::bind(config).await.unwrap();
        let update = StateUpdate {
            components: vec![crate::protocol::ComponentData::new("blob", vec![0u8; 64])],
            ..StateUpdate::default()
        };
        assert!(matches!(
            server.broadcast_state_update(update),
            Err(CodecError::FrameTooLarge { max: 32, .. })
        ));
        server.stop().await.unwrap();
    }
}
