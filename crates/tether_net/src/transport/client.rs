//! # Client Transport
//!
//! Mirrors the server's framing. Three tasks per connection: read (decode
//! `StateUpdate`s into a drop-on-full delivery queue), write (drain the
//! outbound input queue) and heartbeat (refresh the local latency estimate;
//! nothing is sent). A server silent for longer than `read_timeout_ms`
//! ends the connection with [`LeaveReason::Timeout`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::{ns_to_duration, Clock, Component, SystemClock};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{
    leave_reason_for, wait_stopped, with_deadline, ClientEvent, DropQueue, LeaveReason,
    StatsCounters, TransportStats,
};
use crate::config::ClientConfig;
use crate::error::{CodecError, TransportError, TransportResult};
use crate::protocol::{read_frame, write_frame, InputCommand, StateUpdate};

struct Shared {
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    connected: AtomicBool,
    /// Flipped once to tell every task to exit.
    closing: watch::Sender<bool>,
    player_id: AtomicU64,
    next_input_sequence: AtomicU32,
    latest_sequence: Mutex<Option<u32>>,
    last_update_ns: AtomicU64,
    latency_ns: AtomicU64,
    updates: DropQueue<StateUpdate>,
    events: DropQueue<ClientEvent>,
    errors: DropQueue<TransportError>,
    stats: StatsCounters,
}

impl Shared {
    /// Marks the connection down, emitting `Disconnected` once.
    fn mark_disconnected(&self, reason: LeaveReason) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(?reason, "disconnected from server");
            self.events.try_push(ClientEvent::Disconnected { reason });
        }
        self.closing.send_replace(true);
    }

    fn accept_update(&self, payload: &[u8]) {
        self.stats.record_received(payload.len());
        match StateUpdate::decode(payload) {
            Ok(update) => {
                *self.latest_sequence.lock() = Some(update.sequence);
                self.last_update_ns.store(self.clock.now_ns(), Ordering::Relaxed);
                if !self.updates.try_push(update) {
                    self.stats.record_dropped_update();
                    debug!("update queue full, dropping update");
                }
            }
            Err(e) => {
                self.stats.record_malformed();
                debug!(error = %e, "malformed state update");
                self.errors.try_push(TransportError::Codec(e));
            }
        }
    }

    fn refresh_latency(&self) {
        let now = self.clock.now_ns();
        let last = self.last_update_ns.load(Ordering::Relaxed);
        self.latency_ns.store(now.saturating_sub(last), Ordering::Relaxed);
    }
}

/// Client side of a server connection.
///
/// Must be created inside a Tokio runtime.
pub struct Client {
    shared: Arc<Shared>,
    server_addr: SocketAddr,
    local_addr: SocketAddr,
    outbound: mpsc::Sender<Vec<u8>>,
    tasks_done: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Client {
    /// Connects using wall-clock timestamps.
    ///
    /// # Errors
    ///
    /// [`TransportError::Timeout`] if the connect deadline passes,
    /// [`TransportError::Io`] if the connection is refused.
    pub async fn connect(addr: SocketAddr, config: ClientConfig) -> TransportResult<Self> {
        Self::connect_with_clock(addr, config, Arc::new(SystemClock)).await
    }

    /// Connects, stamping inputs and latency with `clock`.
    ///
    /// # Errors
    ///
    /// As [`connect`](Self::connect).
    pub async fn connect_with_clock(
        addr: SocketAddr,
        config: ClientConfig,
        clock: Arc<dyn Clock>,
    ) -> TransportResult<Self> {
        let after = config.connect_timeout();
        let stream = tokio::time::timeout(after, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "connect",
                after,
            })??;
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;

        let (closing, closing_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            closing,
            player_id: AtomicU64::new(0),
            next_input_sequence: AtomicU32::new(1),
            latest_sequence: Mutex::new(None),
            last_update_ns: AtomicU64::new(clock.now_ns()),
            latency_ns: AtomicU64::new(0),
            updates: DropQueue::new(config.buffer_size),
            events: DropQueue::new(config.buffer_size),
            errors: DropQueue::new(config.buffer_size),
            stats: StatsCounters::default(),
            clock,
            config,
        });

        let (outbound_tx, outbound_rx) = mpsc::channel(shared.config.buffer_size.max(1));
        let (done_tx, done_rx) = mpsc::channel(1);
        let (reader, writer) = stream.into_split();

        tokio::spawn(read_loop(Arc::clone(&shared), reader, closing_rx.clone(), done_tx.clone()));
        tokio::spawn(write_loop(Arc::clone(&shared), writer, outbound_rx, closing_rx.clone(), done_tx.clone()));
        tokio::spawn(heartbeat_loop(Arc::clone(&shared), closing_rx, done_tx));

        info!(server = %addr, local = %local_addr, "connected to server");
        shared.events.try_push(ClientEvent::Connected { addr });

        Ok(Self {
            shared,
            server_addr: addr,
            local_addr,
            outbound: outbound_tx,
            tasks_done: Mutex::new(Some(done_rx)),
        })
    }

    /// Server address.
    #[must_use]
    pub const fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Local socket address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True until the connection drops or [`disconnect`](Self::disconnect)
    /// is called.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Player ID written into outgoing commands. The server overwrites it
    /// with the connection's own ID on receipt.
    pub fn set_player_id(&self, player_id: u64) {
        self.shared.player_id.store(player_id, Ordering::Relaxed);
    }

    /// Sends an input command, returning its sequence number.
    ///
    /// Sequence numbers start at 1 and increase by one per accepted call.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] once the connection is down,
    /// [`TransportError::QueueFull`] if the outbound queue is full,
    /// [`TransportError::Codec`] if the command can't be framed.
    pub fn send_input(&self, input_type: &str, data: impl Into<Vec<u8>>) -> TransportResult<u32> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut command = InputCommand::new(
            self.shared.player_id.load(Ordering::Relaxed),
            self.shared.clock.now_ns(),
            0,
            input_type,
            data,
        );
        let max_frame = self.shared.config.max_frame_bytes;
        let encoded_len = command.encode()?.len();
        if encoded_len > max_frame {
            return Err(CodecError::FrameTooLarge {
                len: encoded_len,
                max: max_frame,
            }
            .into());
        }

        let permit = self.outbound.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => TransportError::QueueFull,
            TrySendError::Closed(()) => TransportError::NotConnected,
        })?;

        // Only consume a sequence number once the command is sure to be queued.
        command.sequence = self.shared.next_input_sequence.fetch_add(1, Ordering::Relaxed);
        permit.send(command.encode()?);
        Ok(command.sequence)
    }

    /// Sends a typed component as an input, tagged with its wire type.
    ///
    /// # Errors
    ///
    /// As [`send_input`](Self::send_input).
    pub fn send_component<C: Component>(&self, component: &C) -> TransportResult<u32> {
        self.send_input(C::KIND.type_name(), component.encode())
    }

    /// Next received update, if any.
    #[must_use]
    pub fn try_recv_update(&self) -> Option<StateUpdate> {
        self.shared.updates.try_pop()
    }

    /// Every queued update.
    #[must_use]
    pub fn drain_updates(&self) -> Vec<StateUpdate> {
        self.shared.updates.drain()
    }

    /// Next lifecycle event, if any.
    #[must_use]
    pub fn try_recv_event(&self) -> Option<ClientEvent> {
        self.shared.events.try_pop()
    }

    /// Next connection error, if any.
    #[must_use]
    pub fn try_recv_error(&self) -> Option<TransportError> {
        self.shared.errors.try_pop()
    }

    /// Sequence number of the most recently received update.
    #[must_use]
    pub fn latest_sequence(&self) -> Option<u32> {
        *self.shared.latest_sequence.lock()
    }

    /// Time since the last update arrived, as of the last heartbeat.
    #[must_use]
    pub fn latency(&self) -> Duration {
        ns_to_duration(self.shared.latency_ns.load(Ordering::Relaxed))
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.shared.stats.snapshot()
    }

    /// Closes the connection and waits for all tasks.
    ///
    /// Idempotent: later calls return `Ok(())` immediately.
    ///
    /// # Errors
    ///
    /// [`TransportError::Timeout`] if tasks outlive the shutdown timeout.
    pub async fn disconnect(&self) -> TransportResult<()> {
        let done = self.tasks_done.lock().take();
        let Some(mut done) = done else {
            return Ok(());
        };
        self.shared.mark_disconnected(LeaveReason::ClientClosed);

        let after = self.shared.config.shutdown_timeout();
        if tokio::time::timeout(after, done.recv()).await.is_err() {
            warn!(?after, "client tasks did not exit in time");
            return Err(TransportError::Timeout {
                operation: "client disconnect",
                after,
            });
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.closing.send_replace(true);
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut reader: OwnedReadHalf,
    mut closing: watch::Receiver<bool>,
    _done: mpsc::Sender<()>,
) {
    let max_frame = shared.config.max_frame_bytes;
    let read_timeout = shared.config.read_timeout();
    let reason = loop {
        let frame = tokio::select! {
            _ = wait_stopped(&mut closing) => break LeaveReason::ClientClosed,
            frame = with_deadline(read_timeout, "read", read_frame(&mut reader, max_frame)) => frame,
        };
        match frame {
            Ok(Some(payload)) => shared.accept_update(&payload),
            // Server hung up between frames.
            Ok(None) => break LeaveReason::ServerStopped,
            Err(e) => {
                let reason = leave_reason_for(&e, false);
                debug!(error = %e, ?reason, "client read loop ending");
                shared.errors.try_push(e);
                break reason;
            }
        }
    };
    shared.mark_disconnected(reason);
}

async fn write_loop(
    shared: Arc<Shared>,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    mut closing: watch::Receiver<bool>,
    _done: mpsc::Sender<()>,
) {
    let max_frame = shared.config.max_frame_bytes;
    let write_timeout = shared.config.write_timeout();
    let reason = loop {
        let payload = tokio::select! {
            _ = wait_stopped(&mut closing) => break LeaveReason::ClientClosed,
            next = outbound.recv() => match next {
                Some(payload) => payload,
                None => break LeaveReason::ClientClosed,
            },
        };
        match with_deadline(write_timeout, "write", write_frame(&mut writer, &payload, max_frame)).await {
            Ok(()) => shared.stats.record_sent(payload.len()),
            Err(e) => {
                let reason = leave_reason_for(&e, true);
                warn!(error = %e, "client write failed");
                shared.errors.try_push(e);
                break reason;
            }
        }
    };
    let _ = writer.shutdown().await;
    shared.mark_disconnected(reason);
}

async fn heartbeat_loop(
    shared: Arc<Shared>,
    mut closing: watch::Receiver<bool>,
    _done: mpsc::Sender<()>,
) {
    let period = shared.config.heartbeat_interval();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = wait_stopped(&mut closing) => break,
            _ = ticker.tick() => shared.refresh_latency(),
        }
    }
    debug!(
        latency_ms = ns_to_duration(shared.latency_ns.load(Ordering::Relaxed)).as_millis() as u64,
        "heartbeat stopped"
    );
}
