//! # Client-Side Prediction
//!
//! The local player moves as soon as input is issued. Every input is kept,
//! keyed by its sequence, until the server's state for that sequence
//! arrives.
//!
//! ```text
//! predict_input(v)         history: seq 7 | seq 8 | seq 9 | seq 10
//!                                     ▲
//! reconcile_server_state(seq 7, pos, vel)
//!   seq 7 evicted           ──► Reset      (adopt server, clear history)
//!   |pos - P7| < threshold  ──► Confirmed  (drop <= 7, keep current)
//!   otherwise               ──► Corrected  (start from server at 7,
//!                                           replay 8, 9, 10 with
//!                                           dt <= max_replay_dt)
//! ```
//!
//! Accurate predictions never move the rendered state.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use tether_core::{Clock, Position, SystemClock, Velocity};
use tracing::{debug, warn};

use crate::config::PredictionConfig;
use crate::error::{PredictionError, PredictionResult};

/// Predictor lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PredictionPhase {
    /// No initial state yet.
    #[default]
    Uninitialized,
    /// Running ahead of the server.
    Predicting,
    /// Last reconcile replayed a correction; cleared by the next input.
    Reconciling,
}

/// Locally predicted kinematic state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PredictedState {
    /// Input sequence that produced this state.
    pub sequence: u32,
    /// Local time of the input (ns).
    pub timestamp_ns: u64,
    /// Position.
    pub position: Position,
    /// Velocity.
    pub velocity: Velocity,
}

/// What a reconcile did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReconcileOutcome {
    /// Acked sequence was not in history: state reset to the server's.
    Reset,
    /// Prediction was within threshold; nothing visible changed.
    Confirmed {
        /// Position error at the acked sequence.
        error: f64,
    },
    /// Prediction was off; pending inputs replayed from the server state.
    Corrected {
        /// Position error at the acked sequence.
        error: f64,
        /// Inputs replayed.
        replayed: usize,
    },
}

#[derive(Clone, Copy, Debug)]
struct HistoryEntry {
    state: PredictedState,
    /// `input * dt` added to velocity by this input.
    velocity_delta: Velocity,
}

#[derive(Debug, Default)]
struct Inner {
    phase: PredictionPhase,
    current: PredictedState,
    next_sequence: u32,
    history: VecDeque<HistoryEntry>,
}

/// Local-player predictor with server reconciliation.
///
/// Reads take a shared lock; `predict_input` and `reconcile_server_state`
/// take an exclusive one.
#[derive(Debug)]
pub struct ClientPredictor {
    inner: RwLock<Inner>,
    config: PredictionConfig,
    clock: Arc<dyn Clock>,
}

impl ClientPredictor {
    /// Creates a predictor on wall time.
    #[must_use]
    pub fn new(config: PredictionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a predictor stamping states with `clock`.
    #[must_use]
    pub fn with_clock(config: PredictionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            config,
            clock,
        }
    }

    fn history_capacity(&self) -> usize {
        self.config.history.max(1)
    }

    /// Starts predicting from `position`/`velocity` at sequence 0.
    pub fn set_initial_state(&self, position: Position, velocity: Velocity) {
        let mut inner = self.inner.write();
        inner.current = PredictedState {
            sequence: 0,
            timestamp_ns: self.clock.now_ns(),
            position,
            velocity,
        };
        inner.next_sequence = 1;
        inner.history.clear();
        inner.phase = PredictionPhase::Predicting;
    }

    /// Applies one local input: `v += input * dt`, then `p += v * dt`.
    ///
    /// Returns the new state, to be rendered immediately.
    ///
    /// # Errors
    ///
    /// [`PredictionError::Uninitialized`] before
    /// [`set_initial_state`](Self::set_initial_state).
    pub fn predict_input(&self, dx: f64, dy: f64, dt: f64) -> PredictionResult<PredictedState> {
        let capacity = self.history_capacity();
        let now = self.clock.now_ns();
        let mut inner = self.inner.write();
        if inner.phase == PredictionPhase::Uninitialized {
            return Err(PredictionError::Uninitialized);
        }

        let velocity_delta = Velocity::new(dx * dt, dy * dt);
        let velocity = inner.current.velocity.plus(velocity_delta);
        let state = PredictedState {
            sequence: inner.next_sequence,
            timestamp_ns: now,
            position: inner.current.position.advanced(velocity, dt),
            velocity,
        };
        inner.next_sequence = inner.next_sequence.wrapping_add(1);
        inner.current = state;

        inner.history.push_back(HistoryEntry {
            state,
            velocity_delta,
        });
        while inner.history.len() > capacity {
            inner.history.pop_front();
        }
        inner.phase = PredictionPhase::Predicting;
        Ok(state)
    }

    /// Folds an authoritative state for `server_sequence` into the
    /// prediction.
    pub fn reconcile_server_state(
        &self,
        server_sequence: u32,
        server_position: Position,
        server_velocity: Velocity,
    ) -> ReconcileOutcome {
        let now = self.clock.now_ns();
        let mut inner = self.inner.write();

        let Some(matched) = inner
            .history
            .iter()
            .position(|entry| entry.state.sequence == server_sequence)
        else {
            debug!(server_sequence, "ack outside history, resetting to server state");
            inner.current = PredictedState {
                sequence: server_sequence,
                timestamp_ns: now,
                position: server_position,
                velocity: server_velocity,
            };
            inner.next_sequence = inner.next_sequence.max(server_sequence.wrapping_add(1));
            inner.history.clear();
            inner.phase = PredictionPhase::Predicting;
            return ReconcileOutcome::Reset;
        };

        let predicted = inner.history[matched].state;
        let error = predicted.position.distance(server_position);
        // Everything up to and including the ack is settled either way.
        inner.history.drain(..=matched);

        if error < self.config.error_threshold {
            inner.phase = PredictionPhase::Predicting;
            return ReconcileOutcome::Confirmed { error };
        }

        let max_dt = self.config.max_replay_dt_secs();
        let mut position = server_position;
        let mut velocity = server_velocity;
        let mut previous_ns = predicted.timestamp_ns;
        for entry in &mut inner.history {
            let dt = (entry.state.timestamp_ns.saturating_sub(previous_ns) as f64 / 1e9)
                .min(max_dt);
            previous_ns = entry.state.timestamp_ns;
            velocity = velocity.plus(entry.velocity_delta);
            position = position.advanced(velocity, dt);
            entry.state.position = position;
            entry.state.velocity = velocity;
        }

        let replayed = inner.history.len();
        inner.current = inner.history.back().map_or(
            PredictedState {
                sequence: server_sequence,
                timestamp_ns: predicted.timestamp_ns,
                position,
                velocity,
            },
            |entry| entry.state,
        );
        inner.phase = PredictionPhase::Reconciling;

        warn!(
            server_sequence,
            error,
            replayed,
            "prediction corrected"
        );
        ReconcileOutcome::Corrected { error, replayed }
    }

    /// Current predicted state.
    #[must_use]
    pub fn current_state(&self) -> PredictedState {
        self.inner.read().current
    }

    /// Inputs not yet acknowledged by the server.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.read().history.len()
    }

    /// Lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> PredictionPhase {
        self.inner.read().phase
    }
}
