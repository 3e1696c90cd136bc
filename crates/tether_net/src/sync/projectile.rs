//! Projectile sync.
//!
//! Predict-then-confirm for short-lived entities. The client spawns a
//! projectile under a local ID straight away; once the server answers, the
//! local ID is bound to the authoritative one. Each projectile keeps a short
//! position history for point-in-time queries, trimmed by a background
//! pruner to the compensation window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use tether_core::{duration_to_ns, Clock, Position, SystemClock, Velocity};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::config::ProjectileConfig;
use crate::error::{ProjectileError, ProjectileResult};

/// One position sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectileSample {
    /// Sample time (ns).
    pub timestamp_ns: u64,
    /// Position.
    pub position: Position,
    /// Velocity.
    pub velocity: Velocity,
}

/// What a prune pass removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Samples older than the window.
    pub samples: usize,
    /// Projectiles left with no samples.
    pub projectiles: usize,
    /// Local projectiles never confirmed in time.
    pub unconfirmed: usize,
}

#[derive(Debug, Default)]
struct History {
    samples: VecDeque<ProjectileSample>,
}

impl History {
    fn record(&mut self, sample: ProjectileSample, capacity: usize) {
        let at = self
            .samples
            .partition_point(|s| s.timestamp_ns <= sample.timestamp_ns);
        self.samples.insert(at, sample);
        while self.samples.len() > capacity {
            self.samples.pop_front();
        }
    }

    fn position_at(&self, time_ns: u64) -> Option<Position> {
        let after = self.samples.partition_point(|s| s.timestamp_ns < time_ns);
        match (after.checked_sub(1).and_then(|i| self.samples.get(i)), self.samples.get(after)) {
            (Some(b), Some(a)) => {
                let span = a.timestamp_ns.saturating_sub(b.timestamp_ns);
                if span == 0 {
                    return Some(a.position);
                }
                let t = (time_ns - b.timestamp_ns) as f64 / span as f64;
                Some(b.position.lerp(a.position, t.clamp(0.0, 1.0)))
            }
            (Some(only), None) | (None, Some(only)) => Some(only.position),
            (None, None) => None,
        }
    }

    fn prune_before(&mut self, cutoff_ns: u64) -> usize {
        let stale = self.samples.partition_point(|s| s.timestamp_ns < cutoff_ns);
        self.samples.drain(..stale);
        stale
    }
}

#[derive(Debug)]
struct Pending {
    spawned_ns: u64,
    history: History,
}

#[derive(Debug)]
struct Tracked {
    local_id: Option<u64>,
    history: History,
}

#[derive(Debug)]
struct Inner {
    next_local_id: u64,
    pending: HashMap<u64, Pending>,
    tracked: HashMap<u64, Tracked>,
    local_to_server: HashMap<u64, u64>,
}

/// Shared projectile state. Clones are handles to the same tracker.
#[derive(Clone, Debug)]
pub struct ProjectileTracker {
    inner: Arc<RwLock<Inner>>,
    config: ProjectileConfig,
    clock: Arc<dyn Clock>,
}

impl ProjectileTracker {
    /// Creates a tracker on wall time.
    #[must_use]
    pub fn new(config: ProjectileConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a tracker stamping samples with `clock`.
    #[must_use]
    pub fn with_clock(config: ProjectileConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                next_local_id: 1,
                pending: HashMap::new(),
                tracked: HashMap::new(),
                local_to_server: HashMap::new(),
            })),
            config,
            clock,
        }
    }

    fn capacity(&self) -> usize {
        self.config.history.max(1)
    }

    /// Spawns a predicted projectile and returns its local ID (from 1).
    pub fn spawn_local(&self, position: Position, velocity: Velocity) -> u64 {
        let now = self.clock.now_ns();
        let mut inner = self.inner.write();
        let local_id = inner.next_local_id;
        inner.next_local_id += 1;

        let mut history = History::default();
        history.record(
            ProjectileSample {
                timestamp_ns: now,
                position,
                velocity,
            },
            self.capacity(),
        );
        inner.pending.insert(
            local_id,
            Pending {
                spawned_ns: now,
                history,
            },
        );
        trace!(local_id, "local projectile spawned");
        local_id
    }

    /// Records a predicted position for a local projectile, confirmed or
    /// not.
    ///
    /// # Errors
    ///
    /// [`ProjectileError::UnknownLocal`] if the ID is not live.
    pub fn record_local(&self, local_id: u64, position: Position, velocity: Velocity) -> ProjectileResult<()> {
        let sample = ProjectileSample {
            timestamp_ns: self.clock.now_ns(),
            position,
            velocity,
        };
        let capacity = self.capacity();
        let mut inner = self.inner.write();
        let inner = &mut *inner;
        let history = match inner.local_to_server.get(&local_id) {
            Some(server_id) => inner.tracked.get_mut(server_id).map(|t| &mut t.history),
            None => inner.pending.get_mut(&local_id).map(|p| &mut p.history),
        }
        .ok_or(ProjectileError::UnknownLocal(local_id))?;
        history.record(sample, capacity);
        Ok(())
    }

    /// Binds a local projectile to its server ID and records the
    /// authoritative sample.
    ///
    /// Samples already observed under `server_id` are kept; predicted ones
    /// are merged in by time.
    ///
    /// # Errors
    ///
    /// [`ProjectileError::UnknownLocal`] if no such pending projectile.
    pub fn confirm(
        &self,
        local_id: u64,
        server_id: u64,
        position: Position,
        timestamp_ns: u64,
    ) -> ProjectileResult<()> {
        let capacity = self.capacity();
        let mut inner = self.inner.write();
        let pending = inner
            .pending
            .remove(&local_id)
            .ok_or(ProjectileError::UnknownLocal(local_id))?;

        let velocity = pending.history.samples.back().map_or(Velocity::ZERO, |s| s.velocity);
        let tracked = inner.tracked.entry(server_id).or_insert_with(|| Tracked {
            local_id: None,
            history: History::default(),
        });
        let previous = tracked.local_id.replace(local_id);
        for sample in pending.history.samples {
            tracked.history.record(sample, capacity);
        }
        tracked.history.record(
            ProjectileSample {
                timestamp_ns,
                position,
                velocity,
            },
            capacity,
        );

        if let Some(previous) = previous.filter(|&id| id != local_id) {
            inner.local_to_server.remove(&previous);
        }
        inner.local_to_server.insert(local_id, server_id);
        debug!(local_id, server_id, "projectile confirmed");
        Ok(())
    }

    /// Drops a local projectile the server refused.
    ///
    /// # Errors
    ///
    /// [`ProjectileError::UnknownLocal`] if no such pending projectile.
    pub fn reject(&self, local_id: u64) -> ProjectileResult<()> {
        self.inner
            .write()
            .pending
            .remove(&local_id)
            .map(|_| debug!(local_id, "projectile rejected"))
            .ok_or(ProjectileError::UnknownLocal(local_id))
    }

    /// Records a server sample, tracking the projectile if new (e.g. one
    /// fired by another player).
    pub fn observe(&self, server_id: u64, position: Position, velocity: Velocity, timestamp_ns: u64) {
        let capacity = self.capacity();
        self.inner
            .write()
            .tracked
            .entry(server_id)
            .or_insert_with(|| Tracked {
                local_id: None,
                history: History::default(),
            })
            .history
            .record(
                ProjectileSample {
                    timestamp_ns,
                    position,
                    velocity,
                },
                capacity,
            );
    }

    /// Server ID bound to a local projectile.
    #[must_use]
    pub fn server_id(&self, local_id: u64) -> Option<u64> {
        self.inner.read().local_to_server.get(&local_id).copied()
    }

    /// Position of a tracked projectile at `time_ns`, interpolated between
    /// samples and clamped to the ends of its history.
    ///
    /// # Errors
    ///
    /// [`ProjectileError::UnknownProjectile`] if not tracked or no samples
    /// remain.
    pub fn position_at(&self, server_id: u64, time_ns: u64) -> ProjectileResult<Position> {
        self.inner
            .read()
            .tracked
            .get(&server_id)
            .and_then(|t| t.history.position_at(time_ns))
            .ok_or(ProjectileError::UnknownProjectile(server_id))
    }

    /// Latest sample of a tracked projectile.
    #[must_use]
    pub fn latest(&self, server_id: u64) -> Option<ProjectileSample> {
        self.inner
            .read()
            .tracked
            .get(&server_id)?
            .history
            .samples
            .back()
            .copied()
    }

    /// Stops tracking a projectile. Returns `false` if it wasn't tracked.
    pub fn remove(&self, server_id: u64) -> bool {
        let mut inner = self.inner.write();
        match inner.tracked.remove(&server_id) {
            Some(tracked) => {
                if let Some(local_id) = tracked.local_id {
                    inner.local_to_server.remove(&local_id);
                }
                true
            }
            None => false,
        }
    }

    /// Local projectiles awaiting confirmation.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.read().pending.len()
    }

    /// Projectiles with a server ID.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.inner.read().tracked.len()
    }

    /// Drops samples older than the window, projectiles with none left, and
    /// local projectiles unconfirmed past the timeout.
    pub fn prune(&self, now_ns: u64) -> PruneReport {
        let cutoff = now_ns.saturating_sub(duration_to_ns(self.config.window()));
        let confirm_cutoff = now_ns.saturating_sub(duration_to_ns(self.config.confirm_timeout()));
        let mut report = PruneReport::default();

        let mut inner = self.inner.write();
        let inner = &mut *inner;

        let before = inner.pending.len();
        inner.pending.retain(|_, p| p.spawned_ns >= confirm_cutoff);
        report.unconfirmed = before - inner.pending.len();

        let local_to_server = &mut inner.local_to_server;
        inner.tracked.retain(|_, tracked| {
            report.samples += tracked.history.prune_before(cutoff);
            let keep = !tracked.history.samples.is_empty();
            if !keep {
                report.projectiles += 1;
                if let Some(local_id) = tracked.local_id {
                    local_to_server.remove(&local_id);
                }
            }
            keep
        });

        if report != PruneReport::default() {
            trace!(?report, "projectiles pruned");
        }
        report
    }

    /// Runs [`prune`](Self::prune) every `prune_interval` on the Tokio
    /// runtime until the handle is shut down or dropped.
    #[must_use]
    pub fn spawn_pruner(&self) -> PrunerHandle {
        let (shutdown, mut stopped) = watch::channel(false);
        let tracker = self.clone();
        let period = self.config.prune_interval();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = crate::transport::wait_stopped(&mut stopped) => break,
                    _ = ticker.tick() => {
                        tracker.prune(tracker.clock.now_ns());
                    }
                }
            }
            debug!("projectile pruner stopped");
        });
        PrunerHandle { shutdown, task }
    }
}

/// Handle to a running pruner task.
#[derive(Debug)]
pub struct PrunerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PrunerHandle {
    /// Stops the pruner and waits for it to exit.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            debug!(error = %e, "projectile pruner ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use tether_core::ManualClock;

    const MS: u64 = 1_000_000;

    fn tracker() -> (ProjectileTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000 * MS));
        (
            ProjectileTracker::with_clock(ProjectileConfig::default(), clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_local_ids_start_at_one() {
        let (tracker, _) = tracker();
        assert_eq!(tracker.spawn_local(Position::ZERO, Velocity::ZERO), 1);
        assert_eq!(tracker.spawn_local(Position::ZERO, Velocity::ZERO), 2);
        assert_eq!(tracker.pending_count(), 2);
    }

    #[test]
    fn test_confirm_binds_ids_and_keeps_history() {
        let (tracker, clock) = tracker();
        let local = tracker.spawn_local(Position::ZERO, Velocity::new(100.0, 0.0));
        clock.advance(Duration::from_millis(100));
        tracker.record_local(local, Position::new(10.0, 0.0), Velocity::new(100.0, 0.0)).unwrap();

        tracker.confirm(local, 500, Position::new(20.0, 0.0), 1_200 * MS).unwrap();
        assert_eq!(tracker.server_id(local), Some(500));
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.confirm(local, 501, Position::ZERO, 0), Err(ProjectileError::UnknownLocal(local)));

        // Predicted samples survive confirmation.
        let at = tracker.position_at(500, 1_050 * MS).unwrap();
        assert!((at.x - 5.0).abs() < 1e-9);
        let at = tracker.position_at(500, 1_150 * MS).unwrap();
        assert!((at.x - 15.0).abs() < 1e-9);

        // Local recording now lands on the confirmed projectile.
        clock.advance(Duration::from_millis(200));
        tracker.record_local(local, Position::new(30.0, 0.0), Velocity::ZERO).unwrap();
        assert_eq!(tracker.latest(500).unwrap().position.x, 30.0);
    }

    #[test]
    fn test_confirm_after_observe_keeps_server_samples() {
        let (tracker, _) = tracker();
        let local = tracker.spawn_local(Position::ZERO, Velocity::new(10.0, 0.0));
        // The server's update overtakes the spawn acknowledgement.
        tracker.observe(7, Position::new(50.0, 0.0), Velocity::new(10.0, 0.0), 5_000 * MS);
        tracker.confirm(local, 7, Position::new(1.0, 0.0), 1_100 * MS).unwrap();

        let latest = tracker.latest(7).unwrap();
        assert_eq!(latest.timestamp_ns, 5_000 * MS);
        assert_eq!(latest.position, Position::new(50.0, 0.0));
        assert_eq!(tracker.position_at(7, 1_000 * MS).unwrap(), Position::ZERO);
        assert_eq!(tracker.position_at(7, 1_100 * MS).unwrap(), Position::new(1.0, 0.0));
        assert_eq!(tracker.server_id(local), Some(7));
        assert_eq!(tracker.tracked_count(), 1);
    }

    #[test]
    fn test_position_at_clamps() {
        let (tracker, _) = tracker();
        tracker.observe(9, Position::new(0.0, 0.0), Velocity::ZERO, 100 * MS);
        tracker.observe(9, Position::new(10.0, 0.0), Velocity::ZERO, 200 * MS);
        assert_eq!(tracker.position_at(9, 0).unwrap().x, 0.0);
        assert_eq!(tracker.position_at(9, 900 * MS).unwrap().x, 10.0);
        assert_eq!(tracker.position_at(8, 0), Err(ProjectileError::UnknownProjectile(8)));
    }

    #[test]
    fn test_reject_and_remove() {
        let (tracker, _) = tracker();
        let local = tracker.spawn_local(Position::ZERO, Velocity::ZERO);
        tracker.reject(local).unwrap();
        assert_eq!(tracker.reject(local), Err(ProjectileError::UnknownLocal(local)));

        tracker.observe(3, Position::ZERO, Velocity::ZERO, 0);
        assert!(tracker.remove(3));
        assert!(!tracker.remove(3));
    }

    #[test]
    fn test_prune_window_and_confirm_timeout() {
        let (tracker, clock) = tracker();
        tracker.spawn_local(Position::ZERO, Velocity::ZERO);
        tracker.observe(1, Position::ZERO, Velocity::ZERO, 1_000 * MS);
        tracker.observe(1, Position::new(1.0, 0.0), Velocity::ZERO, 1_400 * MS);
        tracker.observe(2, Position::ZERO, Velocity::ZERO, 1_000 * MS);

        clock.set(1_600 * MS);
        let report = tracker.prune(clock.now_ns());
        assert_eq!(report.samples, 2);
        assert_eq!(report.projectiles, 1);
        assert_eq!(report.unconfirmed, 0);
        assert_eq!(tracker.tracked_count(), 1);

        let report = tracker.prune(2_100 * MS);
        assert_eq!(report.unconfirmed, 1);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_history_is_capped() {
        let config = ProjectileConfig {
            history: 3,
            ..ProjectileConfig::default()
        };
        let tracker = ProjectileTracker::new(config);
        for i in 0..10 {
            tracker.observe(1, Position::new(f64::from(i), 0.0), Velocity::ZERO, u64::from(i as u32));
        }
        // Oldest kept sample is x = 7.
        assert_eq!(tracker.position_at(1, 0).unwrap().x, 7.0);
    }

    #[tokio::test]
    async fn test_pruner_runs_and_stops() {
        let clock = Arc::new(ManualClock::new(10_000 * MS));
        let config = ProjectileConfig {
            prune_interval_ms: 5,
            ..ProjectileConfig::default()
        };
        let tracker = ProjectileTracker::with_clock(config, clock);
        tracker.observe(1, Position::ZERO, Velocity::ZERO, 0);

        let pruner = tracker.spawn_pruner();
        for _ in 0..100 {
            if tracker.tracked_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(tracker.tracked_count(), 0);
        pruner.shutdown().await;
    }

    #[tokio::test]
    async fn test_pruner_with_zero_interval_still_runs() {
        let clock = Arc::new(ManualClock::new(10_000 * MS));
        let config = ProjectileConfig {
            prune_interval_ms: 0,
            ..ProjectileConfig::default()
        };
        let tracker = ProjectileTracker::with_clock(config, clock);
        tracker.observe(1, Position::ZERO, Velocity::ZERO, 0);

        let pruner = tracker.spawn_pruner();
        for _ in 0..100 {
            if tracker.tracked_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(tracker.tracked_count(), 0);
        pruner.shutdown().await;
    }
}
