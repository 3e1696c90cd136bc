//! # Configuration
//!
//! All tunables live in one TOML document loaded once at startup. Every
//! section and field is optional; missing values fall back to the defaults
//! below. Durations are whole milliseconds (`*_ms`), with `0` meaning
//! "disabled" where a timeout is optional.
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:7777"
//! max_players = 32
//!
//! [lag_compensation]
//! max_compensation_ms = 5000
//! ```

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Default frame size limit (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1 << 20;

/// Root configuration document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Listener and per-connection limits.
    pub server: ServerConfig,
    /// Client connection settings.
    pub client: ClientConfig,
    /// Snapshot history.
    pub snapshots: SnapshotConfig,
    /// Rewind bounds.
    pub lag_compensation: LagCompensationConfig,
    /// Client prediction.
    pub prediction: PredictionConfig,
    /// Animation sync.
    pub animation: AnimationConfig,
    /// Projectile sync.
    pub projectiles: ProjectileConfig,
}

impl NetConfig {
    /// Parses a TOML document and validates it.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] on malformed TOML, [`ConfigError::Invalid`]
    /// when [`validate`](Self::validate) fails.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file can't be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "loaded net config");
        Ok(config)
    }

    /// Rejects combinations the runtime can't honor.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.server.max_players == 0 {
            return Err(ConfigError::Invalid("server.max_players must be at least 1".into()));
        }
        if self.server.buffer_size == 0 {
            return Err(ConfigError::Invalid("server.buffer_size must be at least 1".into()));
        }
        if self.client.buffer_size == 0 {
            return Err(ConfigError::Invalid("client.buffer_size must be at least 1".into()));
        }
        if self.server.max_frame_bytes == 0 || self.client.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid("max_frame_bytes must be at least 1".into()));
        }
        if self.lag_compensation.min_compensation_ms > self.lag_compensation.max_compensation_ms {
            return Err(ConfigError::Invalid(format!(
                "lag_compensation.min_compensation_ms ({}) exceeds max_compensation_ms ({})",
                self.lag_compensation.min_compensation_ms, self.lag_compensation.max_compensation_ms,
            )));
        }
        if self.prediction.history == 0 {
            return Err(ConfigError::Invalid("prediction.history must be at least 1".into()));
        }
        if !(self.prediction.error_threshold.is_finite() && self.prediction.error_threshold >= 0.0) {
            return Err(ConfigError::Invalid(
                "prediction.error_threshold must be a non-negative number".into(),
            ));
        }
        if self.animation.buffer_depth == 0 {
            return Err(ConfigError::Invalid("animation.buffer_depth must be at least 1".into()));
        }
        if self.projectiles.history == 0 {
            return Err(ConfigError::Invalid("projectiles.history must be at least 1".into()));
        }
        if self.projectiles.prune_interval_ms == 0 {
            return Err(ConfigError::Invalid("projectiles.prune_interval_ms must be at least 1".into()));
        }
        Ok(())
    }
}

/// `0` disables an optional timeout.
fn optional_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Server listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,
    /// Connections beyond this are accepted then closed.
    pub max_players: usize,
    /// Per-client outbound queue depth; the shared input queue holds
    /// `buffer_size * max_players` commands.
    pub buffer_size: usize,
    /// Read deadline per frame (0 = wait forever).
    pub read_timeout_ms: u64,
    /// Write deadline per frame (0 = wait forever).
    pub write_timeout_ms: u64,
    /// How long `stop` waits for connection tasks.
    pub shutdown_timeout_ms: u64,
    /// Largest accepted frame payload.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7777)),
            max_players: 16,
            buffer_size: 64,
            read_timeout_ms: 0,
            write_timeout_ms: 5_000,
            shutdown_timeout_ms: 5_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerConfig {
    /// Capacity of the shared input queue.
    #[must_use]
    pub const fn input_queue_capacity(&self) -> usize {
        self.buffer_size.saturating_mul(self.max_players)
    }

    /// Read deadline, if enabled.
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        optional_ms(self.read_timeout_ms)
    }

    /// Write deadline, if enabled.
    #[must_use]
    pub fn write_timeout(&self) -> Option<Duration> {
        optional_ms(self.write_timeout_ms)
    }

    /// Shutdown wait.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Client connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Latency estimate refresh period.
    pub heartbeat_ms: u64,
    /// TCP connect deadline.
    pub connect_timeout_ms: u64,
    /// Inbound update queue and outbound input queue depth.
    pub buffer_size: usize,
    /// Longest silence tolerated from the server (0 = wait forever).
    pub read_timeout_ms: u64,
    /// Write deadline per frame (0 = wait forever).
    pub write_timeout_ms: u64,
    /// How long `disconnect` waits for tasks.
    pub shutdown_timeout_ms: u64,
    /// Largest accepted frame payload.
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 1_000,
            connect_timeout_ms: 5_000,
            buffer_size: 64,
            read_timeout_ms: 0,
            write_timeout_ms: 5_000,
            shutdown_timeout_ms: 5_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ClientConfig {
    /// Read deadline, if enabled.
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        optional_ms(self.read_timeout_ms)
    }

    /// Heartbeat period (never zero).
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms.max(1))
    }

    /// Connect deadline.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Write deadline, if enabled.
    #[must_use]
    pub fn write_timeout(&self) -> Option<Duration> {
        optional_ms(self.write_timeout_ms)
    }

    /// Shutdown wait.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Snapshot history settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Ring capacity (raised to 2 if smaller).
    pub capacity: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { capacity: 128 }
    }
}

/// Lag compensation bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LagCompensationConfig {
    /// Largest latency honored.
    pub max_compensation_ms: u64,
    /// Smallest latency honored.
    pub min_compensation_ms: u64,
}

impl Default for LagCompensationConfig {
    fn default() -> Self {
        Self {
            max_compensation_ms: 500,
            min_compensation_ms: 10,
        }
    }
}

impl LagCompensationConfig {
    /// Bounds for high-latency modes (satellite links, long-haul relays).
    #[must_use]
    pub const fn high_latency() -> Self {
        Self {
            max_compensation_ms: 5_000,
            min_compensation_ms: 10,
        }
    }

    /// Upper bound as a duration.
    #[must_use]
    pub const fn max_compensation(&self) -> Duration {
        Duration::from_millis(self.max_compensation_ms)
    }

    /// Lower bound as a duration.
    #[must_use]
    pub const fn min_compensation(&self) -> Duration {
        Duration::from_millis(self.min_compensation_ms)
    }
}

/// Client prediction settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Predicted states retained for reconciliation.
    pub history: usize,
    /// Position error (world units) at which a correction is replayed.
    pub error_threshold: f64,
    /// Cap on the time step used while replaying history.
    pub max_replay_dt_ms: u64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            history: 128,
            error_threshold: 1.0,
            max_replay_dt_ms: 100,
        }
    }
}

impl PredictionConfig {
    /// Replay step cap in seconds.
    #[must_use]
    pub fn max_replay_dt_secs(&self) -> f64 {
        Duration::from_millis(self.max_replay_dt_ms).as_secs_f64()
    }
}

/// Animation sync settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// States buffered per entity before the oldest is released.
    pub buffer_depth: usize,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self { buffer_depth: 3 }
    }
}

/// Projectile sync settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectileConfig {
    /// Position samples kept per projectile.
    pub history: usize,
    /// Samples older than this are pruned.
    pub window_ms: u64,
    /// Background pruner period.
    pub prune_interval_ms: u64,
    /// Unconfirmed local projectiles are dropped after this long.
    pub confirm_timeout_ms: u64,
}

impl Default for ProjectileConfig {
    fn default() -> Self {
        Self {
            history: 32,
            window_ms: 500,
            prune_interval_ms: 100,
            confirm_timeout_ms: 1_000,
        }
    }
}

impl ProjectileConfig {
    /// Pruning window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Pruner period (never zero).
    #[must_use]
    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms.max(1))
    }

    /// Confirmation deadline.
    #[must_use]
    pub const fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}
