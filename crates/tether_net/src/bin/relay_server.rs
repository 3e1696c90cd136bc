//! # Relay Server
//!
//! Minimal authoritative loop wiring the transport, snapshot store and lag
//! compensator together at 20Hz.
//!
//! ## Usage
//!
//! ```bash
//! relay_server [config.toml]
//! LOG_FORMAT=json RUST_LOG=tether_net=debug relay_server
//! ```
//!
//! Each joined player owns one entity. `"input"` commands steer it,
//! `"position"` commands are shots at a point, checked with lag
//! compensation against every other entity.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tether_core::{Clock, Component, Input, Position, SystemClock, Velocity};
use tether_net::config::NetConfig;
use tether_net::snapshot::{EntitySnapshot, SnapshotStore, WorldSnapshot};
use tether_net::transport::{PlayerId, Server, ServerEvent};
use tether_net::{InputCommand, LagCompensator, TickLoop, DEFAULT_TICK_RATE};
use tracing::{debug, error, info, warn};

/// Units per second at full input.
const MOVE_SPEED: f64 = 120.0;

/// Hit radius for shots.
const HIT_RADIUS: f64 = 5.0;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

struct Relay {
    server: Server,
    store: Arc<SnapshotStore>,
    lag: LagCompensator,
    clock: Arc<dyn Clock>,
    entities: BTreeMap<PlayerId, EntitySnapshot>,
    dt: f64,
}

impl Relay {
    fn apply_events(&mut self) {
        for event in self.server.drain_events() {
            match event {
                ServerEvent::PlayerJoined { player_id, addr } => {
                    info!(player_id, %addr, "spawning entity");
                    self.entities.insert(
                        player_id,
                        EntitySnapshot::new(player_id, Position::ZERO, Velocity::ZERO),
                    );
                }
                ServerEvent::PlayerLeft { player_id, reason } => {
                    info!(player_id, ?reason, "despawning entity");
                    self.entities.remove(&player_id);
                }
            }
        }
    }

    fn apply_input(&mut self, command: &InputCommand) {
        if command.input_type == Input::KIND.type_name() {
            match command.payload::<Input>() {
                Ok(input) => {
                    let (dx, dy) = input.normalized();
                    if let Some(entity) = self.entities.get_mut(&command.player_id) {
                        entity.velocity = Velocity::new(dx * MOVE_SPEED, dy * MOVE_SPEED);
                    }
                }
                Err(e) => debug!(player_id = command.player_id, error = %e, "bad input payload"),
            }
        } else if command.input_type == Position::KIND.type_name() {
            match command.payload::<Position>() {
                Ok(aim) => self.resolve_shot(command, aim),
                Err(e) => debug!(player_id = command.player_id, error = %e, "bad shot payload"),
            }
        } else {
            debug!(
                player_id = command.player_id,
                input_type = %command.input_type,
                "ignoring input"
            );
        }
    }

    fn resolve_shot(&self, command: &InputCommand, aim: Position) {
        let latency = Duration::from_nanos(self.clock.now_ns().saturating_sub(command.timestamp_ns));
        let targets = self.entities.keys().filter(|&&id| id != command.player_id);
        for &target_id in targets {
            match self
                .lag
                .validate_hit(command.player_id, target_id, aim, latency, HIT_RADIUS)
            {
                Ok(result) if result.hit => {
                    info!(
                        attacker = command.player_id,
                        target = target_id,
                        distance = result.distance,
                        sequence = result.sequence,
                        "hit confirmed"
                    );
                }
                Ok(_) => {}
                Err(e) => debug!(attacker = command.player_id, target = target_id, error = %e, "shot not validated"),
            }
        }
    }

    fn step(&mut self) {
        self.apply_events();
        for command in self.server.drain_inputs() {
            self.apply_input(&command);
        }

        let mut world = WorldSnapshot::new();
        for entity in self.entities.values_mut() {
            entity.position = entity.position.advanced(entity.velocity, self.dt);
            world.insert(entity.clone());
        }
        let sequence = self.store.add_snapshot(world);

        let Ok(snapshot) = self.store.get_snapshot_at_sequence(sequence) else {
            return;
        };
        for entity in snapshot.entities.values() {
            if let Err(e) = self.server.broadcast_state_update(entity.to_state_update()) {
                warn!(entity_id = entity.entity_id, error = %e, "broadcast failed");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => NetConfig::load(path)?,
        None => NetConfig::default(),
    };
    config.validate()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(SnapshotStore::from_config(&config.snapshots, Arc::clone(&clock)));
    let server = Server::bind(config.server.clone()).await?;
    info!(addr = %server.local_addr(), tick_rate = DEFAULT_TICK_RATE, "relay server running");

    let mut tick_loop = TickLoop::new(DEFAULT_TICK_RATE);
    let mut relay = Relay {
        server,
        lag: LagCompensator::new(Arc::clone(&store), config.lag_compensation),
        store,
        clock,
        entities: BTreeMap::new(),
        dt: tick_loop.tick_duration().as_secs_f64(),
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "signal handler failed");
                }
                break;
            }
            () = tick_loop.wait_for_next_tick() => {
                let start = tick_loop.begin_tick();
                relay.step();
                tick_loop.end_tick(start);
            }
        }
    }

    info!(ticks = tick_loop.tick_count(), stats = ?tick_loop.stats(), "shutting down");
    relay.server.stop().await?;
    info!(transport = ?relay.server.stats(), lag = ?relay.lag.stats(), "relay server stopped");
    Ok(())
}
