//! Fixed-timestep loop driving the world from the shared state
//!
//! Each tick drains the command queue, applies topology edits, spreads
//! closures reported during the previous pass, runs one world update unless
//! paused, and publishes a new telemetry snapshot.

use anyhow::Context;
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};

use super::error::SimError;
use super::shared_state::{Command, SharedHandle};
use super::world::{SimStats, SimWorld};

/// Loop timing and run length
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Simulated seconds per tick before the speed multiplier
    pub frame_delta: f32,
    /// Throttle in ticks per wall-clock second; 0 runs unthrottled
    pub frame_rate: u32,
    /// Stop after this many ticks; `None` runs until shutdown
    pub max_ticks: Option<u64>,
    /// Log a world summary every this many ticks; 0 disables it
    pub summary_every: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            frame_delta: 1.0 / 60.0,
            frame_rate: 60,
            max_ticks: None,
            summary_every: 0,
        }
    }
}

/// World construction parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Seed for reproducible runs; `None` seeds from the OS
    pub seed: Option<u64>,
    /// Initial multiplier applied to every frame delta
    pub speed: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: None,
            speed: 1.0,
        }
    }
}

/// Figures reported when the loop ends
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub ticks: u64,
    pub agents: usize,
    pub nodes: usize,
    pub roads: usize,
    pub traffic_lights: usize,
    pub closed_edges: usize,
    pub stats: SimStats,
}

pub struct SimulationClock {
    pub world: SimWorld,
    shared: SharedHandle,
    paused: bool,
    speed: f32,
    step_requested: bool,
    /// Topology version last published to the shared state
    published_topology: u64,
    ticks: u64,
}

impl SimulationClock {
    pub fn new(shared: SharedHandle, config: &SimConfig) -> Self {
        let world = match config.seed {
            Some(seed) => SimWorld::new_with_seed(seed),
            None => SimWorld::new(),
        };
        let mut clock = Self::with_world(world, shared);
        clock.speed = config.speed;
        clock
    }

    pub fn with_world(world: SimWorld, shared: SharedHandle) -> Self {
        Self {
            world,
            shared,
            paused: false,
            speed: 1.0,
            step_requested: false,
            published_topology: 0,
            ticks: 0,
        }
    }

    pub fn shared(&self) -> &SharedHandle {
        &self.shared
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Runs one tick. Returns whether the world was updated.
    pub fn tick(&mut self, frame_dt: f32) -> bool {
        self.ticks += 1;

        let commands = self.shared.lock().drain_commands();
        for command in commands {
            self.apply(command);
        }

        self.world.propagate_reported_closures();

        let stepped = if !self.paused {
            self.step_requested = false;
            self.world.step(frame_dt * self.speed);
            true
        } else if self.step_requested {
            self.step_requested = false;
            self.world.step(frame_dt * self.speed);
            true
        } else {
            false
        };

        self.publish();
        stepped
    }

    fn apply(&mut self, command: Command) {
        debug!("Applying command {:?}", command);
        match command {
            Command::Pause => self.paused = true,
            Command::Resume => self.paused = false,
            Command::TogglePause => self.paused = !self.paused,
            Command::Step if self.paused => self.step_requested = true,
            Command::Step => debug!("Ignoring single step while running"),
            Command::SetSpeed(speed) => {
                if speed.is_finite() && speed >= 0.0 {
                    self.speed = speed;
                } else {
                    warn!("Ignoring invalid simulation speed {speed}");
                }
            }
            Command::Generate { mode, size } => {
                if let Err(err) = self.world.generate(mode, size) {
                    self.world.record_fault(&err);
                }
            }
            Command::SpawnAgents { count } => {
                if let Err(err) = self.world.spawn_agents(count) {
                    self.world.record_fault(&err);
                }
            }
            Command::SetEdgeOpen {
                from,
                to,
                open,
                map_version,
            } => {
                let current = self.world.map_version();
                if let Some(version) = map_version {
                    if version != current {
                        warn!(
                            "Dropping edit of road {} - {} made against map {} (now {})",
                            from, to, version, current
                        );
                        return;
                    }
                }
                match self.world.set_edge_open(from, to, open) {
                    Ok(changed) => {
                        if !changed {
                            let state = if open { "open" } else { "closed" };
                            debug!("Road {} - {} already {}", from, to, state);
                        }
                    }
                    Err(err) => {
                        error!("Rejected road edit: {err}");
                        debug_assert!(
                            !matches!(err, SimError::InvalidEdge { .. }),
                            "edit of a road missing from the network: {err}"
                        );
                    }
                }
            }
            Command::Shutdown => self.shared.shutdown(),
        }
    }

    /// Copies the world's outward state into the shared record. Telemetry is
    /// built before the lock is taken.
    fn publish(&mut self) {
        let agents = self.world.telemetry();
        let closed_edges = self.world.closed_edges.clone();
        let topology_version = self.world.topology_version();
        let topology = (topology_version != self.published_topology).then(|| {
            let network = self.world.network_snapshot();
            let layout = network.normalized_layout();
            (network, layout)
        });

        let mut state = self.shared.lock();
        state.paused = self.paused;
        if let Some((network, layout)) = topology {
            state.network = Some(network);
            state.layout = layout;
            state.topology_version = topology_version;
            state.map_version = self.world.map_version();
        }
        state.agents = agents;
        state.closed_edges = closed_edges;
        state.fault = self.world.fault.clone();
        state.version += 1;
        drop(state);

        self.published_topology = topology_version;
    }

    pub fn summary(&self) -> RunSummary {
        let network = self.world.network();
        RunSummary {
            ticks: self.ticks,
            agents: self.world.agents.len(),
            nodes: network.node_count(),
            roads: network.road_count(),
            traffic_lights: self.world.lights.len(),
            closed_edges: network.road_count() - network.open_road_count(),
            stats: self.world.stats.clone(),
        }
    }

    /// Runs ticks until shutdown is requested or the tick budget is spent,
    /// then signals shutdown to every other context
    pub fn run(mut self, config: &LoopConfig) -> anyhow::Result<RunSummary> {
        let frame_time = (config.frame_rate > 0)
            .then(|| Duration::from_secs_f64(1.0 / f64::from(config.frame_rate)));

        info!(
            "Simulation loop started (dt={}s, fps={}, ticks={:?})",
            config.frame_delta, config.frame_rate, config.max_ticks
        );

        while self.shared.is_running() {
            if config.max_ticks.is_some_and(|max| self.ticks >= max) {
                break;
            }

            let started = Instant::now();
            self.tick(config.frame_delta);

            if config.summary_every > 0 && self.ticks % config.summary_every == 0 {
                self.world.log_summary();
            }

            if let Some(frame_time) = frame_time {
                if let Some(rest) = frame_time.checked_sub(started.elapsed()) {
                    std::thread::sleep(rest);
                }
            }
        }

        self.shared.shutdown();

        let summary = self.summary();
        if let Some(fault) = &self.world.fault {
            warn!("Last simulation fault: {fault}");
        }
        log_run_summary(&summary);
        Ok(summary)
    }
}

/// Runs the clock on its own thread
pub fn spawn_clock(
    clock: SimulationClock,
    config: LoopConfig,
) -> anyhow::Result<std::thread::JoinHandle<anyhow::Result<RunSummary>>> {
    std::thread::Builder::new()
        .name("simulation".into())
        .spawn(move || clock.run(&config))
        .context("Failed to start the simulation thread")
}

fn log_run_summary(summary: &RunSummary) {
    info!("=== SIMULATION COMPLETE ===");
    info!("Ticks run: {}", summary.ticks);
    info!("Agents: {}", summary.agents);
    info!("Nodes: {}", summary.nodes);
    info!("Roads: {}", summary.roads);
    info!("Traffic lights: {}", summary.traffic_lights);
    info!(
        "Reroutes: {} ({} fallbacks)",
        summary.stats.reroutes, summary.stats.reroute_fallbacks
    );
    info!("Paths completed: {}", summary.stats.completed_paths);
    info!("Closed edges: {}", summary.closed_edges);
}
