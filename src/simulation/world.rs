//! Simulation world that ties everything together
//!
//! Owns the road network, its traffic lights and the agent population, and
//! runs one update pass at a time. The world knows nothing about threads;
//! [`super::clock::SimulationClock`] drives it from the shared state.

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::agent::{AdvanceOutcome, Agent, AgentStyle};
use super::error::{SimError, SimResult};
use super::generator::{self, GeneratedMap, GraphMode};
use super::road_network::RoadNetwork;
use super::shared_state::AgentTelemetry;
use super::traffic_light::TrafficLights;
use super::types::{
    AgentId, EdgeKey, IdGenerator, NodeId, Rgb, AGENT_RADIUS, MAX_AGENT_SPEED, MIN_AGENT_SPEED,
};

/// Colours of the first agents of every spawn
const PALETTE: [Rgb; 4] = [
    Rgb(255, 0, 0),
    Rgb(0, 255, 0),
    Rgb(0, 0, 255),
    Rgb(255, 255, 0),
];

/// Running counters for the end-of-run summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Update passes run
    pub steps: u64,
    pub reroutes: u64,
    /// Reroutes that had to fall back to a random path
    pub reroute_fallbacks: u64,
    pub completed_paths: u64,
    pub faults: u64,
}

/// The main simulation world
pub struct SimWorld {
    /// Shared with published snapshots; edits copy on write
    network: Arc<RoadNetwork>,

    /// Traffic light controllers keyed by intersection
    pub lights: TrafficLights,

    /// Agents in id order
    pub agents: Vec<Agent>,

    /// Roads reported closed, both directions
    pub closed_edges: BTreeSet<EdgeKey>,

    /// Closures reported by agents since the last propagation pass
    reported: Vec<EdgeKey>,

    ids: IdGenerator,
    rng: StdRng,

    /// Simulated time
    pub time: f32,

    pub stats: SimStats,

    /// Bumped whenever the network changes, road edits included
    topology_version: u64,

    /// Bumped only when a new map is loaded. Node ids stay valid until then.
    map_version: u64,

    /// Last fault, kept until the next one
    pub fault: Option<String>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    fn new_internal(rng: StdRng) -> Self {
        Self {
            network: Arc::new(RoadNetwork::new()),
            lights: TrafficLights::new(),
            agents: Vec::new(),
            closed_edges: BTreeSet::new(),
            reported: Vec::new(),
            ids: IdGenerator::new(),
            rng,
            time: 0.0,
            stats: SimStats::default(),
            topology_version: 0,
            map_version: 0,
            fault: None,
        }
    }

    pub fn new() -> Self {
        Self::new_internal(StdRng::from_os_rng())
    }

    /// Create a new SimWorld with a seeded RNG for reproducible simulations
    pub fn new_with_seed(seed: u64) -> Self {
        Self::new_internal(StdRng::seed_from_u64(seed))
    }

    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    /// The current network as a shareable snapshot
    pub fn network_snapshot(&self) -> Arc<RoadNetwork> {
        Arc::clone(&self.network)
    }

    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    pub fn map_version(&self) -> u64 {
        self.map_version
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn next_agent_id(&mut self) -> AgentId {
        self.ids.next_agent_id()
    }

    /// Logs a fault and keeps it for the next publish
    pub fn record_fault(&mut self, err: &SimError) {
        error!("Simulation fault: {err}");
        self.stats.faults += 1;
        self.fault = Some(err.to_string());
    }

    /// Generates a new map and gives every existing agent a fresh path on it
    pub fn generate(&mut self, mode: GraphMode, size: usize) -> SimResult<()> {
        let map = generator::generate(mode, size, &mut self.rng)?;
        self.load_map(map);

        let network = &self.network;
        let mut failures = Vec::new();
        for agent in &mut self.agents {
            if let Err(err) = agent.new_random_path(network, &mut self.rng) {
                failures.push(err);
            }
        }
        for err in &failures {
            self.record_fault(err);
        }
        Ok(())
    }

    /// Swaps in a network and its lights as a whole
    pub fn load_map(&mut self, map: GeneratedMap) {
        self.network = Arc::new(map.network);
        self.lights = map.lights;
        self.closed_edges.clear();
        self.reported.clear();
        self.topology_version += 1;
        self.map_version += 1;
    }

    fn random_style(&mut self, index: usize) -> AgentStyle {
        let color = match PALETTE.get(index) {
            Some(color) => *color,
            None => Rgb(self.rng.random(), self.rng.random(), self.rng.random()),
        };
        AgentStyle {
            color,
            max_speed: self.rng.random_range(MIN_AGENT_SPEED..=MAX_AGENT_SPEED) as f32,
            radius: AGENT_RADIUS,
        }
    }

    /// Replaces the agent population with `count` fresh agents
    pub fn spawn_agents(&mut self, count: usize) -> SimResult<usize> {
        if self.network.node_count() == 0 {
            warn!("Cannot spawn agents before a graph is generated");
            return Ok(0);
        }

        let mut agents = Vec::with_capacity(count);
        for index in 0..count {
            let style = self.random_style(index);
            let id = self.ids.next_agent_id();
            agents.push(Agent::spawn(id, style, &self.network, &mut self.rng)?);
        }
        self.agents = agents;

        info!("Spawned {} agents", self.agents.len());
        Ok(self.agents.len())
    }

    /// Adds a prepared agent, keeping id order
    pub fn insert_agent(&mut self, agent: Agent) {
        let slot = self.agents.partition_point(|a| a.id < agent.id);
        self.agents.insert(slot, agent);
    }

    /// Opens or closes a road, refreshes reachability, and reroutes every
    /// agent whose remaining path uses a newly closed road.
    /// Returns whether the road state changed.
    pub fn set_edge_open(&mut self, from: NodeId, to: NodeId, open: bool) -> SimResult<bool> {
        let network = Arc::make_mut(&mut self.network);
        if !network.set_edge_open(from, to, open)? {
            return Ok(false);
        }
        network.recompute_reachability();
        self.topology_version += 1;

        info!(
            "Road {} - {} {}",
            from,
            to,
            if open { "opened" } else { "closed" }
        );

        if open {
            self.closed_edges.remove(&(from, to));
            self.closed_edges.remove(&(to, from));
        } else {
            self.closed_edges.insert((from, to));
            self.closed_edges.insert((to, from));
            self.reroute_agents_through((from, to));
        }
        Ok(true)
    }

    /// Reroutes every agent whose remaining path uses `edge`.
    /// Returns how many were rerouted.
    pub fn reroute_agents_through(&mut self, edge: EdgeKey) -> usize {
        let network = &self.network;
        let mut rerouted = 0;
        let mut failures = Vec::new();

        for agent in self.agents.iter_mut().filter(|a| a.traverses(edge)) {
            match agent.reroute_on_closed_edge(network, edge, &self.closed_edges, &mut self.rng) {
                Ok(fallback) => {
                    rerouted += 1;
                    self.stats.reroutes += 1;
                    if fallback {
                        self.stats.reroute_fallbacks += 1;
                    }
                }
                Err(err) => failures.push(err),
            }
        }

        for err in &failures {
            self.record_fault(err);
        }
        rerouted
    }

    /// Spreads closures reported by agents during the last pass to every
    /// other agent still planning to use them
    pub fn propagate_reported_closures(&mut self) -> usize {
        let reported: Vec<EdgeKey> = std::mem::take(&mut self.reported)
            .into_iter()
            .filter(|edge| self.closed_edges.contains(edge))
            .collect();
        reported
            .into_iter()
            .map(|edge| self.reroute_agents_through(edge))
            .sum()
    }

    /// One update pass: traffic lights first, then every agent in id order
    pub fn step(&mut self, dt: f32) {
        self.time += dt;
        self.stats.steps += 1;

        for light in self.lights.values_mut() {
            light.update(dt, &self.agents);
        }

        let mut outcomes = Vec::with_capacity(self.agents.len());
        for index in 0..self.agents.len() {
            let (before, rest) = self.agents.split_at_mut(index);
            let Some((agent, after)) = rest.split_first_mut() else {
                break;
            };
            let others = before.iter().chain(after.iter());
            let outcome = agent.advance(
                &self.network,
                &self.lights,
                others,
                dt,
                &mut self.closed_edges,
                &mut self.rng,
            );
            outcomes.push((agent.id, outcome));
        }

        for (id, outcome) in outcomes {
            match outcome {
                Ok(AdvanceOutcome::Rerouted { edge, fallback }) => {
                    self.stats.reroutes += 1;
                    if fallback {
                        self.stats.reroute_fallbacks += 1;
                    }
                    self.reported.push(edge);
                }
                Ok(AdvanceOutcome::NewPath) => {
                    self.stats.completed_paths += 1;
                    debug!("Agent {:?} finished its path", id);
                }
                Ok(AdvanceOutcome::Moved) | Ok(AdvanceOutcome::ReachedNode(_)) => {}
                Err(err) => self.record_fault(&err),
            }
        }
    }

    pub fn telemetry(&self) -> BTreeMap<AgentId, AgentTelemetry> {
        self.agents
            .iter()
            .map(|agent| (agent.id, AgentTelemetry::from(agent)))
            .collect()
    }

    /// Log a summary of the world state
    pub fn log_summary(&self) {
        info!("=== Traffic Simulation Summary ===");
        info!("Time: {:.2}s", self.time);
        info!(
            "Nodes: {}, Roads: {} ({} open), Traffic lights: {}",
            self.network.node_count(),
            self.network.road_count(),
            self.network.open_road_count(),
            self.lights.len()
        );
        info!("Agents: {}", self.agents.len());
        for agent in &self.agents {
            debug!(
                "  Agent {:?}: speed={:.1}, position=({:.1}, {:.1}), path_remaining={}",
                agent.id.0,
                agent.actual_speed,
                agent.position.x,
                agent.position.y,
                agent.path.len().saturating_sub(agent.path_index + 1)
            );
        }
        if !self.closed_edges.is_empty() {
            info!("Closed edges: {:?}", self.closed_edges);
        }
    }
}
