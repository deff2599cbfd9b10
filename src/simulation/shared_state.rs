//! State shared between the simulation thread and its inspectors
//!
//! One record behind one mutex. Collaborators push [`Command`]s into an
//! append-only queue and read versioned snapshots; the simulation thread
//! drains the queue once per tick and publishes fresh telemetry. Every
//! critical section is a short copy in or out.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::agent::Agent;
use super::generator::GraphMode;
use super::road_network::RoadNetwork;
use super::types::{AgentId, EdgeKey, Lane, NodeId, Position, Rgb};

/// A request from outside the simulation thread, applied at the next tick
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Pause,
    Resume,
    TogglePause,
    /// Run exactly one update while paused
    Step,
    /// Multiplier applied to the frame delta
    SetSpeed(f32),
    Generate {
        mode: GraphMode,
        size: usize,
    },
    /// Replaces the whole agent population
    SpawnAgents {
        count: usize,
    },
    /// `map_version` pins the edit to the map its node ids came from;
    /// edits for an older map are dropped
    SetEdgeOpen {
        from: NodeId,
        to: NodeId,
        open: bool,
        map_version: Option<u64>,
    },
    Shutdown,
}

/// Per-agent data published every tick
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTelemetry {
    pub color: Rgb,
    /// Heading in degrees
    pub direction: f32,
    pub speed: f32,
    pub current_edge: Option<Lane>,
    pub path: Vec<NodeId>,
    pub path_index: usize,
    pub coords: Position,
}

impl From<&Agent> for AgentTelemetry {
    fn from(agent: &Agent) -> Self {
        Self {
            color: agent.color,
            direction: agent.heading_degrees(),
            speed: agent.actual_speed,
            current_edge: agent.current_edge,
            path: agent.path.clone(),
            path_index: agent.path_index,
            coords: agent.position,
        }
    }
}

/// The inspector windows, at most one of each kind open at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectorKind {
    AgentDetail,
    EdgeState,
}

#[derive(Debug)]
pub struct SharedState {
    /// False requests an orderly shutdown of every context
    pub running: bool,
    pub paused: bool,
    /// Last published topology, replaced as a whole
    pub network: Option<Arc<RoadNetwork>>,
    /// Changes with every published network, road edits included
    pub topology_version: u64,
    /// Changes only when a new map replaces the network
    pub map_version: u64,
    /// Layout of `network` normalized to `[-1, 1]`
    pub layout: BTreeMap<NodeId, Position>,
    pub agents: BTreeMap<AgentId, AgentTelemetry>,
    /// Roads reported closed, in both directions
    pub closed_edges: BTreeSet<EdgeKey>,
    /// Bumped on every publish
    pub version: u64,
    /// Last simulation fault worth showing to a user
    pub fault: Option<String>,
    pub agent_inspector_open: bool,
    pub edge_editor_open: bool,
    commands: VecDeque<Command>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            running: true,
            paused: false,
            network: None,
            topology_version: 0,
            map_version: 0,
            layout: BTreeMap::new(),
            agents: BTreeMap::new(),
            closed_edges: BTreeSet::new(),
            version: 0,
            fault: None,
            agent_inspector_open: false,
            edge_editor_open: false,
            commands: VecDeque::new(),
        }
    }

    pub fn push_command(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    /// Takes every queued command in submission order
    pub fn drain_commands(&mut self) -> Vec<Command> {
        self.commands.drain(..).collect()
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    fn inspector_flag(&mut self, kind: InspectorKind) -> &mut bool {
        match kind {
            InspectorKind::AgentDetail => &mut self.agent_inspector_open,
            InspectorKind::EdgeState => &mut self.edge_editor_open,
        }
    }
}

/// A consistent copy of the telemetry of one publish
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub version: u64,
    pub paused: bool,
    pub agents: BTreeMap<AgentId, AgentTelemetry>,
    pub closed_edges: BTreeSet<EdgeKey>,
    pub fault: Option<String>,
}

/// Cloneable handle to the shared record
#[derive(Debug, Clone, Default)]
pub struct SharedHandle {
    inner: Arc<Mutex<SharedState>>,
}

impl SharedHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the record. A panic on another thread does not leave the
    /// record half-written, so a poisoned lock is recovered.
    pub fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn submit(&self, command: Command) {
        self.lock().push_command(command);
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn shutdown(&self) {
        self.lock().running = false;
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let state = self.lock();
        TelemetrySnapshot {
            version: state.version,
            paused: state.paused,
            agents: state.agents.clone(),
            closed_edges: state.closed_edges.clone(),
            fault: state.fault.clone(),
        }
    }

    /// The published network with the map version its node ids belong to
    pub fn topology(&self) -> Option<(u64, Arc<RoadNetwork>)> {
        let state = self.lock();
        state
            .network
            .as_ref()
            .map(|network| (state.map_version, Arc::clone(network)))
    }

    /// Marks an inspector of `kind` as open. Returns false if one already is.
    pub fn try_open(&self, kind: InspectorKind) -> bool {
        let mut state = self.lock();
        let flag = state.inspector_flag(kind);
        if *flag {
            return false;
        }
        *flag = true;
        true
    }

    pub fn release(&self, kind: InspectorKind) {
        *self.lock().inspector_flag(kind) = false;
    }
}
