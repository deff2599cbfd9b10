//! Agent movement logic for the traffic simulation
//!
//! An agent drives its path lane by lane with simple leader-following and
//! stops at red lights. Closed roads are found while driving and trigger a
//! reroute.

use log::{debug, warn};
use ordered_float::OrderedFloat;
use rand::seq::IndexedRandom;
use rand::Rng;
use std::collections::BTreeSet;

use super::error::{SimError, SimResult};
use super::road_network::RoadNetwork;
use super::traffic_light::TrafficLights;
use super::types::{
    AgentId, EdgeKey, Lane, LaneSide, NodeId, Position, Rgb, CRUISE_FRACTION,
    INTERSECTION_APPROACH_DISTANCE, MAX_PATH_ATTEMPTS, SAFE_FOLLOWING_MULTIPLIER, SPEED_EPSILON,
    STOP_DISTANCE_MULTIPLIER,
};

/// Appearance and driving limits of an agent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentStyle {
    pub color: Rgb,
    pub max_speed: f32,
    pub radius: f32,
}

/// What an agent did during one [`Agent::advance`]
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// Moved (or waited) along its current lane
    Moved,
    /// Reached the end of a lane at this node
    ReachedNode(NodeId),
    /// Found `edge` closed and planned around it; `fallback` is set when no
    /// detour existed and a fresh random path was taken instead
    Rerouted { edge: EdgeKey, fallback: bool },
    /// The path was used up and a new random one was drawn
    NewPath,
}

/// An agent in the traffic simulation
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: AgentId,
    pub color: Rgb,
    pub max_speed: f32,
    pub radius: f32,
    pub position: Position,
    pub prev_position: Position,
    /// Heading in radians
    pub heading: f32,
    pub actual_speed: f32,
    pub path: Vec<NodeId>,
    pub path_index: usize,
    /// The lane being driven; `None` between lanes
    pub current_edge: Option<Lane>,
    pub side: LaneSide,
    current_target: Option<Position>,
    /// Closed roads this agent has heard of, as of its last reroute
    known_closed: BTreeSet<EdgeKey>,
}

/// Whether two ordered pairs name the same road
fn same_road(a: EdgeKey, b: EdgeKey) -> bool {
    a == b || a == (b.1, b.0)
}

/// Shortest path between two random distinct reachable nodes, avoiding
/// roads in `known_closed` that are still closed.
///
/// Gives up with [`SimError::GraphUnreachable`] after
/// [`MAX_PATH_ATTEMPTS`] draws.
pub fn random_path<R: Rng + ?Sized>(
    network: &RoadNetwork,
    known_closed: &BTreeSet<EdgeKey>,
    rng: &mut R,
) -> SimResult<Vec<NodeId>> {
    let candidates = network.reachable_nodes();
    if candidates.len() < 2 {
        return Err(SimError::GraphUnreachable { attempts: 0 });
    }

    for _ in 0..MAX_PATH_ATTEMPTS {
        let mut picks = candidates.choose_multiple(rng, 2);
        let (Some(&source), Some(&target)) = (picks.next(), picks.next()) else {
            continue;
        };

        match network.shortest_path_filtered(source, target, |key, road| {
            road.is_open || !known_closed.contains(&key)
        }) {
            Ok(path) => return Ok(path),
            Err(SimError::NoPath { .. }) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(SimError::GraphUnreachable {
        attempts: MAX_PATH_ATTEMPTS,
    })
}

impl Agent {
    fn blank(id: AgentId, style: AgentStyle) -> Self {
        Self {
            id,
            color: style.color,
            max_speed: style.max_speed,
            radius: style.radius,
            position: Position::default(),
            prev_position: Position::default(),
            heading: 0.0,
            actual_speed: 0.0,
            path: Vec::new(),
            path_index: 0,
            current_edge: None,
            side: LaneSide::Right,
            current_target: None,
            known_closed: BTreeSet::new(),
        }
    }

    /// Creates an agent on a random path between two reachable nodes
    pub fn spawn<R: Rng + ?Sized>(
        id: AgentId,
        style: AgentStyle,
        network: &RoadNetwork,
        rng: &mut R,
    ) -> SimResult<Self> {
        let mut agent = Self::blank(id, style);
        agent.new_random_path(network, rng)?;
        Ok(agent)
    }

    /// Creates an agent at the start of a given path
    pub fn on_path(
        id: AgentId,
        style: AgentStyle,
        network: &RoadNetwork,
        path: Vec<NodeId>,
    ) -> SimResult<Self> {
        for pair in path.windows(2) {
            if !network.has_road(pair[0], pair[1]) {
                return Err(SimError::InvalidEdge {
                    from: pair[0],
                    to: pair[1],
                });
            }
        }

        let mut agent = Self::blank(id, style);
        agent.path = path;
        agent.place_on_first_lane(network)?;
        Ok(agent)
    }

    pub fn current_node(&self) -> Option<NodeId> {
        self.path.get(self.path_index).copied()
    }

    pub fn destination(&self) -> Option<NodeId> {
        self.path.last().copied()
    }

    /// The road from the current node to the next one on the path
    pub fn next_edge(&self) -> Option<EdgeKey> {
        let from = *self.path.get(self.path_index)?;
        let to = *self.path.get(self.path_index + 1)?;
        Some((from, to))
    }

    /// Roads still ahead on the path, starting with the one being driven
    pub fn remaining_edges(&self) -> impl Iterator<Item = EdgeKey> + '_ {
        self.path
            .get(self.path_index..)
            .unwrap_or_default()
            .windows(2)
            .map(|pair| (pair[0], pair[1]))
    }

    /// Whether the rest of the path uses `edge` in either direction
    pub fn traverses(&self, edge: EdgeKey) -> bool {
        self.remaining_edges().any(|e| same_road(e, edge))
    }

    pub fn known_closed(&self) -> &BTreeSet<EdgeKey> {
        &self.known_closed
    }

    pub fn heading_degrees(&self) -> f32 {
        self.heading.to_degrees()
    }

    /// Replaces the path with a fresh random one and moves the agent to the
    /// start of its first lane
    pub fn new_random_path<R: Rng + ?Sized>(
        &mut self,
        network: &RoadNetwork,
        rng: &mut R,
    ) -> SimResult<()> {
        self.path = random_path(network, &self.known_closed, rng)?;
        self.path_index = 0;
        self.place_on_first_lane(network)
    }

    fn place_on_first_lane(&mut self, network: &RoadNetwork) -> SimResult<()> {
        self.path_index = 0;
        self.current_edge = None;
        self.current_target = None;

        if let Some((from, to)) = self.next_edge() {
            let (start, end) = network.lane_endpoints(from, to, self.side)?;
            self.position = start;
            self.prev_position = start;
            self.heading = start.angle_to(&end);
            self.current_target = Some(end);
            self.current_edge = Some(Lane::new(from, to, self.side));
        }
        Ok(())
    }

    /// Plans a new route to the same destination that avoids `edge`.
    ///
    /// An agent part-way along a lane other than `edge` keeps driving it and
    /// plans from its far end; otherwise it plans from its current node. With
    /// no detour it takes a fresh random path. Returns whether that fallback
    /// was used.
    pub fn reroute_on_closed_edge<R: Rng + ?Sized>(
        &mut self,
        network: &RoadNetwork,
        edge: EdgeKey,
        closed_edges: &BTreeSet<EdgeKey>,
        rng: &mut R,
    ) -> SimResult<bool> {
        self.known_closed = closed_edges.clone();
        self.known_closed.insert(edge);
        self.known_closed.insert((edge.1, edge.0));

        let (Some(current), Some(destination)) = (self.current_node(), self.destination()) else {
            self.new_random_path(network, rng)?;
            return Ok(true);
        };

        let kept_lane = self
            .current_edge
            .filter(|lane| !same_road(lane.edge(), edge) && network.is_open(lane.from, lane.to));
        let start = kept_lane.map(|lane| lane.to).unwrap_or(current);

        let known_closed = &self.known_closed;
        let route = network.shortest_path_filtered(start, destination, |key, road| {
            !same_road(key, edge) && (road.is_open || !known_closed.contains(&key))
        });

        match route {
            Ok(route) => {
                debug!("Agent {:?} rerouted around {:?}: {:?}", self.id, edge, route);
                match kept_lane {
                    Some(lane) => {
                        self.path = std::iter::once(lane.from).chain(route).collect();
                    }
                    None => {
                        self.path = route;
                        self.current_edge = None;
                        self.current_target = None;
                    }
                }
                self.path_index = 0;
                Ok(false)
            }
            Err(SimError::NoPath { .. }) => {
                warn!(
                    "Agent {:?} has no detour around {:?} to {}, taking a new random path",
                    self.id, edge, destination
                );
                self.new_random_path(network, rng)?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Per-tick state transition.
    ///
    /// `others` are the remaining agents in their current state. Closed roads
    /// found on the way are added to `closed_edges` in both directions; roads
    /// found open again are removed from it.
    pub fn advance<'a, R: Rng + ?Sized>(
        &mut self,
        network: &RoadNetwork,
        lights: &TrafficLights,
        others: impl IntoIterator<Item = &'a Agent>,
        dt: f32,
        closed_edges: &mut BTreeSet<EdgeKey>,
        rng: &mut R,
    ) -> SimResult<AdvanceOutcome> {
        self.prev_position = self.position;

        let Some((from, to)) = self.next_edge() else {
            self.new_random_path(network, rng)?;
            self.actual_speed = 0.0;
            return Ok(AdvanceOutcome::NewPath);
        };

        if !network.is_open(from, to) {
            debug!("Agent {:?} found road {} - {} closed", self.id, from, to);
            closed_edges.insert((from, to));
            closed_edges.insert((to, from));
            let fallback = self.reroute_on_closed_edge(network, (from, to), closed_edges, rng)?;
            self.prev_position = self.position;
            self.actual_speed = 0.0;
            return Ok(AdvanceOutcome::Rerouted {
                edge: (from, to),
                fallback,
            });
        }

        if closed_edges.remove(&(from, to)) {
            closed_edges.remove(&(to, from));
        }

        let target = match self.current_target {
            Some(target) => target,
            None => {
                let (start, end) = network.lane_endpoints(from, to, self.side)?;
                self.position = start;
                self.current_target = Some(end);
                self.current_edge = Some(Lane::new(from, to, self.side));
                end
            }
        };

        let arrived = self.move_towards(target, others, lights, dt);

        let outcome = if arrived {
            self.path_index += 1;
            self.current_edge = None;
            self.current_target = None;
            AdvanceOutcome::ReachedNode(to)
        } else {
            AdvanceOutcome::Moved
        };

        let moved = self.position.distance(&self.prev_position);
        self.actual_speed = if moved < SPEED_EPSILON || dt <= 0.0 {
            0.0
        } else {
            moved / dt
        };

        Ok(outcome)
    }

    /// Moves towards `target` at the speed traffic allows.
    /// Returns true once the target is reached.
    fn move_towards<'a>(
        &mut self,
        target: Position,
        others: impl IntoIterator<Item = &'a Agent>,
        lights: &TrafficLights,
        dt: f32,
    ) -> bool {
        let delta = target - self.position;
        let distance = delta.length();

        let mut desired_speed = self.max_speed * CRUISE_FRACTION;

        // Red light at the end of this lane
        if let Some(lane) = self.current_edge {
            if let Some(light) = lights.get(&lane.to) {
                if light.controls(lane.edge())
                    && distance < INTERSECTION_APPROACH_DISTANCE
                    && !light.is_green(lane.edge())
                {
                    desired_speed = 0.0;
                }
            }
        }

        if distance <= f32::EPSILON {
            self.position = target;
            return true;
        }

        let direction = delta * (1.0 / distance);

        // Nearest agent ahead on the same directed lane
        let leader = others
            .into_iter()
            .filter(|other| other.id != self.id)
            .filter(|other| other.current_edge.is_some() && other.current_edge == self.current_edge)
            .filter_map(|other| {
                let ahead = (other.position - self.position).dot(&direction);
                (ahead > 0.0).then_some((OrderedFloat(ahead), other))
            })
            .min_by_key(|(ahead, _)| *ahead)
            .map(|(_, other)| other);

        if let Some(leader) = leader {
            let gap = self.position.distance(&leader.position);
            let safe_distance = self.radius * SAFE_FOLLOWING_MULTIPLIER + self.actual_speed * 0.5;
            if gap < safe_distance {
                desired_speed = self.max_speed.min(leader.actual_speed);
                if gap < self.radius * STOP_DISTANCE_MULTIPLIER {
                    desired_speed = 0.0;
                }
            }
        }

        let step = (desired_speed * dt).min(distance);
        let arrived = step >= distance;
        if arrived {
            self.position = target;
        } else {
            self.position = self.position + direction * step;
        }
        self.heading = delta.y.atan2(delta.x);

        arrived
    }
}
