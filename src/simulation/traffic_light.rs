//! Traffic light logic for the traffic simulation
//!
//! One controller per intersection. Phases rotate round-robin over the
//! incoming roads; a sensor-based controller additionally pre-empts the
//! rotation when traffic is detected on exactly one incoming road.

use std::collections::BTreeMap;

use super::agent::Agent;
use super::types::{EdgeKey, NodeId, Position};

/// Controllers keyed by the intersection node they govern
pub type TrafficLights = BTreeMap<NodeId, TrafficLightController>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightPhase {
    Green,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightMode {
    /// Fixed-time round robin
    Normal,
    /// Round robin, pre-empted when exactly one incoming road has traffic
    /// within the detection radius.
    ///
    /// With two or more busy roads the controller falls back to the
    /// rotation, so a road that is never the only busy one can wait for a
    /// full cycle. There is no fairness guarantee beyond the rotation.
    SensorBased,
}

/// A traffic light controller for one intersection
#[derive(Debug, Clone)]
pub struct TrafficLightController {
    pub node: NodeId,
    pub position: Position,
    /// Incoming roads as `(neighbour, node)`, in rotation order
    incoming: Vec<EdgeKey>,
    phases: Vec<LightPhase>,
    /// Time since the last phase change
    pub timer: f32,
    pub current_green_index: usize,
    pub green_time: f32,
    pub detection_radius: f32,
    pub mode: LightMode,
    /// The road that last received a sensor priority green
    pub priority_edge: Option<EdgeKey>,
}

impl TrafficLightController {
    pub fn new(
        node: NodeId,
        position: Position,
        incoming: Vec<EdgeKey>,
        green_time: f32,
        detection_radius: f32,
        mode: LightMode,
    ) -> Self {
        let mut phases = vec![LightPhase::Red; incoming.len()];
        if let Some(first) = phases.first_mut() {
            *first = LightPhase::Green;
        }

        Self {
            node,
            position,
            incoming,
            phases,
            timer: 0.0,
            current_green_index: 0,
            green_time,
            detection_radius,
            mode,
            priority_edge: None,
        }
    }

    pub fn incoming_edges(&self) -> &[EdgeKey] {
        &self.incoming
    }

    fn slot(&self, edge: EdgeKey) -> Option<usize> {
        self.incoming.iter().position(|e| *e == edge)
    }

    /// Whether this controller tracks the incoming road `edge`
    pub fn controls(&self, edge: EdgeKey) -> bool {
        self.slot(edge).is_some()
    }

    pub fn phase(&self, edge: EdgeKey) -> Option<LightPhase> {
        self.slot(edge).map(|i| self.phases[i])
    }

    /// Untracked roads are never green
    pub fn is_green(&self, edge: EdgeKey) -> bool {
        self.phase(edge) == Some(LightPhase::Green)
    }

    pub fn green_edges(&self) -> impl Iterator<Item = EdgeKey> + '_ {
        self.incoming
            .iter()
            .zip(&self.phases)
            .filter(|(_, phase)| **phase == LightPhase::Green)
            .map(|(edge, _)| *edge)
    }

    /// Per incoming road, whether an agent travelling on it is inside the
    /// detection radius
    pub fn detect<'a>(&self, agents: impl IntoIterator<Item = &'a Agent>) -> Vec<bool> {
        let mut detected = vec![false; self.incoming.len()];
        for agent in agents {
            let Some(lane) = agent.current_edge else {
                continue;
            };
            if lane.to != self.node {
                continue;
            }
            if let Some(i) = self.slot(lane.edge()) {
                if agent.position.distance(&self.position) < self.detection_radius {
                    detected[i] = true;
                }
            }
        }
        detected
    }

    /// Advances the controller by `dt` seconds
    pub fn update<'a>(&mut self, dt: f32, agents: impl IntoIterator<Item = &'a Agent>) {
        if self.mode == LightMode::SensorBased {
            let detected = self.detect(agents);
            let mut busy = detected.iter().enumerate().filter(|(_, d)| **d);
            if let (Some((only, _)), None) = (busy.next(), busy.next()) {
                self.priority_edge = Some(self.incoming[only]);
                self.show_green(only);
                self.timer = 0.0;
                return;
            }
        }

        if self.incoming.is_empty() {
            return;
        }

        self.timer += dt;
        if self.timer >= self.green_time {
            self.current_green_index = (self.current_green_index + 1) % self.incoming.len();
            self.show_green(self.current_green_index);
            self.timer = 0.0;
        }
    }

    /// Turns `slot` green and every other road red
    fn show_green(&mut self, slot: usize) {
        for phase in &mut self.phases {
            *phase = LightPhase::Red;
        }
        self.phases[slot] = LightPhase::Green;
    }
}
