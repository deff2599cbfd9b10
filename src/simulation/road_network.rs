//! Road network graph for pathfinding
//!
//! An undirected petgraph graph of nodes and roads with mutable open/closed
//! state. The network is only ever replaced wholesale; edits flip road state
//! in place and are followed by a reachability pass.

use petgraph::algo::astar;
use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::{EdgeFiltered, EdgeRef};
use std::collections::{BTreeMap, HashMap};

use super::error::{SimError, SimResult};
use super::types::{EdgeKey, LaneSide, NodeId, NodeKind, Position, LANE_WIDTH};

/// Node data for the road network graph
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    /// Human-readable label, unique within a network (e.g. `(0,1)` or `17`)
    pub label: String,
    /// Display name of points of interest
    pub name: Option<String>,
    pub position: Position,
    pub kind: NodeKind,
    /// Whether the node sits in an open-road component with more than one node
    pub reachable: bool,
}

/// Edge data for the road network graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Road {
    pub is_open: bool,
}

impl Default for Road {
    fn default() -> Self {
        Self { is_open: true }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoadNetwork {
    graph: UnGraph<Node, Road>,

    /// Maps labels to node ids
    label_to_node: HashMap<String, NodeId>,
}

impl RoadNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and returns its id. Reachability is not updated until
    /// [`RoadNetwork::recompute_reachability`] runs.
    pub fn add_node(
        &mut self,
        label: impl Into<String>,
        position: Position,
        kind: NodeKind,
    ) -> NodeId {
        let id = NodeId(self.graph.node_count());
        let label = label.into();
        self.label_to_node.insert(label.clone(), id);
        self.graph.add_node(Node {
            id,
            label,
            name: None,
            position,
            kind,
            reachable: false,
        });
        id
    }

    /// Adds an open road between two nodes. Adding an existing road is a no-op.
    pub fn add_road(&mut self, a: NodeId, b: NodeId) -> SimResult<()> {
        let start = self.index(a)?;
        let end = self.index(b)?;
        if a == b {
            return Err(SimError::InvalidEdge { from: a, to: b });
        }
        if self.graph.find_edge(start, end).is_none() {
            self.graph.add_edge(start, end, Road::default());
        }
        Ok(())
    }

    pub fn set_node_kind(&mut self, id: NodeId, kind: NodeKind) -> SimResult<()> {
        let index = self.index(id)?;
        self.graph[index].kind = kind;
        Ok(())
    }

    pub fn set_node_name(&mut self, id: NodeId, name: impl Into<String>) -> SimResult<()> {
        let index = self.index(id)?;
        self.graph[index].name = Some(name.into());
        Ok(())
    }

    fn index(&self, id: NodeId) -> SimResult<NodeIndex> {
        if id.0 < self.graph.node_count() {
            Ok(NodeIndex::new(id.0))
        } else {
            Err(SimError::UnknownNode(id))
        }
    }

    fn find_edge(&self, a: NodeId, b: NodeId) -> Option<EdgeIndex> {
        let start = self.index(a).ok()?;
        let end = self.index(b).ok()?;
        self.graph.find_edge(start, end)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.index(id).ok().map(|index| &self.graph[index])
    }

    pub fn node_by_label(&self, label: &str) -> Option<NodeId> {
        self.label_to_node.get(label).copied()
    }

    pub fn position(&self, id: NodeId) -> SimResult<Position> {
        self.node(id).map(|n| n.position).ok_or(SimError::UnknownNode(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.node_indices().map(|index| NodeId(index.index()))
    }

    /// All roads as `(a, b, road)` in insertion order
    pub fn roads(&self) -> impl Iterator<Item = (NodeId, NodeId, &Road)> {
        self.graph.edge_references().map(|edge| {
            (
                NodeId(edge.source().index()),
                NodeId(edge.target().index()),
                edge.weight(),
            )
        })
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn road_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn open_road_count(&self) -> usize {
        self.graph.edge_weights().filter(|road| road.is_open).count()
    }

    pub fn has_road(&self, a: NodeId, b: NodeId) -> bool {
        self.find_edge(a, b).is_some()
    }

    /// Whether the road `a - b` exists and is open
    pub fn is_open(&self, a: NodeId, b: NodeId) -> bool {
        self.find_edge(a, b)
            .map(|edge| self.graph[edge].is_open)
            .unwrap_or(false)
    }

    pub fn is_reachable(&self, id: NodeId) -> bool {
        self.node(id).map(|n| n.reachable).unwrap_or(false)
    }

    pub fn reachable_nodes(&self) -> Vec<NodeId> {
        self.nodes().filter(|n| n.reachable).map(|n| n.id).collect()
    }

    /// Neighbours of a node, sorted by id
    pub fn neighbors(&self, id: NodeId) -> Vec<NodeId> {
        let Ok(index) = self.index(id) else {
            return Vec::new();
        };
        let mut neighbors: Vec<NodeId> = self
            .graph
            .neighbors(index)
            .map(|n| NodeId(n.index()))
            .collect();
        neighbors.sort();
        neighbors
    }

    pub fn degree(&self, id: NodeId) -> usize {
        self.neighbors(id).len()
    }

    /// Roads entering `id`, as `(neighbour, id)` pairs sorted by neighbour
    pub fn incoming_edges(&self, id: NodeId) -> Vec<EdgeKey> {
        self.neighbors(id).into_iter().map(|n| (n, id)).collect()
    }

    /// Opens or closes a road. Returns whether the state changed; reapplying
    /// the current state is a no-op. Callers follow up with
    /// [`RoadNetwork::recompute_reachability`].
    pub fn set_edge_open(&mut self, a: NodeId, b: NodeId, open: bool) -> SimResult<bool> {
        let edge = self
            .find_edge(a, b)
            .ok_or(SimError::InvalidEdge { from: a, to: b })?;
        let road = &mut self.graph[edge];
        if road.is_open == open {
            return Ok(false);
        }
        road.is_open = open;
        Ok(true)
    }

    /// Marks every node in a component of size <= 1 of the open-road
    /// subgraph as unreachable, every other node as reachable.
    pub fn recompute_reachability(&mut self) {
        let node_count = self.graph.node_count();
        let mut components = UnionFind::<usize>::new(node_count);
        for edge in self.graph.edge_references() {
            if edge.weight().is_open {
                components.union(edge.source().index(), edge.target().index());
            }
        }

        let labels = components.into_labeling();
        let mut sizes = vec![0usize; node_count];
        for label in &labels {
            sizes[*label] += 1;
        }

        for index in self.graph.node_indices().collect::<Vec<_>>() {
            self.graph[index].reachable = sizes[labels[index.index()]] > 1;
        }
    }

    /// Unweighted shortest path including both endpoints.
    ///
    /// With `excluding_closed` the search only uses open roads.
    pub fn shortest_path(
        &self,
        source: NodeId,
        target: NodeId,
        excluding_closed: bool,
    ) -> SimResult<Vec<NodeId>> {
        self.shortest_path_filtered(source, target, |_, road| !excluding_closed || road.is_open)
    }

    /// Unweighted shortest path over the roads `allow` accepts.
    ///
    /// `allow` sees each road as the ordered pair it is traversed in.
    pub fn shortest_path_filtered<F>(
        &self,
        source: NodeId,
        target: NodeId,
        allow: F,
    ) -> SimResult<Vec<NodeId>>
    where
        F: Fn(EdgeKey, &Road) -> bool,
    {
        let start = self.index(source)?;
        let goal = self.index(target)?;

        let view = EdgeFiltered::from_fn(&self.graph, |edge| {
            let key = (NodeId(edge.source().index()), NodeId(edge.target().index()));
            allow(key, edge.weight())
        });

        let (_, node_path) = astar(&view, start, |node| node == goal, |_| 1u32, |_| 0u32)
            .ok_or(SimError::NoPath {
                from: source,
                to: target,
            })?;

        Ok(node_path.into_iter().map(|n| NodeId(n.index())).collect())
    }

    /// Endpoints of the lane `from -> to` on `side`, shifted half a lane
    /// width off the centre line
    pub fn lane_endpoints(
        &self,
        from: NodeId,
        to: NodeId,
        side: LaneSide,
    ) -> SimResult<(Position, Position)> {
        if !self.has_road(from, to) {
            return Err(SimError::InvalidEdge { from, to });
        }
        let start = self.position(from)?;
        let end = self.position(to)?;
        let offset = start.lane_offset(&end, side, LANE_WIDTH);
        Ok((start + offset, end + offset))
    }

    /// Layout positions keyed by node
    pub fn layout(&self) -> BTreeMap<NodeId, Position> {
        self.nodes().map(|n| (n.id, n.position)).collect()
    }

    /// Layout rescaled to `[-1, 1]` on each axis
    pub fn normalized_layout(&self) -> BTreeMap<NodeId, Position> {
        let mut min = Position::new(f32::INFINITY, f32::INFINITY);
        let mut max = Position::new(f32::NEG_INFINITY, f32::NEG_INFINITY);
        for node in self.nodes() {
            min.x = min.x.min(node.position.x);
            min.y = min.y.min(node.position.y);
            max.x = max.x.max(node.position.x);
            max.y = max.y.max(node.position.y);
        }

        let normalize = |value: f32, lo: f32, hi: f32| {
            if hi > lo {
                2.0 * (value - lo) / (hi - lo) - 1.0
            } else {
                0.0
            }
        };

        self.nodes()
            .map(|n| {
                (
                    n.id,
                    Position::new(
                        normalize(n.position.x, min.x, max.x),
                        normalize(n.position.y, min.y, max.y),
                    ),
                )
            })
            .collect()
    }
}
