//! Road network generation
//!
//! Builds one of the supported topologies, lays its nodes out in 2D, tags
//! intersections and creates their traffic light controllers.

use log::{debug, info};
use rand::Rng;
use std::collections::BTreeSet;
use std::f32::consts::TAU;

use petgraph::unionfind::UnionFind;

use super::error::{SimError, SimResult};
use super::road_network::RoadNetwork;
use super::traffic_light::{LightMode, TrafficLightController, TrafficLights};
use super::types::{
    NodeId, NodeKind, Position, DEFAULT_DETECTION_RADIUS, GREEN_TIME, SENSOR_DETECTION_RADIUS,
};

/// Topology to generate
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GraphMode {
    /// `size x size` lattice
    Grid,
    /// Connected Watts-Strogatz graph of `size` nodes with points of interest
    SmallWorld,
    /// Fixed hand-drawn map
    Predefined,
    /// Small-world core of `size` nodes inside a ring of `size / 2` nodes
    RingRoad,
}

/// A freshly generated network with its traffic lights
#[derive(Debug, Clone)]
pub struct GeneratedMap {
    pub network: RoadNetwork,
    pub lights: TrafficLights,
}

/// Points of interest attached to small-world maps
pub const POINTS_OF_INTEREST: [&str; 4] = ["Museo", "Parco", "Teatro", "Biblioteca"];

/// Grid drawing area as (x, y, width, height) and its inner padding
const GRID_AREA: (f32, f32, f32, f32) = (0.0, 0.0, 1000.0, 800.0);
const GRID_PADDING: f32 = 60.0;

const SMALL_WORLD_NEIGHBOURS: usize = 3;
const SMALL_WORLD_REWIRE: f64 = 0.5;
const SMALL_WORLD_TRIES: usize = 100;

const RING_SCALE: f32 = 950.0;
const RING_LINKS: usize = 3;

/// Label of the grid node at row `r`, column `c`
pub fn grid_label(r: usize, c: usize) -> String {
    format!("({r},{c})")
}

pub fn generate<R: Rng + ?Sized>(
    mode: GraphMode,
    size: usize,
    rng: &mut R,
) -> SimResult<GeneratedMap> {
    let (mut network, lights) = match mode {
        GraphMode::Grid => {
            let mut network = build_grid(size, size)?;
            tag_intersections(&mut network)?;
            let lights = install_lights(&network, LightMode::SensorBased, SENSOR_DETECTION_RADIUS);
            (network, lights)
        }
        GraphMode::SmallWorld => {
            let network = build_small_world(size, rng)?;
            let lights = install_lights(&network, LightMode::SensorBased, SENSOR_DETECTION_RADIUS);
            (network, lights)
        }
        GraphMode::Predefined => {
            let network = build_predefined()?;
            let lights = install_lights(&network, LightMode::Normal, DEFAULT_DETECTION_RADIUS);
            (network, lights)
        }
        GraphMode::RingRoad => {
            let network = build_ring_road(size, rng)?;
            let lights = install_lights(&network, LightMode::Normal, DEFAULT_DETECTION_RADIUS);
            (network, lights)
        }
    };

    network.recompute_reachability();

    info!(
        "Generated {:?} graph: {} nodes, {} roads, {} traffic lights",
        mode,
        network.node_count(),
        network.road_count(),
        lights.len()
    );

    Ok(GeneratedMap { network, lights })
}

/// Tags every plain node with more than two roads as an intersection
fn tag_intersections(network: &mut RoadNetwork) -> SimResult<()> {
    let junctions: Vec<NodeId> = network
        .nodes()
        .filter(|n| n.kind == NodeKind::Plain)
        .map(|n| n.id)
        .filter(|id| network.degree(*id) > 2)
        .collect();

    for id in junctions {
        network.set_node_kind(id, NodeKind::Intersection)?;
    }
    Ok(())
}

/// One controller per intersection node
fn install_lights(network: &RoadNetwork, mode: LightMode, detection_radius: f32) -> TrafficLights {
    network
        .nodes()
        .filter(|n| n.kind == NodeKind::Intersection)
        .map(|n| {
            let controller = TrafficLightController::new(
                n.id,
                n.position,
                network.incoming_edges(n.id),
                GREEN_TIME,
                detection_radius,
                mode,
            );
            (n.id, controller)
        })
        .collect()
}

fn build_grid(rows: usize, cols: usize) -> SimResult<RoadNetwork> {
    if rows < 2 || cols < 2 {
        return Err(SimError::Generation(format!(
            "grid needs at least 2x2 nodes, got {rows}x{cols}"
        )));
    }

    let (area_x, area_y, area_w, area_h) = GRID_AREA;
    let inner_x = area_x + GRID_PADDING;
    let inner_y = area_y + GRID_PADDING;
    let x_spacing = (area_w - 2.0 * GRID_PADDING) / (cols - 1) as f32 * 2.0;
    let y_spacing = (area_h - 2.0 * GRID_PADDING) / (rows - 1) as f32 * 2.0;

    let mut network = RoadNetwork::new();
    for r in 0..rows {
        for c in 0..cols {
            let position = Position::new(
                inner_x + c as f32 * x_spacing,
                inner_y + r as f32 * y_spacing,
            );
            network.add_node(grid_label(r, c), position, NodeKind::Plain);
        }
    }

    let id = |r: usize, c: usize| NodeId(r * cols + c);
    for r in 0..rows {
        for c in 0..cols {
            if c + 1 < cols {
                network.add_road(id(r, c), id(r, c + 1))?;
            }
            if r + 1 < rows {
                network.add_road(id(r, c), id(r + 1, c))?;
            }
        }
    }

    Ok(network)
}

fn normalized(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

/// Edge list of a Watts-Strogatz graph: a ring lattice where each node links
/// to its `k / 2` nearest neighbours on each side, then each lattice edge
/// `(u, v)` is rewired to `(u, w)` with probability `p`.
fn watts_strogatz<R: Rng + ?Sized>(
    n: usize,
    k: usize,
    p: f64,
    rng: &mut R,
) -> BTreeSet<(usize, usize)> {
    let mut edges = BTreeSet::new();
    for j in 1..=k / 2 {
        for u in 0..n {
            edges.insert(normalized(u, (u + j) % n));
        }
    }

    for j in 1..=k / 2 {
        for u in 0..n {
            if !rng.random_bool(p) {
                continue;
            }
            let degree = edges.iter().filter(|(a, b)| *a == u || *b == u).count();
            if degree >= n - 1 {
                continue;
            }
            let mut w = rng.random_range(0..n);
            while w == u || edges.contains(&normalized(u, w)) {
                w = rng.random_range(0..n);
            }
            edges.remove(&normalized(u, (u + j) % n));
            edges.insert(normalized(u, w));
        }
    }

    edges
}

fn is_connected(n: usize, edges: &BTreeSet<(usize, usize)>) -> bool {
    let mut components = UnionFind::<usize>::new(n);
    let mut count = n;
    for &(a, b) in edges {
        if components.union(a, b) {
            count -= 1;
        }
    }
    count == 1
}

/// Retries [`watts_strogatz`] until the result is connected
fn connected_watts_strogatz<R: Rng + ?Sized>(
    n: usize,
    rng: &mut R,
) -> SimResult<BTreeSet<(usize, usize)>> {
    if n < 4 {
        return Err(SimError::Generation(format!(
            "small-world graph needs at least 4 nodes, got {n}"
        )));
    }
    for attempt in 1..=SMALL_WORLD_TRIES {
        let edges = watts_strogatz(n, SMALL_WORLD_NEIGHBOURS, SMALL_WORLD_REWIRE, rng);
        if is_connected(n, &edges) {
            debug!("Connected small-world graph after {attempt} attempt(s)");
            return Ok(edges);
        }
    }
    Err(SimError::Generation(format!(
        "no connected small-world graph after {SMALL_WORLD_TRIES} attempts"
    )))
}

fn circle_position(center: Position, radius: f32, i: usize, n: usize) -> Position {
    let angle = TAU * i as f32 / n as f32;
    center + Position::new(angle.cos(), angle.sin()) * radius
}

/// Intersections are tagged on the core graph, before points of interest are
/// attached
fn build_small_world<R: Rng + ?Sized>(size: usize, rng: &mut R) -> SimResult<RoadNetwork> {
    let edges = connected_watts_strogatz(size, rng)?;

    let center = Position::new(500.0, 400.0);
    let mut network = RoadNetwork::new();
    for i in 0..size {
        let position = circle_position(center, 350.0, i, size);
        network.add_node(i.to_string(), position, NodeKind::Plain);
    }
    for (a, b) in edges {
        network.add_road(NodeId(a), NodeId(b))?;
    }
    tag_intersections(&mut network)?;

    add_points_of_interest(&mut network, rng)?;
    Ok(network)
}

/// Attaches each point of interest to a random existing node
fn add_points_of_interest<R: Rng + ?Sized>(
    network: &mut RoadNetwork,
    rng: &mut R,
) -> SimResult<()> {
    let base_count = network.node_count();
    for (i, name) in POINTS_OF_INTEREST.iter().enumerate() {
        let anchor = NodeId(rng.random_range(0..network.node_count()));
        let anchor_position = network.position(anchor)?;
        let outward = Position::new(30.0, -30.0);

        let poi = network.add_node(
            (base_count + i + 1).to_string(),
            anchor_position + outward,
            NodeKind::PointOfInterest,
        );
        network.set_node_name(poi, *name)?;
        network.add_road(poi, anchor)?;
    }
    Ok(())
}

/// Intersections are tagged on the inner core only, before the outer ring
/// and its links are added
fn build_ring_road<R: Rng + ?Sized>(size: usize, rng: &mut R) -> SimResult<RoadNetwork> {
    let inner_edges = connected_watts_strogatz(size, rng)?;
    let outer_count = (size / 2).max(3);

    let center = Position::new((RING_SCALE - 20.0) / 2.0, (RING_SCALE - 60.0) / 2.0);
    let mut network = RoadNetwork::new();

    let inner: Vec<NodeId> = (0..size)
        .map(|i| {
            let position = circle_position(center, RING_SCALE / 2.0, i, size);
            network.add_node(i.to_string(), position, NodeKind::Plain)
        })
        .collect();
    let outer: Vec<NodeId> = (0..outer_count)
        .map(|i| {
            network.add_node(
                (size + i).to_string(),
                circle_position(center, 2.0 * RING_SCALE / 3.0, i, outer_count),
                NodeKind::Plain,
            )
        })
        .collect();

    for (a, b) in inner_edges {
        network.add_road(inner[a], inner[b])?;
    }
    tag_intersections(&mut network)?;

    for i in 0..outer_count {
        network.add_road(outer[i], outer[(i + 1) % outer_count])?;
    }

    // Join the closest inner/outer pairs, each node used at most once
    let mut pairs = Vec::with_capacity(inner.len() * outer.len());
    for &a in &inner {
        for &b in &outer {
            let distance = network.position(a)?.distance(&network.position(b)?);
            pairs.push((distance, a, b));
        }
    }
    pairs.sort_by(|x, y| x.0.total_cmp(&y.0));

    let mut used_inner = BTreeSet::new();
    let mut used_outer = BTreeSet::new();
    for (_, a, b) in pairs {
        if used_inner.len() >= RING_LINKS {
            break;
        }
        if !used_inner.contains(&a) && !used_outer.contains(&b) {
            network.add_road(b, a)?;
            used_inner.insert(a);
            used_outer.insert(b);
        }
    }

    Ok(network)
}

/// Nodes of the hand-drawn map: label, intersection tag, point-of-interest name, position
const PREDEFINED_NODES: [(u32, bool, Option<&str>, f32, f32); 29] = [
    (0, false, None, 1184.43, 682.55),
    (1, false, None, 1383.81, 695.35),
    (2, false, None, 499.24, 1550.05),
    (3, false, None, 807.90, 1326.01),
    (4, false, None, 1064.32, 155.71),
    (5, false, None, -20.0, 79.57),
    (6, false, None, 1578.19, 1513.56),
    (7, false, None, 1695.76, 947.12),
    (8, true, None, 580.61, 1374.42),
    (9, true, None, 458.65, 1175.10),
    (10, false, None, 1672.18, 1154.38),
    (11, true, None, 1534.34, 1321.63),
    (12, false, None, 1290.87, 1265.38),
    (13, false, None, 293.52, 1266.32),
    (14, true, None, 124.46, 178.69),
    (15, false, None, 118.35, 5.18),
    (16, false, None, 1216.85, 1369.02),
    (17, true, None, 1024.93, 1198.51),
    (18, false, None, 221.41, 408.93),
    (19, false, None, 1611.72, 749.94),
    (20, false, None, 1003.46, 340.50),
    (21, false, None, 349.30, 651.90),
    (22, true, None, 516.80, 903.76),
    (23, true, None, 832.58, 907.46),
    (24, false, None, 928.90, 599.09),
    (26, false, Some("Museo"), 348.14, 906.41),
    (27, false, Some("Parco"), 1014.10, 468.70),
    (28, false, Some("Teatro"), 1774.19, 656.11),
    (29, false, Some("Biblioteca"), 1396.99, 1465.66),
];

const PREDEFINED_ROADS: [(u32, u32); 29] = [
    (0, 1),
    (1, 19),
    (2, 8),
    (3, 8),
    (3, 17),
    (4, 20),
    (5, 14),
    (6, 11),
    (7, 10),
    (7, 19),
    (8, 9),
    (9, 22),
    (9, 13),
    (10, 11),
    (11, 12),
    (12, 17),
    (14, 18),
    (14, 15),
    (16, 17),
    (16, 29),
    (17, 23),
    (18, 21),
    (19, 28),
    (20, 24),
    (21, 22),
    (22, 23),
    (22, 26),
    (23, 24),
    (24, 27),
];

fn build_predefined() -> SimResult<RoadNetwork> {
    let mut network = RoadNetwork::new();
    for (label, is_intersection, name, x, y) in PREDEFINED_NODES {
        let kind = match (is_intersection, name) {
            (true, _) => NodeKind::Intersection,
            (false, Some(_)) => NodeKind::PointOfInterest,
            (false, None) => NodeKind::Plain,
        };
        let id = network.add_node(label.to_string(), Position::new(x, y), kind);
        if let Some(name) = name {
            network.set_node_name(id, name)?;
        }
    }

    for (a, b) in PREDEFINED_ROADS {
        let lookup = |label: u32| {
            network
                .node_by_label(&label.to_string())
                .ok_or_else(|| SimError::Generation(format!("unknown predefined node {label}")))
        };
        let (a, b) = (lookup(a)?, lookup(b)?);
        network.add_road(a, b)?;
    }

    Ok(network)
}
