use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use traffic_graph_sim::simulation::{
    grid_label, AdvanceOutcome, Agent, AgentId, AgentStyle, GraphMode, LightMode, NodeId,
    NodeKind, Position, Rgb, RoadNetwork, SimError, SimWorld, TrafficLightController,
    TrafficLights, AGENT_RADIUS, GREEN_TIME, INTERSECTION_APPROACH_DISTANCE,
    SENSOR_DETECTION_RADIUS,
};

fn style(max_speed: f32) -> AgentStyle {
    AgentStyle {
        color: Rgb(0, 0, 255),
        max_speed,
        radius: AGENT_RADIUS,
    }
}

fn network_with(positions: &[(f32, f32)], roads: &[(usize, usize)]) -> RoadNetwork {
    let mut network = RoadNetwork::new();
    for (i, &(x, y)) in positions.iter().enumerate() {
        network.add_node(i.to_string(), Position::new(x, y), NodeKind::Plain);
    }
    for &(a, b) in roads {
        network.add_road(NodeId(a), NodeId(b)).unwrap();
    }
    network.recompute_reachability();
    network
}

/// 0 - 1 - 2 along the x axis with a detour 0 - 3 - 2 below it
fn square() -> RoadNetwork {
    network_with(
        &[(0.0, 0.0), (200.0, 0.0), (400.0, 0.0), (200.0, 200.0)],
        &[(0, 1), (1, 2), (0, 3), (3, 2)],
    )
}

fn distance_to_segment(point: Position, start: Position, end: Position) -> f32 {
    let segment = end - start;
    let length_sq = segment.dot(&segment);
    if length_sq == 0.0 {
        return point.distance(&start);
    }
    let t = ((point - start).dot(&segment) / length_sq).clamp(0.0, 1.0);
    point.distance(&start.lerp(&end, t))
}

fn assert_on_lane(agent: &Agent, network: &RoadNetwork) {
    if let Some(lane) = agent.current_edge {
        let (start, end) = network.lane_endpoints(lane.from, lane.to, lane.side).unwrap();
        let off = distance_to_segment(agent.position, start, end);
        assert!(
            off < 0.05,
            "agent {:?} is {off} off its lane {:?}",
            agent.id,
            lane
        );
    }
}

fn grid_path(world: &SimWorld, cells: &[(usize, usize)]) -> Vec<NodeId> {
    cells
        .iter()
        .map(|&(r, c)| world.network().node_by_label(&grid_label(r, c)).unwrap())
        .collect()
}

/// A lit intersection at node 0 with arms to the west (1), north (2) and east (3)
fn lit_junction() -> (RoadNetwork, TrafficLights) {
    let mut network = RoadNetwork::new();
    network.add_node("centre", Position::new(0.0, 0.0), NodeKind::Intersection);
    for (i, (x, y)) in [(-200.0, 0.0), (0.0, -200.0), (200.0, 0.0)].into_iter().enumerate() {
        let arm = network.add_node(format!("arm{i}"), Position::new(x, y), NodeKind::Plain);
        network.add_road(arm, NodeId(0)).unwrap();
    }
    network.recompute_reachability();
    let light = TrafficLightController::new(
        NodeId(0),
        network.position(NodeId(0)).unwrap(),
        network.incoming_edges(NodeId(0)),
        GREEN_TIME,
        SENSOR_DETECTION_RADIUS,
        LightMode::Normal,
    );
    let mut lights = TrafficLights::new();
    lights.insert(NodeId(0), light);
    (network, lights)
}

/// An agent driving from `arm` through the junction, `distance` short of
/// the end of its lane
fn short_of_junction(network: &RoadNetwork, arm: usize, distance: f32) -> Agent {
    let path = vec![NodeId(arm), NodeId(0), NodeId(1 + arm % 3)];
    let mut agent = Agent::on_path(AgentId(0), style(80.0), network, path).unwrap();
    let lane = agent.current_edge.unwrap();
    let (start, end) = network.lane_endpoints(lane.from, lane.to, lane.side).unwrap();
    agent.position = end.lerp(&start, distance / start.distance(&end));
    agent
}

#[test]
fn test_spawned_agent_starts_on_its_first_lane() {
    let network = square();
    let mut rng = StdRng::seed_from_u64(4);

    let agent = Agent::spawn(AgentId(0), style(80.0), &network, &mut rng).unwrap();
    assert!(agent.path.len() >= 2);
    assert_eq!(agent.path_index, 0);
    let lane = agent.current_edge.unwrap();
    assert_eq!((lane.from, lane.to), (agent.path[0], agent.path[1]));

    let (start, _) = network.lane_endpoints(lane.from, lane.to, lane.side).unwrap();
    assert!(agent.position.distance(&start) < 1e-4);
}

#[test]
fn test_agent_drives_grid_path_and_draws_a_new_one() {
    let mut world = SimWorld::new_with_seed(7);
    world.generate(GraphMode::Grid, 5).unwrap();

    let path = grid_path(&world, &[(0, 0), (0, 1), (0, 2)]);
    let destination = path[2];
    let id = world.next_agent_id();
    let agent = Agent::on_path(id, style(60.0), world.network(), path).unwrap();
    world.insert_agent(agent);

    let (_, lane_end) = world
        .network()
        .lane_endpoints(world.agents[0].path[1], destination, world.agents[0].side)
        .unwrap();

    let mut arrived_at = None;
    for tick in 0..1000 {
        world.step(0.1);
        let agent = &world.agents[0];
        assert_on_lane(agent, world.network());

        if agent.path_index == 2 && agent.path.last() == Some(&destination) {
            assert!(agent.position.distance(&lane_end) < 1e-3);
            arrived_at = Some(tick);
            break;
        }
    }
    assert!(arrived_at.is_some(), "agent never reached its destination");

    world.step(0.1);
    let agent = &world.agents[0];
    assert_eq!(agent.path_index, 0);
    assert!(agent.path.len() >= 2);
    assert_eq!(agent.actual_speed, 0.0);
    assert_eq!(world.stats.completed_paths, 1);
}

#[test]
fn test_cruising_speed_is_half_of_max_speed() {
    let network = square();
    let lights = TrafficLights::new();
    let mut closed = BTreeSet::new();
    let mut rng = StdRng::seed_from_u64(0);
    let mut agent =
        Agent::on_path(AgentId(0), style(100.0), &network, vec![NodeId(0), NodeId(1)]).unwrap();

    let outcome = agent
        .advance(&network, &lights, [], 0.1, &mut closed, &mut rng)
        .unwrap();

    assert_eq!(outcome, AdvanceOutcome::Moved);
    assert!((agent.actual_speed - 50.0).abs() < 0.01);
    assert_on_lane(&agent, &network);
    assert!(agent.heading_degrees().abs() < 1e-3);
}

#[test]
fn test_agent_stops_at_red_light_near_the_junction() {
    let (network, mut lights) = lit_junction();
    let mut closed = BTreeSet::new();
    let mut rng = StdRng::seed_from_u64(0);

    let light = &lights[&NodeId(0)];
    let arm = (1..=3)
        .find(|&arm| !light.is_green((NodeId(arm), NodeId(0))))
        .unwrap();
    let edge = (NodeId(arm), NodeId(0));

    let mut agent = short_of_junction(&network, arm, INTERSECTION_APPROACH_DISTANCE - 10.0);
    let start = agent.position;
    let outcome = agent
        .advance(&network, &lights, [], 0.1, &mut closed, &mut rng)
        .unwrap();
    assert_eq!(outcome, AdvanceOutcome::Moved);
    assert_eq!(agent.actual_speed, 0.0);
    assert_eq!(agent.position, start);

    // Rotate until the agent's road turns green
    let nobody: Vec<Agent> = Vec::new();
    let light = lights.get_mut(&NodeId(0)).unwrap();
    for _ in 0..3 {
        if light.is_green(edge) {
            break;
        }
        light.update(GREEN_TIME, &nobody);
    }
    assert!(light.is_green(edge));

    agent
        .advance(&network, &lights, [], 0.1, &mut closed, &mut rng)
        .unwrap();
    assert!((agent.actual_speed - 40.0).abs() < 0.01);
    assert_on_lane(&agent, &network);
}

#[test]
fn test_red_light_is_ignored_until_within_approach_distance() {
    let (network, lights) = lit_junction();
    let mut closed = BTreeSet::new();
    let mut rng = StdRng::seed_from_u64(0);

    let light = &lights[&NodeId(0)];
    let arm = (1..=3)
        .find(|&arm| !light.is_green((NodeId(arm), NodeId(0))))
        .unwrap();

    let mut agent = short_of_junction(&network, arm, INTERSECTION_APPROACH_DISTANCE + 20.0);
    agent
        .advance(&network, &lights, [], 0.1, &mut closed, &mut rng)
        .unwrap();
    assert!((agent.actual_speed - 40.0).abs() < 0.01);
}

#[test]
fn test_follower_stops_close_behind_leader() {
    let network = square();
    let lights = TrafficLights::new();
    let mut closed = BTreeSet::new();
    let mut rng = StdRng::seed_from_u64(0);

    let path = vec![NodeId(0), NodeId(1), NodeId(2)];
    let mut follower = Agent::on_path(AgentId(0), style(80.0), &network, path.clone()).unwrap();
    let mut leader = Agent::on_path(AgentId(1), style(80.0), &network, path).unwrap();
    leader.position = follower.position + Position::new(AGENT_RADIUS * 2.0, 0.0);

    let start = follower.position;
    follower
        .advance(&network, &lights, [&leader], 0.1, &mut closed, &mut rng)
        .unwrap();

    assert_eq!(follower.actual_speed, 0.0);
    assert_eq!(follower.position, start);
}

#[test]
fn test_follower_ignores_agents_behind_or_on_other_lanes() {
    let network = square();
    let lights = TrafficLights::new();
    let mut closed = BTreeSet::new();
    let mut rng = StdRng::seed_from_u64(0);

    let mut agent =
        Agent::on_path(AgentId(0), style(80.0), &network, vec![NodeId(0), NodeId(1)]).unwrap();
    agent.position = agent.position + Position::new(50.0, 0.0);

    let mut behind =
        Agent::on_path(AgentId(1), style(80.0), &network, vec![NodeId(0), NodeId(1)]).unwrap();
    behind.position = agent.position - Position::new(5.0, 0.0);
    let oncoming =
        Agent::on_path(AgentId(2), style(80.0), &network, vec![NodeId(1), NodeId(0)]).unwrap();

    agent
        .advance(&network, &lights, [&behind, &oncoming], 0.1, &mut closed, &mut rng)
        .unwrap();

    assert!((agent.actual_speed - 40.0).abs() < 0.01);
}

#[test]
fn test_closed_next_road_is_reported_and_avoided() {
    let mut network = square();
    let lights = TrafficLights::new();
    let mut closed = BTreeSet::new();
    let mut rng = StdRng::seed_from_u64(0);

    let path = vec![NodeId(0), NodeId(1), NodeId(2)];
    let mut agent = Agent::on_path(AgentId(0), style(80.0), &network, path).unwrap();
    network.set_edge_open(NodeId(0), NodeId(1), false).unwrap();
    network.recompute_reachability();

    let start = agent.position;
    let outcome = agent
        .advance(&network, &lights, [], 0.1, &mut closed, &mut rng)
        .unwrap();

    assert_eq!(
        outcome,
        AdvanceOutcome::Rerouted {
            edge: (NodeId(0), NodeId(1)),
            fallback: false
        }
    );
    assert!(closed.contains(&(NodeId(0), NodeId(1))));
    assert!(closed.contains(&(NodeId(1), NodeId(0))));
    assert_eq!(agent.path, vec![NodeId(0), NodeId(3), NodeId(2)]);
    assert!(!agent.traverses((NodeId(0), NodeId(1))));
    assert_eq!(agent.actual_speed, 0.0);
    assert_eq!(agent.position, start);
    assert!(agent.known_closed().contains(&(NodeId(1), NodeId(0))));

    // The next pass drives the detour
    agent
        .advance(&network, &lights, [], 0.1, &mut closed, &mut rng)
        .unwrap();
    let lane = agent.current_edge.unwrap();
    assert_eq!((lane.from, lane.to), (NodeId(0), NodeId(3)));
    assert_on_lane(&agent, &network);
}

#[test]
fn test_closed_road_without_detour_falls_back_to_random_path() {
    // 0 - 1 - 2 with a separate pair 3 - 4
    let mut network = network_with(
        &[(0.0, 0.0), (100.0, 0.0), (200.0, 0.0), (0.0, 300.0), (100.0, 300.0)],
        &[(0, 1), (1, 2), (3, 4)],
    );
    let lights = TrafficLights::new();
    let mut closed = BTreeSet::new();
    let mut rng = StdRng::seed_from_u64(9);

    let mut agent =
        Agent::on_path(AgentId(0), style(80.0), &network, vec![NodeId(1), NodeId(2)]).unwrap();
    network.set_edge_open(NodeId(1), NodeId(2), false).unwrap();
    network.recompute_reachability();

    let outcome = agent
        .advance(&network, &lights, [], 0.1, &mut closed, &mut rng)
        .unwrap();

    assert_eq!(
        outcome,
        AdvanceOutcome::Rerouted {
            edge: (NodeId(1), NodeId(2)),
            fallback: true
        }
    );
    assert!(agent.path.len() >= 2);
    assert!(!agent.traverses((NodeId(1), NodeId(2))));
    assert!(!agent.path.contains(&NodeId(2)));
    assert_on_lane(&agent, &network);
}

#[test]
fn test_reopened_road_is_cleared_from_closed_set() {
    let network = square();
    let lights = TrafficLights::new();
    let mut closed = BTreeSet::from([(NodeId(0), NodeId(1)), (NodeId(1), NodeId(0))]);
    let mut rng = StdRng::seed_from_u64(0);

    let mut agent =
        Agent::on_path(AgentId(0), style(80.0), &network, vec![NodeId(0), NodeId(1)]).unwrap();
    agent
        .advance(&network, &lights, [], 0.1, &mut closed, &mut rng)
        .unwrap();

    assert!(closed.is_empty());
}

#[test]
fn test_path_picking_on_roadless_graph_is_unreachable() {
    let network = network_with(&[(0.0, 0.0), (100.0, 0.0), (200.0, 0.0)], &[]);
    let mut rng = StdRng::seed_from_u64(0);

    let result = Agent::spawn(AgentId(0), style(80.0), &network, &mut rng);
    assert!(matches!(result, Err(SimError::GraphUnreachable { .. })));
}

#[test]
fn test_world_reroutes_agents_when_a_road_closes() {
    let mut world = SimWorld::new_with_seed(3);
    world.generate(GraphMode::Grid, 5).unwrap();

    let path = grid_path(&world, &[(0, 0), (0, 1), (0, 2)]);
    let closed_road = (path[1], path[2]);
    let first_lane = (path[0], path[1]);
    let id = world.next_agent_id();
    let agent = Agent::on_path(id, style(60.0), world.network(), path).unwrap();
    world.insert_agent(agent);

    assert!(world.set_edge_open(closed_road.0, closed_road.1, false).unwrap());
    assert!(!world.set_edge_open(closed_road.0, closed_road.1, false).unwrap());

    let agent = &world.agents[0];
    assert!(!agent.traverses(closed_road));
    assert_eq!(agent.path.first(), Some(&first_lane.0));
    assert_eq!(agent.path.last(), Some(&closed_road.1));
    assert!(agent.path.len() >= 5);
    let lane = agent.current_edge.unwrap();
    assert_eq!((lane.from, lane.to), first_lane);
    assert_eq!(world.stats.reroutes, 1);
    assert!(world.closed_edges.contains(&(closed_road.1, closed_road.0)));

    for _ in 0..50 {
        world.step(0.1);
        assert_on_lane(&world.agents[0], world.network());
    }
}

#[test]
fn test_spawn_uses_palette_and_speed_range() {
    let mut world = SimWorld::new_with_seed(21);
    world.generate(GraphMode::Grid, 4).unwrap();

    assert_eq!(world.spawn_agents(6).unwrap(), 6);
    let colors: Vec<Rgb> = world.agents.iter().take(4).map(|a| a.color).collect();
    assert_eq!(
        colors,
        vec![Rgb(255, 0, 0), Rgb(0, 255, 0), Rgb(0, 0, 255), Rgb(255, 255, 0)]
    );
    for agent in &world.agents {
        assert!((40.0..=120.0).contains(&agent.max_speed));
        assert_eq!(agent.radius, AGENT_RADIUS);
    }

    // Spawning again replaces the population with fresh ids
    let first_ids: Vec<AgentId> = world.agents.iter().map(|a| a.id).collect();
    world.spawn_agents(2).unwrap();
    assert_eq!(world.agents.len(), 2);
    assert!(world.agents.iter().all(|a| !first_ids.contains(&a.id)));
}

#[test]
fn test_regeneration_keeps_agents_with_new_paths() {
    let mut world = SimWorld::new_with_seed(8);
    world.generate(GraphMode::Grid, 4).unwrap();
    world.spawn_agents(3).unwrap();
    let version = world.topology_version();
    let map_version = world.map_version();

    world.generate(GraphMode::Predefined, 0).unwrap();
    assert_eq!(world.agents.len(), 3);
    assert!(world.topology_version() > version);
    assert_eq!(world.map_version(), map_version + 1);
    for agent in &world.agents {
        assert!(agent.path.iter().all(|id| id.0 < 29));
        assert_on_lane(agent, world.network());
    }
}
