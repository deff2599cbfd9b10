//! Standalone traffic simulation module
//!
//! Road network, path finding, agent kinematics, traffic lights and the
//! clock that drives them from a shared command/telemetry record. Nothing in
//! here renders; inspectors and front ends talk to it through
//! [`SharedHandle`].

mod agent;
mod clock;
mod error;
mod generator;
mod road_network;
mod shared_state;
mod traffic_light;
mod types;
mod world;

pub use agent::{random_path, AdvanceOutcome, Agent, AgentStyle};
pub use clock::{spawn_clock, LoopConfig, RunSummary, SimConfig, SimulationClock};
pub use error::{SimError, SimResult};
pub use generator::{generate, grid_label, GeneratedMap, GraphMode, POINTS_OF_INTEREST};
pub use road_network::{Node, Road, RoadNetwork};
pub use shared_state::{
    AgentTelemetry, Command, InspectorKind, SharedHandle, SharedState, TelemetrySnapshot,
};
pub use traffic_light::{LightMode, LightPhase, TrafficLightController, TrafficLights};
pub use types::{
    AgentId, EdgeKey, IdGenerator, Lane, LaneSide, NodeId, NodeKind, Position, Rgb, AGENT_RADIUS,
    CRUISE_FRACTION, DEFAULT_DETECTION_RADIUS, GREEN_TIME, INTERSECTION_APPROACH_DISTANCE,
    LANE_WIDTH, MAX_AGENT_SPEED, MAX_PATH_ATTEMPTS, MIN_AGENT_SPEED, SAFE_FOLLOWING_MULTIPLIER,
    SENSOR_DETECTION_RADIUS, SPEED_EPSILON, STOP_DISTANCE_MULTIPLIER,
};
pub use world::{SimStats, SimWorld};
