//! Core types for the traffic simulation
//!
//! Plain value types shared by the road network, agents and traffic lights.

use std::fmt;
use std::ops::{Add, Mul, Sub};

/// Identifier of a node in the road network.
///
/// Ids are dense indices assigned in insertion order. A network is only ever
/// replaced wholesale, so an id stays valid for the lifetime of its network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identifier of an agent, never reused within a simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentId(pub u64);

/// An ordered node pair. Closed-edge reports and traffic-light phases are
/// keyed by direction, so `(u, v)` and `(v, u)` are distinct keys.
pub type EdgeKey = (NodeId, NodeId);

/// Hands out agent ids. Owned by the simulation world rather than being a
/// process-wide counter.
#[derive(Debug, Default, Clone)]
pub struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_agent_id(&mut self) -> AgentId {
        let id = AgentId(self.next);
        self.next += 1;
        id
    }
}

/// Kind of a road network node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Plain,
    /// Governed by a traffic light controller
    Intersection,
    PointOfInterest,
}

/// Which side of the centre line a lane runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LaneSide {
    Left,
    Right,
}

/// A directed lane: the road `from -> to` travelled on `side`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lane {
    pub from: NodeId,
    pub to: NodeId,
    pub side: LaneSide,
}

impl Lane {
    pub fn new(from: NodeId, to: NodeId, side: LaneSide) -> Self {
        Self { from, to, side }
    }

    pub fn edge(&self) -> EdgeKey {
        (self.from, self.to)
    }
}

/// An RGB colour used to tell agents apart in telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// A 2D position in layout space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f32 {
        (*other - *self).length()
    }

    pub fn length(&self) -> f32 {
        self.x.hypot(self.y)
    }

    pub fn dot(&self, other: &Position) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn lerp(&self, other: &Position, t: f32) -> Position {
        *self + (*other - *self) * t
    }

    /// Angle in radians of the vector from this position to another
    pub fn angle_to(&self, other: &Position) -> f32 {
        let d = *other - *self;
        d.y.atan2(d.x)
    }

    /// Lateral offset of half a lane width from the segment `self -> other`.
    ///
    /// Returns the zero vector for a degenerate segment.
    pub fn lane_offset(&self, other: &Position, side: LaneSide, lane_width: f32) -> Position {
        let d = *other - *self;
        let len = d.length();
        if len == 0.0 {
            return Position::default();
        }
        let (dir_x, dir_y) = (d.x / len, d.y / len);
        // Normal rotated -90 degrees; the right lane takes the opposite one
        let normal = match side {
            LaneSide::Left => Position::new(dir_y, -dir_x),
            LaneSide::Right => Position::new(-dir_y, dir_x),
        };
        normal * (lane_width / 2.0)
    }
}

impl Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Position {
    type Output = Position;

    fn mul(self, rhs: f32) -> Position {
        Position::new(self.x * rhs, self.y * rhs)
    }
}

/// Distance between the two lanes of a road
pub const LANE_WIDTH: f32 = 12.0;

/// Distance to the end of a lane at which an agent starts obeying a red light
pub const INTERSECTION_APPROACH_DISTANCE: f32 = 40.0;

/// Default collision radius of an agent
pub const AGENT_RADIUS: f32 = 5.0;

/// Multiple of the collision radius under which an agent matches its leader's speed
pub const SAFE_FOLLOWING_MULTIPLIER: f32 = 3.0;

/// Multiple of the collision radius under which an agent stops behind its leader
pub const STOP_DISTANCE_MULTIPLIER: f32 = 4.0;

/// Fraction of max speed an agent cruises at on an open lane
pub const CRUISE_FRACTION: f32 = 0.5;

/// Displacement under which a tick counts as standing still
pub const SPEED_EPSILON: f32 = 0.001;

/// Inclusive range agent max speeds are drawn from at spawn
pub const MIN_AGENT_SPEED: u32 = 40;
pub const MAX_AGENT_SPEED: u32 = 120;

/// Random source/target draws before giving up on a disconnected graph
pub const MAX_PATH_ATTEMPTS: usize = 1000;

/// Green phase length of generated traffic lights, in simulated seconds
pub const GREEN_TIME: f32 = 2.0;

/// Detection radius of generated sensor-based lights
pub const SENSOR_DETECTION_RADIUS: f32 = 80.0;

/// Detection radius of lights created without an explicit one
pub const DEFAULT_DETECTION_RADIUS: f32 = 50.0;
