//! Traffic Graph Simulation Library
//!
//! A road-network traffic micro-simulation that runs headless on its own
//! thread, with inspectors reading its telemetry.

pub mod inspector;
pub mod simulation;
