//! Error taxonomy of the simulation core

use thiserror::Error;

use super::types::NodeId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// No route between two nodes in the current topology view.
    /// Recovered locally by callers, never shown to the user.
    #[error("no path from {from} to {to}")]
    NoPath { from: NodeId, to: NodeId },

    /// Random route selection gave up; the graph is too disconnected
    #[error("no connected source/target pair found after {attempts} attempts")]
    GraphUnreachable { attempts: usize },

    #[error("no road between {from} and {to}")]
    InvalidEdge { from: NodeId, to: NodeId },

    #[error("node {0} not found")]
    UnknownNode(NodeId),

    #[error("graph generation failed: {0}")]
    Generation(String),
}

pub type SimResult<T> = Result<T, SimError>;
