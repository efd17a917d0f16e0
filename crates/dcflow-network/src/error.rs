//! Library error taxonomy.
//!
//! Only recoverable conditions surface as [`Error`] values. Internal
//! invariant violations (a port write exceeding link capacity, an
//! invalidation inside a must-be-stable region, flow-id exhaustion) are
//! programming errors and panic instead; the simulator is not expected to
//! survive them.

use thiserror::Error;

use crate::flow::FlowId;
use crate::node::NodeId;

/// Errors reported by library-surface operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A flow or topology operation referenced a node that does not exist.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    /// A flow operation referenced a flow that does not exist.
    #[error("unknown flow {0}")]
    UnknownFlow(FlowId),
    /// The routing table has no entry for the requested destination.
    #[error("no route from node {src} to node {dst}")]
    NoRoute {
        /// Source node.
        src: NodeId,
        /// Destination node.
        dst: NodeId,
    },
    /// Update propagation exceeded the oscillation bound without quiescing.
    #[error("network failed to converge after {cycles} update cycles")]
    ConvergenceTimeout {
        /// Number of update cycles executed before giving up.
        cycles: usize,
    },
    /// The topology specification is structurally invalid.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    /// The topology specification could not be deserialized.
    #[error("malformed topology specification: {0}")]
    TopologyParse(#[from] serde_json::Error),
}

/// Convenience alias for results of library operations.
pub type Result<T> = std::result::Result<T, Error>;
