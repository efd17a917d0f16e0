//! Immutable telemetry snapshots.
//!
//! Snapshots are taken only in the stable state, so every record is
//! internally consistent. All ratios are throughput over demand (or over
//! capacity) and are `None` instead of NaN when the denominator is zero.

use serde::Serialize;

use crate::node::NodeId;

/// Telemetry record of one node at one instant.
#[derive(Clone, Debug, Serialize)]
pub struct NodeRecord {
    /// Snapshot instant in milliseconds.
    pub timestamp_ms: u64,
    /// Node id.
    pub node_id: NodeId,
    /// Number of flows currently arriving at the node.
    pub incoming_flows: usize,
    /// Number of flows currently leaving the node.
    pub outgoing_flows: usize,
    /// Number of flows sourced at the node.
    pub generating_flows: usize,
    /// Number of flows terminating at the node.
    pub consuming_flows: usize,
    /// Smallest throughput/demand ratio among the flows sourced here.
    pub min_flow_throughput_ratio: Option<f64>,
    /// Largest throughput/demand ratio among the flows sourced here.
    pub max_flow_throughput_ratio: Option<f64>,
    /// Mean throughput/demand ratio among the flows sourced here.
    pub avg_flow_throughput_ratio: Option<f64>,
    /// Aggregate outgoing rate of the node in Mbps.
    pub node_throughput_mbps: f64,
    /// Aggregate outgoing rate over total finite port capacity.
    pub node_throughput_ratio: Option<f64>,
    /// Instantaneous power draw in watts.
    pub power_draw_watts: f64,
    /// Energy consumed since the start of the run, in joules.
    pub energy_consumed_joule: f64,
}

/// Immutable network-wide snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct NetworkSnapshot {
    /// Snapshot instant in milliseconds.
    pub timestamp_ms: u64,
    /// Number of nodes, the internet included.
    pub num_of_nodes: usize,
    /// Number of registered flows, unroutable ones included.
    pub num_of_active_flows: usize,
    /// Mean throughput/demand ratio across all flows with demand.
    pub avg_flow_throughput_ratio: Option<f64>,
    /// Sum of all nodes' instantaneous power draw, in watts.
    pub total_power_draw_watts: f64,
    /// Sum of all nodes' consumed energy, in joules.
    pub total_energy_consumed_joule: f64,
    /// Whether the last propagation wave quiesced within the oscillation
    /// bound. A non-converged snapshot is still safe to read.
    pub converged: bool,
    /// Per-node records, node id ascending (internet last).
    pub node_records: Vec<NodeRecord>,
}
