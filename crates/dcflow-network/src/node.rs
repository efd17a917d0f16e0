//! Network nodes and the per-node update cycle.

use std::collections::{BTreeMap, BTreeSet};

use dcflow_models::PowerModel;

use crate::energy::EnergyMonitor;
use crate::fairness::{FairnessContext, FairnessPolicy, FlowDemand};
use crate::flow::{FlowId, NetFlow};
use crate::forwarding::ForwardingPolicy;
use crate::handler::FlowHandler;
use crate::port::{Port, PortIndex};
use crate::routing::RoutingTable;
use crate::stability::Invalidator;
use crate::units::DataRate;

/// Unique node id, assigned at topology construction.
pub type NodeId = usize;

/// Id of the distinguished abstract internet node.
pub const INTERNET_ID: NodeId = usize::MAX;

/// The role of a node in the topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// End host; can source and sink flows.
    Host,
    /// Transit-only switch.
    Switch,
    /// Switch that may additionally be wired to the internet node.
    CoreSwitch,
    /// The abstract internet: unbounded port speed, elastic port count.
    Internet,
}

impl NodeKind {
    /// Whether flows may start or terminate at nodes of this kind.
    pub fn is_flow_endpoint(&self) -> bool {
        matches!(self, NodeKind::Host | NodeKind::Internet)
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            NodeKind::Host => "host",
            NodeKind::Switch => "switch",
            NodeKind::CoreSwitch => "core-switch",
            NodeKind::Internet => "internet",
        }
    }
}

// Update plan ---------------------------------------------------------------------------------------------------------

pub(crate) struct PortRound {
    pub port: PortIndex,
    pub arrival: Vec<FlowId>,
    pub contenders: BTreeSet<FlowId>,
}

/// Everything one update cycle decided, computed against an immutable node
/// and applied by the network afterwards (peer writes cross node borders).
pub(crate) struct NodeUpdatePlan {
    pub transit: BTreeSet<FlowId>,
    pub rounds: Vec<PortRound>,
    pub rate_changes: Vec<(PortIndex, FlowId, DataRate)>,
    pub throughput_updates: Vec<(FlowId, DataRate)>,
}

// Node ----------------------------------------------------------------------------------------------------------------

/// A node of the simulated network.
pub struct Node {
    id: NodeId,
    name: String,
    kind: NodeKind,
    ports: Vec<Port>,
    pub(crate) routing: RoutingTable,
    pub(crate) flow_handler: FlowHandler,
    fairness: Box<dyn FairnessPolicy>,
    forwarding: Box<dyn ForwardingPolicy>,
    pub(crate) energy: EnergyMonitor,
    pub(crate) invalidator: Invalidator,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: NodeId,
        name: String,
        kind: NodeKind,
        port_speed: DataRate,
        num_of_ports: usize,
        fairness: Box<dyn FairnessPolicy>,
        forwarding: Box<dyn ForwardingPolicy>,
        power_model: Box<dyn PowerModel>,
        invalidator: Invalidator,
    ) -> Self {
        let ports = match kind {
            // The internet grows ports on demand.
            NodeKind::Internet => Vec::new(),
            _ => (0..num_of_ports).map(|i| Port::new(i, port_speed)).collect(),
        };
        Self {
            id,
            name,
            kind,
            ports,
            routing: RoutingTable::default(),
            flow_handler: FlowHandler::default(),
            fairness,
            forwarding,
            energy: EnergyMonitor::new(power_model),
            invalidator,
        }
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// The node's ports.
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    /// One port by index.
    ///
    /// Panics if the index is out of range.
    pub fn port(&self, index: PortIndex) -> &Port {
        &self.ports[index]
    }

    pub(crate) fn port_mut(&mut self, index: PortIndex) -> &mut Port {
        &mut self.ports[index]
    }

    /// The node's routing table.
    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing
    }

    /// The node's flow registries.
    pub fn flow_handler(&self) -> &FlowHandler {
        &self.flow_handler
    }

    /// The node's energy monitor.
    pub fn energy_monitor(&self) -> &EnergyMonitor {
        &self.energy
    }

    pub(crate) fn energy_monitor_mut(&mut self) -> &mut EnergyMonitor {
        &mut self.energy
    }

    /// Finds an unconnected port, appending a fresh one on the internet
    /// node when all existing ports are taken.
    pub(crate) fn acquire_free_port(&mut self) -> Option<PortIndex> {
        if let Some(port) = self.ports.iter().find(|p| !p.is_connected()) {
            return Some(port.index());
        }
        if self.kind == NodeKind::Internet {
            let index = self.ports.len();
            self.ports.push(Port::new(index, DataRate::UNLIMITED));
            return Some(index);
        }
        None
    }

    /// Sum of outgoing rates across all ports.
    pub fn total_outgoing_rate(&self) -> DataRate {
        self.ports.iter().map(|p| p.total_outgoing_rate()).sum()
    }

    /// Sum of incoming rates across all ports.
    pub fn total_incoming_rate(&self) -> DataRate {
        self.ports.iter().map(|p| p.total_incoming_rate()).sum()
    }

    /// Aggregate incoming rate of one flow across all ports.
    pub fn incoming_rate_of(&self, flow: FlowId) -> DataRate {
        self.ports.iter().map(|p| p.incoming_rate(flow)).sum()
    }

    /// Aggregate outgoing rate of one flow across all ports.
    pub fn outgoing_rate_of(&self, flow: FlowId) -> DataRate {
        self.ports.iter().map(|p| p.outgoing_rate(flow)).sum()
    }

    /// Fraction of the node's finite port capacity currently in use by
    /// outgoing traffic. Unbounded (internet) ports do not count.
    pub fn utilization(&self) -> f64 {
        let mut capacity = 0.;
        let mut used = 0.;
        for port in &self.ports {
            if port.max_speed().is_unlimited() {
                continue;
            }
            capacity += port.max_speed().bits_per_sec();
            used += port.total_outgoing_rate().bits_per_sec();
        }
        if capacity > 0. {
            used / capacity
        } else {
            0.
        }
    }

    /// Total capacity of the node's finite ports.
    pub fn total_capacity(&self) -> DataRate {
        self.ports
            .iter()
            .filter(|p| !p.max_speed().is_unlimited())
            .map(|p| p.max_speed())
            .sum()
    }

    // Update cycle ----------------------------------------------------------------------------------------------------

    /// Runs one update cycle against the node's current state: refreshes
    /// the transit set, forwards demands onto ports, applies fairness and
    /// produces the resulting rate and throughput changes. The node itself
    /// is not mutated; the network applies the plan, because peer-port
    /// writes cross node boundaries.
    pub(crate) fn plan_update(&self, flows: &BTreeMap<FlowId, NetFlow>) -> NodeUpdatePlan {
        let transit = self.current_transit(flows);
        let demands = self.collect_demands(flows, &transit);
        let port_demands = self.forward_demands(&demands);

        let mut rounds = Vec::new();
        let mut rate_changes = Vec::new();
        for port in &self.ports {
            let empty = Vec::new();
            let contending = port_demands.get(&port.index()).unwrap_or(&empty);
            if contending.is_empty()
                && port.outgoing_map().is_empty()
                && !port.contenders_changed(&BTreeSet::new())
            {
                continue;
            }

            let contenders: BTreeSet<FlowId> = contending.iter().map(|d| d.flow).collect();
            // Existing arrivals keep their position, new contenders queue up
            // at the back.
            let mut arrival: Vec<FlowId> = port
                .arrival_order()
                .iter()
                .filter(|f| contenders.contains(*f))
                .copied()
                .collect();
            for d in contending {
                if !arrival.contains(&d.flow) {
                    arrival.push(d.flow);
                }
            }

            let allocations = self.fairness.allocate(&FairnessContext {
                capacity: port.effective_capacity(),
                demands: contending,
                arrival_order: &arrival,
                previous: port.outgoing_map(),
                capacity_decreased: port.capacity_decreased_since_last_round(),
                contenders_changed: port.contenders_changed(&contenders),
            });

            for (&flow, &rate) in &allocations {
                if !port.outgoing_rate(flow).approx_eq(rate) {
                    rate_changes.push((port.index(), flow, rate));
                }
            }
            for (&flow, _) in port.outgoing_map() {
                if !allocations.contains_key(&flow) && !port.outgoing_rate(flow).is_zero() {
                    rate_changes.push((port.index(), flow, DataRate::ZERO));
                }
            }
            rounds.push(PortRound {
                port: port.index(),
                arrival,
                contenders,
            });
        }

        let mut throughput_updates = Vec::new();
        for (&flow_id, flow) in self.flow_handler.consuming() {
            if flow.transmitter() == self.id {
                // self-loops are delivered at registration
                continue;
            }
            let delivered = self.incoming_rate_of(flow_id);
            if !flow.throughput().approx_eq(delivered) {
                throughput_updates.push((flow_id, delivered));
            }
        }

        NodeUpdatePlan {
            transit,
            rounds,
            rate_changes,
            throughput_updates,
        }
    }

    /// Flows currently arriving on some port that neither start nor end
    /// here.
    fn current_transit(&self, flows: &BTreeMap<FlowId, NetFlow>) -> BTreeSet<FlowId> {
        let mut transit = BTreeSet::new();
        for port in &self.ports {
            for (&flow_id, _) in port.incoming_flows() {
                let Some(flow) = flows.get(&flow_id) else {
                    continue;
                };
                if flow.transmitter() != self.id && flow.destination() != self.id {
                    transit.insert(flow_id);
                }
            }
        }
        transit
    }

    /// Demand and destination per flow that this node must forward:
    /// generated flows at their demand, transit flows at their aggregate
    /// incoming rate.
    fn collect_demands(
        &self,
        flows: &BTreeMap<FlowId, NetFlow>,
        transit: &BTreeSet<FlowId>,
    ) -> BTreeMap<FlowId, (DataRate, NodeId)> {
        let mut demands = BTreeMap::new();
        for (&flow_id, flow) in self.flow_handler.generating() {
            if flow.destination() == self.id {
                continue;
            }
            let demand = flow.demand();
            if !demand.is_zero() {
                demands.insert(flow_id, (demand, flow.destination()));
            }
        }
        for &flow_id in transit {
            let Some(flow) = flows.get(&flow_id) else {
                continue;
            };
            let demand = self.incoming_rate_of(flow_id);
            if !demand.is_zero() {
                demands.insert(flow_id, (demand, flow.destination()));
            }
        }
        demands
    }

    /// Runs the forwarding policy per flow, accumulating intended per-port
    /// demands. Unroutable flows are left out (demand preserved, zero rate).
    fn forward_demands(
        &self,
        demands: &BTreeMap<FlowId, (DataRate, NodeId)>,
    ) -> BTreeMap<PortIndex, Vec<FlowDemand>> {
        let mut port_demands: BTreeMap<PortIndex, Vec<FlowDemand>> = BTreeMap::new();
        for (&flow_id, &(demand, destination)) in demands {
            let Some(entry) = self.routing.lookup(destination) else {
                continue;
            };
            let mut hops: Vec<PortIndex> = entry
                .next_hops
                .iter()
                .copied()
                .filter(|&p| self.ports[p].is_connected())
                .collect();
            // Reproducible ECMP: iterate next hops by the peer node's id.
            hops.sort_by_key(|&p| (self.ports[p].peer().unwrap().node, p));
            for (port, rate) in self.forwarding.split(demand, &hops) {
                if !rate.is_zero() {
                    port_demands
                        .entry(port)
                        .or_default()
                        .push(FlowDemand { flow: flow_id, demand: rate });
                }
            }
        }
        port_demands
    }
}
