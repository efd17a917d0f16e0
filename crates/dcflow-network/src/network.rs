//! The network and its controller.
//!
//! [`Network`] owns the nodes, the active flows and the stability
//! accounting, and drives update propagation: signaling a node enqueues it
//! on a deterministic ready set, and [`NetworkController::await_stability`]
//! drains the set (lowest node id first) until every update channel is
//! empty. [`NetworkController`] is the public facade used to build
//! topologies, start and stop flows and take telemetry snapshots.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use indexmap::IndexMap;

use dcflow_models::{LinearPowerModel, PowerModel, ZeroPowerModel};

use crate::energy::{EnergyRecorder, InstantSource, ManualClock, PowerChangeHandler};
use crate::error::{Error, Result};
use crate::fairness::FairnessMode;
use crate::flow::{FlowId, NetFlow, RateChangeHandler};
use crate::forwarding::StaticEcmp;
use crate::node::{Node, NodeId, NodeKind, INTERNET_ID};
use crate::port::PortRef;
use crate::routing::{Advertisement, RouteUpdate};
use crate::snapshot::{NetworkSnapshot, NodeRecord};
use crate::stability::StabilityValidator;
use crate::topology::{NodeKindSpec, TopologySpec};
use crate::units::DataRate;
use crate::{log_debug, log_trace, log_warn};

/// Default maximum power draw of a node at full utilization, in watts.
pub const DEFAULT_MAX_POWER_WATTS: f64 = 250.;
/// Default idle power draw of an active node, in watts.
pub const DEFAULT_IDLE_POWER_WATTS: f64 = 150.;
/// Default multiplier of the convergence bound (cycles per flow per node).
pub const DEFAULT_CONVERGENCE_BOUND_FACTOR: usize = 10;

// Network -------------------------------------------------------------------------------------------------------------

/// The simulated network: nodes, active flows and propagation machinery.
///
/// Obtained from [`NetworkController::network`] for read access; all
/// mutation goes through the controller.
pub struct Network {
    name: String,
    fairness: FairnessMode,
    nodes: BTreeMap<NodeId, Node>,
    nodes_name_map: IndexMap<String, NodeId>,
    next_node_id: NodeId,
    flows: BTreeMap<FlowId, NetFlow>,
    validator: StabilityValidator,
    // Coalesced update channels: a node appears at most once, and is drained
    // lowest id first.
    ready: BTreeSet<NodeId>,
    adverts: VecDeque<Advertisement>,
    clock: Rc<dyn InstantSource>,
    recorder: EnergyRecorder,
    converged: bool,
    convergence_bound_factor: usize,
}

impl Network {
    fn new(fairness: FairnessMode) -> Self {
        let validator = StabilityValidator::new();
        let mut network = Self {
            name: "network".to_string(),
            fairness,
            nodes: BTreeMap::new(),
            nodes_name_map: IndexMap::new(),
            next_node_id: 0,
            flows: BTreeMap::new(),
            validator,
            ready: BTreeSet::new(),
            adverts: VecDeque::new(),
            clock: Rc::new(ManualClock::new(0.)),
            recorder: EnergyRecorder::default(),
            converged: true,
            convergence_bound_factor: DEFAULT_CONVERGENCE_BOUND_FACTOR,
        };
        network.insert_node(INTERNET_ID, "internet".to_string(), NodeKind::Internet, DataRate::UNLIMITED, 0, Box::new(ZeroPowerModel));
        network
    }

    /// Component name, used by the log macros.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current instant of the installed clock, in seconds. Used by the log
    /// macros.
    pub fn time(&self) -> f64 {
        self.clock.now().as_secs_f64()
    }

    /// Returns a node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// All nodes, id ascending (the internet node last).
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Number of nodes, the internet included.
    pub fn num_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the node id registered under `name`.
    pub fn node_id_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes_name_map.get(name).copied()
    }

    /// Currently registered flows, unroutable ones included.
    pub fn num_of_active_flows(&self) -> usize {
        self.flows.len()
    }

    /// The network's stability accounting.
    pub fn validator(&self) -> &StabilityValidator {
        &self.validator
    }

    /// Whether the last propagation wave quiesced within the bound.
    pub fn is_converged(&self) -> bool {
        self.converged
    }

    // Topology --------------------------------------------------------------------------------------------------------

    fn insert_node(
        &mut self,
        id: NodeId,
        name: String,
        kind: NodeKind,
        port_speed: DataRate,
        num_of_ports: usize,
        power_model: Box<dyn PowerModel>,
    ) {
        assert!(
            !self.nodes.contains_key(&id),
            "node id {} is already taken",
            id
        );
        assert!(
            !self.nodes_name_map.contains_key(&name),
            "node name '{}' is already taken",
            name
        );
        let node = Node::new(
            id,
            name.clone(),
            kind,
            port_speed,
            num_of_ports,
            self.fairness.build(),
            Box::new(StaticEcmp),
            power_model,
            self.validator.invalidator(),
        );
        self.nodes_name_map.insert(name, id);
        self.nodes.insert(id, node);
    }

    fn add_node(
        &mut self,
        id: Option<NodeId>,
        name: String,
        kind: NodeKind,
        port_speed: DataRate,
        num_of_ports: usize,
        power_model: Box<dyn PowerModel>,
    ) -> NodeId {
        let id = id.unwrap_or_else(|| {
            while self.nodes.contains_key(&self.next_node_id) {
                self.next_node_id += 1;
            }
            self.next_node_id
        });
        self.insert_node(id, name, kind, port_speed, num_of_ports, power_model);
        id
    }

    fn connect(&mut self, a: NodeId, b: NodeId) -> Result<(PortRef, PortRef)> {
        if !self.nodes.contains_key(&a) {
            return Err(Error::UnknownNode(a));
        }
        if !self.nodes.contains_key(&b) {
            return Err(Error::UnknownNode(b));
        }
        if a == b {
            return Err(Error::InvalidTopology(format!(
                "node {a} cannot be linked to itself"
            )));
        }
        // Only core switches reach the internet.
        for (this, other) in [(a, b), (b, a)] {
            if this == INTERNET_ID && self.nodes[&other].kind() != NodeKind::CoreSwitch {
                return Err(Error::InvalidTopology(format!(
                    "node {other} is not a core switch and cannot reach the internet"
                )));
            }
        }

        let pa = self
            .nodes
            .get_mut(&a)
            .unwrap()
            .acquire_free_port()
            .ok_or_else(|| Error::InvalidTopology(format!("no free ports on node {a}")))?;
        let pb = self
            .nodes
            .get_mut(&b)
            .unwrap()
            .acquire_free_port()
            .ok_or_else(|| Error::InvalidTopology(format!("no free ports on node {b}")))?;
        let ref_a = PortRef { node: a, port: pa };
        let ref_b = PortRef { node: b, port: pb };
        let speed_a = self.nodes[&a].port(pa).max_speed();
        let speed_b = self.nodes[&b].port(pb).max_speed();
        {
            let port_a = self.nodes.get_mut(&a).unwrap().port_mut(pa);
            port_a.set_peer(Some(ref_b));
            port_a.set_peer_speed(speed_b);
        }
        {
            let port_b = self.nodes.get_mut(&b).unwrap().port_mut(pb);
            port_b.set_peer(Some(ref_a));
            port_b.set_peer_speed(speed_a);
        }
        log_debug!(self, "connected node {} port {} to node {} port {}", a, pa, b, pb);

        self.flood_table_over_link(a, ref_b);
        self.flood_table_over_link(b, ref_a);
        self.drain_advertisements();
        self.signal_all_nodes();
        Ok((ref_a, ref_b))
    }

    fn disconnect(&mut self, port: PortRef) -> Result<()> {
        let node = self.nodes.get_mut(&port.node).ok_or(Error::UnknownNode(port.node))?;
        if port.port >= node.ports().len() {
            return Err(Error::InvalidTopology(format!(
                "node {} has no port {}",
                port.node, port.port
            )));
        }
        let Some(peer) = node.port(port.port).peer() else {
            return Err(Error::InvalidTopology(format!(
                "port {} of node {} is not connected",
                port.port, port.node
            )));
        };
        let local = node.port_mut(port.port);
        local.set_peer(None);
        local.reset_link_state();
        let lost_local = node.routing.purge_port(port.port);
        let peer_node = self.nodes.get_mut(&peer.node).unwrap();
        let remote = peer_node.port_mut(peer.port);
        remote.set_peer(None);
        remote.reset_link_state();
        let lost_remote = peer_node.routing.purge_port(peer.port);
        log_debug!(self, "disconnected node {} port {} from node {} port {}", port.node, port.port, peer.node, peer.port);

        // Only the endpoints reference the dead link, so purging their
        // tables suffices while equal-cost alternatives remain: no distance
        // changed anywhere. Once a destination lost its last next hop,
        // distances may shift network-wide and the tables are rebuilt.
        if !lost_local.is_empty() || !lost_remote.is_empty() {
            self.rebuild_routes();
        }
        self.signal_all_nodes();
        Ok(())
    }

    /// Sends one endpoint's routing knowledge (plus itself at distance zero)
    /// to the node on the other end of a freshly created link.
    fn flood_table_over_link(&mut self, from: NodeId, receiver: PortRef) {
        self.adverts.push_back(Advertisement {
            to: receiver.node,
            via_port: receiver.port,
            dst: from,
            distance: 0,
        });
        for (&dst, entry) in self.nodes[&from].routing.destinations() {
            if dst == receiver.node {
                continue;
            }
            self.adverts.push_back(Advertisement {
                to: receiver.node,
                via_port: receiver.port,
                dst,
                distance: entry.distance,
            });
        }
    }

    /// Drops every routing table and floods each node's self-advertisement
    /// through the current links. Withdawal by re-flooding avoids the
    /// count-to-infinity behavior of incremental distance-vector removal.
    fn rebuild_routes(&mut self) {
        for node in self.nodes.values_mut() {
            node.routing.clear();
        }
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            let peers: Vec<PortRef> = self.nodes[&id]
                .ports()
                .iter()
                .filter_map(|p| p.peer())
                .collect();
            for peer in peers {
                self.adverts.push_back(Advertisement {
                    to: peer.node,
                    via_port: peer.port,
                    dst: id,
                    distance: 0,
                });
            }
        }
        self.drain_advertisements();
    }

    /// Processes queued advertisements in FIFO order; accepted improvements
    /// re-advertise to all neighbors, so the flood terminates once every
    /// table holds minimum distances.
    fn drain_advertisements(&mut self) {
        while let Some(adv) = self.adverts.pop_front() {
            if adv.dst == adv.to {
                continue;
            }
            let distance = adv.distance + 1;
            let node = self.nodes.get_mut(&adv.to).expect("advertisement to unknown node");
            match node.routing.accept(adv.dst, distance, adv.via_port) {
                RouteUpdate::Improved => {
                    let peers: Vec<PortRef> = node.ports().iter().filter_map(|p| p.peer()).collect();
                    for peer in peers {
                        self.adverts.push_back(Advertisement {
                            to: peer.node,
                            via_port: peer.port,
                            dst: adv.dst,
                            distance,
                        });
                    }
                }
                RouteUpdate::Extended | RouteUpdate::Ignored => {}
            }
        }
    }

    // Flows -----------------------------------------------------------------------------------------------------------

    fn start_flow(
        &mut self,
        id: FlowId,
        src: NodeId,
        dst: NodeId,
        demand: DataRate,
        on_throughput_change: Option<RateChangeHandler>,
    ) -> Result<NetFlow> {
        if !self.nodes.contains_key(&src) {
            return Err(Error::UnknownNode(src));
        }
        if !self.nodes.contains_key(&dst) {
            return Err(Error::UnknownNode(dst));
        }
        assert!(
            self.nodes[&src].kind().is_flow_endpoint(),
            "flows cannot start at a {}",
            self.nodes[&src].kind().label()
        );
        assert!(
            self.nodes[&dst].kind().is_flow_endpoint(),
            "flows cannot terminate at a {}",
            self.nodes[&dst].kind().label()
        );

        let flow = NetFlow::new(id, src, dst, demand);
        if let Some(handler) = on_throughput_change {
            flow.add_throughput_handler(handler);
        }
        self.flows.insert(id, flow.clone());
        self.nodes.get_mut(&src).unwrap().flow_handler.add_generating(flow.clone());
        self.nodes.get_mut(&dst).unwrap().flow_handler.add_consuming(flow.clone());
        log_debug!(self, "new flow {} from node {} to node {} with demand {} Kbps", id, src, dst, demand.to_kbps());

        if src == dst {
            // delivered locally, no ports involved
            flow.set_throughput(demand);
        } else if !self.nodes[&src].routing.has_route(dst) {
            log_warn!(self, "no route from node {} to node {}, flow {} runs at zero throughput until the topology changes", src, dst, id);
        }
        self.signal(src);
        Ok(flow)
    }

    fn stop_flow(&mut self, id: FlowId) -> Result<()> {
        let flow = self.flows.get(&id).ok_or(Error::UnknownFlow(id))?.clone();
        if flow.is_stopped() {
            return Ok(());
        }
        log_debug!(self, "stopping flow {}", id);
        flow.mark_stopped();
        flow.set_demand(DataRate::ZERO);
        if flow.transmitter() == flow.destination() {
            flow.set_throughput(DataRate::ZERO);
        }
        self.signal(flow.transmitter());
        Ok(())
    }

    fn set_flow_demand(&mut self, id: FlowId, demand: DataRate) -> Result<()> {
        let flow = self.flows.get(&id).ok_or(Error::UnknownFlow(id))?.clone();
        flow.set_demand(demand);
        if flow.transmitter() == flow.destination() {
            flow.set_throughput(demand);
        }
        self.signal(flow.transmitter());
        Ok(())
    }

    /// Removes fully drained stopped flows from the registries. Runs only
    /// in the stable state, where every per-port entry of a stopped flow
    /// has already been purged by propagation.
    fn sweep_stopped_flows(&mut self) {
        let stopped: Vec<(FlowId, NodeId, NodeId)> = self
            .flows
            .values()
            .filter(|f| f.is_stopped())
            .map(|f| (f.id(), f.transmitter(), f.destination()))
            .collect();
        for (id, src, dst) in stopped {
            if let Some(node) = self.nodes.get_mut(&src) {
                node.flow_handler.remove_flow(id);
            }
            if let Some(node) = self.nodes.get_mut(&dst) {
                node.flow_handler.remove_flow(id);
            }
            self.flows.remove(&id);
        }
    }

    // Update propagation ----------------------------------------------------------------------------------------------

    /// Signals a node's update channel. Signals coalesce: a node already
    /// pending is not enqueued twice.
    fn signal(&mut self, id: NodeId) {
        if self.ready.insert(id) {
            self.nodes.get_mut(&id).unwrap().invalidator.invalidate();
        }
    }

    /// Signals every node; used after topology changes so routed and
    /// previously unroutable flows alike are re-evaluated.
    fn signal_all_nodes(&mut self) {
        if self.flows.is_empty() {
            return;
        }
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            self.signal(id);
        }
    }

    /// Runs one node's update cycle: plan against the immutable node, then
    /// apply rate writes locally and mirror them on peer ports, which
    /// signals the peers' update channels.
    fn run_update_cycle(&mut self, id: NodeId) {
        let plan = self.nodes[&id].plan_update(&self.flows);

        let mut peer_writes: Vec<(PortRef, FlowId, DataRate)> = Vec::new();
        let mut touched: BTreeSet<FlowId> = BTreeSet::new();
        {
            let node = self.nodes.get_mut(&id).unwrap();
            node.flow_handler.set_transit(plan.transit);
            for round in plan.rounds {
                let port = node.port_mut(round.port);
                port.set_arrival_order(round.arrival);
                port.record_fairness_round(round.contenders);
            }
            // Decreases first: a port whose capacity just shrank must drain
            // below the new limit before any allocation may grow.
            let mut changes = plan.rate_changes;
            changes.sort_by(|x, y| {
                let x_increase = x.2 > node.port(x.0).outgoing_rate(x.1);
                let y_increase = y.2 > node.port(y.0).outgoing_rate(y.1);
                x_increase.cmp(&y_increase)
            });
            for (port_idx, flow, rate) in changes {
                let port = node.port_mut(port_idx);
                port.set_outgoing_rate(flow, rate);
                touched.insert(flow);
                if let Some(peer) = port.peer() {
                    peer_writes.push((peer, flow, rate));
                }
            }
            // Refresh aggregates for changed flows, and reconcile entries
            // whose per-port rates vanished out of band (link teardown).
            touched.extend(node.flow_handler.outgoing().keys().copied());
            for &flow in &touched {
                let total = node.outgoing_rate_of(flow);
                node.flow_handler.set_outgoing_rate(flow, total);
            }
            let utilization = node.utilization();
            node.energy.recompute(utilization);
        }

        let mut to_signal = BTreeSet::new();
        for (peer, flow, rate) in peer_writes {
            let peer_node = self.nodes.get_mut(&peer.node).expect("peer port on unknown node");
            peer_node.port_mut(peer.port).set_incoming_rate(flow, rate);
            to_signal.insert(peer.node);
        }
        for (flow_id, throughput) in plan.throughput_updates {
            if let Some(flow) = self.flows.get(&flow_id) {
                flow.set_throughput(throughput);
            }
        }
        for peer in to_signal {
            self.signal(peer);
        }
    }

    /// Drains pending update channels, lowest node id first, until the
    /// network quiesces or the oscillation bound trips.
    fn drive_to_stability(&mut self) -> Result<()> {
        let bound = self.convergence_bound();
        let mut cycles = 0usize;
        while let Some(&id) = self.ready.iter().next() {
            self.ready.remove(&id);
            cycles += 1;
            if cycles > bound {
                // leave the node pending so the invalidation count stays
                // honest
                self.ready.insert(id);
                self.converged = false;
                log_warn!(self, "propagation did not quiesce within {} update cycles", bound);
                return Err(Error::ConvergenceTimeout { cycles });
            }
            log_trace!(self, "update cycle at node {}", id);
            self.run_update_cycle(id);
            if !self.ready.contains(&id) {
                self.nodes.get_mut(&id).unwrap().invalidator.validate();
            }
        }
        self.converged = true;
        self.sweep_stopped_flows();
        Ok(())
    }

    fn convergence_bound(&self) -> usize {
        self.convergence_bound_factor * self.flows.len().max(1) * self.nodes.len().max(1)
    }

    /// Discards all pending work: empties the update channels and resets
    /// the validator. Only used when tearing down and rebuilding a
    /// scenario.
    fn reset_propagation(&mut self) {
        self.ready.clear();
        self.adverts.clear();
        for node in self.nodes.values_mut() {
            node.invalidator.reset();
        }
        self.validator.reset();
        self.converged = true;
    }

    // Telemetry -------------------------------------------------------------------------------------------------------

    fn build_snapshot(&mut self) -> NetworkSnapshot {
        let now = self.clock.now();
        let delta = self.recorder.advance(
            now,
            self.nodes.iter().map(|(&id, n)| (id, n.energy.current_power())),
        );
        for flow in self.flows.values() {
            flow.record_transfer(flow.throughput() * delta);
        }

        let timestamp_ms = now.as_millis();
        let mut node_records = Vec::with_capacity(self.nodes.len());
        for (&id, node) in &self.nodes {
            let incoming_flows = node
                .ports()
                .iter()
                .flat_map(|p| p.incoming_flows().map(|(&f, _)| f))
                .collect::<BTreeSet<FlowId>>()
                .len();
            let ratios: Vec<f64> = node
                .flow_handler
                .generating()
                .values()
                .filter_map(|f| f.throughput_ratio())
                .collect();
            node_records.push(NodeRecord {
                timestamp_ms,
                node_id: id,
                incoming_flows,
                outgoing_flows: node.flow_handler.outgoing().len(),
                generating_flows: node.flow_handler.generating().len(),
                consuming_flows: node.flow_handler.consuming().len(),
                min_flow_throughput_ratio: ratios.iter().copied().reduce(f64::min),
                max_flow_throughput_ratio: ratios.iter().copied().reduce(f64::max),
                avg_flow_throughput_ratio: (!ratios.is_empty())
                    .then(|| ratios.iter().sum::<f64>() / ratios.len() as f64),
                node_throughput_mbps: node.total_outgoing_rate().to_mbps(),
                node_throughput_ratio: node
                    .total_outgoing_rate()
                    .checked_ratio(node.total_capacity()),
                power_draw_watts: node.energy.current_power().watts(),
                energy_consumed_joule: self.recorder.consumed_by(id).joules(),
            });
        }

        let flow_ratios: Vec<f64> = self.flows.values().filter_map(|f| f.throughput_ratio()).collect();
        NetworkSnapshot {
            timestamp_ms,
            num_of_nodes: self.nodes.len(),
            num_of_active_flows: self.flows.len(),
            avg_flow_throughput_ratio: (!flow_ratios.is_empty())
                .then(|| flow_ratios.iter().sum::<f64>() / flow_ratios.len() as f64),
            total_power_draw_watts: self
                .nodes
                .values()
                .map(|n| n.energy.current_power().watts())
                .sum(),
            total_energy_consumed_joule: self.recorder.total().joules(),
            converged: self.converged,
            node_records,
        }
    }
}

// Controller ----------------------------------------------------------------------------------------------------------

/// Public facade of the simulator.
///
/// Owns the [`Network`], allocates flow ids and exposes the stable API:
/// topology construction, flow control, stability and snapshots.
pub struct NetworkController {
    network: Network,
    default_power_model: Box<dyn PowerModel>,
    next_flow_id: FlowId,
}

impl std::fmt::Debug for NetworkController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkController")
            .field("next_flow_id", &self.next_flow_id)
            .finish_non_exhaustive()
    }
}

impl Default for NetworkController {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkController {
    /// Creates a controller over an empty network with max-min fairness.
    pub fn new() -> Self {
        Self::with_fairness(FairnessMode::MaxMin)
    }

    /// Creates a controller over an empty network with the given fairness
    /// policy; every node of the network shares the policy.
    pub fn with_fairness(fairness: FairnessMode) -> Self {
        Self {
            network: Network::new(fairness),
            default_power_model: Box::new(LinearPowerModel::new(
                DEFAULT_MAX_POWER_WATTS,
                DEFAULT_IDLE_POWER_WATTS,
            )),
            next_flow_id: 0,
        }
    }

    /// Builds a network from a topology specification.
    pub fn from_spec(spec: &TopologySpec, fairness: FairnessMode) -> Result<Self> {
        spec.validate()?;
        let mut controller = Self::with_fairness(fairness);
        let ids = spec.resolved_ids();
        for (node, &id) in spec.nodes.iter().zip(&ids) {
            let kind = match node.kind {
                NodeKindSpec::Switch => NodeKind::Switch,
                NodeKindSpec::CoreSwitch => NodeKind::CoreSwitch,
                NodeKindSpec::Host => NodeKind::Host,
            };
            let name = format!("{}-{}", kind.label(), id);
            controller.network.add_node(
                Some(id),
                name,
                kind,
                DataRate::from_kbps(node.port_speed),
                node.num_of_ports,
                controller.default_power_model.clone(),
            );
        }
        for link in &spec.links {
            controller.connect(link.a, link.b)?;
        }
        Ok(controller)
    }

    /// Builds a network from the JSON form of a topology specification.
    pub fn from_json(json: &str, fairness: FairnessMode) -> Result<Self> {
        Self::from_spec(&TopologySpec::from_json(json)?, fairness)
    }

    /// Read access to the network.
    pub fn network(&self) -> &Network {
        &self.network
    }

    // Topology --------------------------------------------------------------------------------------------------------

    /// Replaces the power model given to nodes added from now on.
    pub fn set_default_power_model(&mut self, model: Box<dyn PowerModel>) {
        self.default_power_model = model;
    }

    /// Adds a host with `num_of_ports` ports of `port_speed` each.
    pub fn add_host<S: Into<String>>(&mut self, name: S, port_speed: DataRate, num_of_ports: usize) -> NodeId {
        self.network.add_node(
            None,
            name.into(),
            NodeKind::Host,
            port_speed,
            num_of_ports,
            self.default_power_model.clone(),
        )
    }

    /// Adds a transit-only switch.
    pub fn add_switch<S: Into<String>>(&mut self, name: S, port_speed: DataRate, num_of_ports: usize) -> NodeId {
        self.network.add_node(
            None,
            name.into(),
            NodeKind::Switch,
            port_speed,
            num_of_ports,
            self.default_power_model.clone(),
        )
    }

    /// Adds a core switch, the only kind of node connectible to the
    /// internet.
    pub fn add_core_switch<S: Into<String>>(&mut self, name: S, port_speed: DataRate, num_of_ports: usize) -> NodeId {
        self.network.add_node(
            None,
            name.into(),
            NodeKind::CoreSwitch,
            port_speed,
            num_of_ports,
            self.default_power_model.clone(),
        )
    }

    /// Id of the abstract internet node.
    pub fn internet(&self) -> NodeId {
        INTERNET_ID
    }

    /// Pairs an unused port on each node into a bidirectional link and
    /// re-advertises routes from both sides.
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> Result<(PortRef, PortRef)> {
        self.network.connect(a, b)
    }

    /// Tears down the link attached to `port`, purging routes through it.
    pub fn disconnect(&mut self, port: PortRef) -> Result<()> {
        self.network.disconnect(port)
    }

    /// Changes the capacity of one port. Both link ends learn the new
    /// speed; a decrease permits the next fairness round to reduce
    /// allocations.
    pub fn set_link_speed(&mut self, port: PortRef, speed: DataRate) -> Result<()> {
        let node = self
            .network
            .nodes
            .get_mut(&port.node)
            .ok_or(Error::UnknownNode(port.node))?;
        if port.port >= node.ports().len() {
            return Err(Error::InvalidTopology(format!(
                "node {} has no port {}",
                port.node, port.port
            )));
        }
        node.port_mut(port.port).set_max_speed(speed);
        let peer = node.port(port.port).peer();
        if let Some(peer) = peer {
            self.network
                .nodes
                .get_mut(&peer.node)
                .unwrap()
                .port_mut(peer.port)
                .set_peer_speed(speed);
            self.network.signal(peer.node);
        }
        self.network.signal(port.node);
        Ok(())
    }

    // Flows -----------------------------------------------------------------------------------------------------------

    /// Starts a flow of `demand` from `src` to `dst` and signals the source
    /// node; call [`Self::await_stability`] to let it propagate.
    ///
    /// When the source has no route to the destination the flow is still
    /// registered and runs at zero throughput until the topology changes.
    pub fn start_flow(&mut self, src: NodeId, dst: NodeId, demand: DataRate) -> Result<NetFlow> {
        let id = self.allocate_flow_id();
        self.network.start_flow(id, src, dst, demand, None)
    }

    /// Same as [`Self::start_flow`], with a throughput observer installed
    /// before the first propagation.
    pub fn start_flow_with_handler(
        &mut self,
        src: NodeId,
        dst: NodeId,
        demand: DataRate,
        on_throughput_change: RateChangeHandler,
    ) -> Result<NetFlow> {
        let id = self.allocate_flow_id();
        self.network.start_flow(id, src, dst, demand, Some(on_throughput_change))
    }

    /// Starts a flow from the internet node towards `dst`.
    pub fn from_internet(
        &mut self,
        dst: NodeId,
        demand: DataRate,
        on_throughput_change: RateChangeHandler,
    ) -> Result<NetFlow> {
        self.start_flow_with_handler(INTERNET_ID, dst, demand, on_throughput_change)
    }

    /// Stops a flow: its demand drops to zero and, once propagation drains
    /// the remaining rates, every registry entry is purged.
    pub fn stop_flow(&mut self, id: FlowId) -> Result<()> {
        self.network.stop_flow(id)
    }

    /// Returns the flow registered under `id`, if still active.
    pub fn get_flow(&self, id: FlowId) -> Option<NetFlow> {
        self.network.flows.get(&id).cloned()
    }

    /// Changes a flow's demand and signals its source.
    pub fn set_flow_demand(&mut self, id: FlowId, demand: DataRate) -> Result<()> {
        self.network.set_flow_demand(id, demand)
    }

    /// Whether `src` currently knows a path to `dst`.
    pub fn has_route(&self, src: NodeId, dst: NodeId) -> Result<bool> {
        let node = self.network.node(src).ok_or(Error::UnknownNode(src))?;
        if !self.network.nodes.contains_key(&dst) {
            return Err(Error::UnknownNode(dst));
        }
        Ok(src == dst || node.routing.has_route(dst))
    }

    /// Resolves the equal-cost next-hop ports `src` currently uses towards
    /// `dst`, in the order the forwarding stage iterates them (peer node id
    /// ascending). A node reaches itself without leaving, so the list is
    /// empty for `src == dst`.
    ///
    /// Errors with [`Error::NoRoute`] when the routing table has no entry
    /// for the destination.
    pub fn route_towards(&self, src: NodeId, dst: NodeId) -> Result<Vec<PortRef>> {
        let node = self.network.node(src).ok_or(Error::UnknownNode(src))?;
        if !self.network.nodes.contains_key(&dst) {
            return Err(Error::UnknownNode(dst));
        }
        if src == dst {
            return Ok(Vec::new());
        }
        let entry = node.routing.lookup(dst).ok_or(Error::NoRoute { src, dst })?;
        let mut hops: Vec<PortRef> = entry
            .next_hops
            .iter()
            .map(|&port| PortRef { node: src, port })
            .collect();
        hops.sort_by_key(|r| (node.port(r.port).peer().map(|p| p.node), r.port));
        Ok(hops)
    }

    /// Registers an observer of one node's power transitions.
    pub fn add_power_observer(&mut self, node: NodeId, observer: PowerChangeHandler) -> Result<()> {
        self.network
            .nodes
            .get_mut(&node)
            .ok_or(Error::UnknownNode(node))?
            .energy_monitor_mut()
            .add_observer(observer);
        Ok(())
    }

    // Stability and telemetry -----------------------------------------------------------------------------------------

    /// Blocks until every node's update channel is drained. Idempotent:
    /// a second call returns without work. Errors if propagation exceeds
    /// the oscillation bound.
    pub fn await_stability(&mut self) -> Result<()> {
        self.network.drive_to_stability()
    }

    /// Runs `block` inside a must-be-stable region; any network mutation
    /// during the block is fatal.
    pub fn check_is_stable_while<R>(&self, block: impl FnOnce() -> R) -> R {
        self.network.validator.check_is_stable_while(block)
    }

    /// Awaits stability, then produces an immutable snapshot. If the
    /// propagation bound trips the snapshot is still produced, marked
    /// non-converged.
    pub fn snapshot(&mut self) -> NetworkSnapshot {
        let stable = self.network.drive_to_stability().is_ok();
        if stable {
            let validator = self.network.validator.clone();
            validator.check_is_stable_while(|| self.network.build_snapshot())
        } else {
            self.network.build_snapshot()
        }
    }

    /// Installs the wall-clock source used for energy integration and
    /// snapshot timestamps. Restarts the energy integrator at the new
    /// clock's current instant.
    pub fn set_instant_source(&mut self, clock: Rc<dyn InstantSource>) {
        self.network.clock = clock;
        self.network.recorder.restart_origin();
    }

    /// Overrides the multiplier of the convergence bound.
    pub fn set_convergence_bound_factor(&mut self, factor: usize) {
        assert!(factor > 0, "convergence bound factor must be positive");
        self.network.convergence_bound_factor = factor;
    }

    /// Discards all pending invalidations and queued work. Only for
    /// teardown-and-rebuild flows; regular operation never needs it.
    pub fn reset_propagation(&mut self) {
        self.network.reset_propagation();
    }

    fn allocate_flow_id(&mut self) -> FlowId {
        let id = self.next_flow_id;
        self.next_flow_id = self
            .next_flow_id
            .checked_add(1)
            .expect("flow id space exhausted");
        id
    }
}
