//! Network ports.
//!
//! A port is one side of a full-duplex link. It tracks, per flow, the rate
//! this side is sending and the rate it is receiving; the two directions are
//! capped independently by the link speed. Ports are addressed by
//! [`PortRef`] keys instead of pointers because the port/peer relationship
//! is cyclic.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::flow::FlowId;
use crate::node::NodeId;
use crate::units::DataRate;

/// Index of a port within its owning node.
pub type PortIndex = usize;

/// Arena key of a port: owning node plus port index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PortRef {
    /// Owning node.
    pub node: NodeId,
    /// Port index within the node.
    pub port: PortIndex,
}

/// One side of a full-duplex link.
pub struct Port {
    index: PortIndex,
    max_speed: DataRate,
    peer: Option<PortRef>,
    // Capacity of the port on the other end, cached at link setup. The
    // sending direction is capped by the slower of the two sides.
    peer_speed: DataRate,
    outgoing_rate_of: BTreeMap<FlowId, DataRate>,
    incoming_rate_of: BTreeMap<FlowId, DataRate>,
    // Order in which flows first contended for this port; drives FCFS and
    // survives recomputation.
    arrival_order: Vec<FlowId>,
    // Capacity and contender set seen by the last fairness round, used to
    // decide whether allocations may be reduced.
    last_fair_capacity: DataRate,
    last_contenders: BTreeSet<FlowId>,
}

impl Port {
    pub(crate) fn new(index: PortIndex, max_speed: DataRate) -> Self {
        Self {
            index,
            max_speed,
            peer: None,
            peer_speed: DataRate::UNLIMITED,
            outgoing_rate_of: BTreeMap::new(),
            incoming_rate_of: BTreeMap::new(),
            arrival_order: Vec::new(),
            last_fair_capacity: max_speed,
            last_contenders: BTreeSet::new(),
        }
    }

    /// Port index within the owning node.
    pub fn index(&self) -> PortIndex {
        self.index
    }

    /// Link capacity. Each direction is independently capped by this value.
    pub fn max_speed(&self) -> DataRate {
        self.max_speed
    }

    pub(crate) fn set_max_speed(&mut self, speed: DataRate) {
        self.max_speed = speed;
    }

    /// The port on the other end of the link, if connected.
    pub fn peer(&self) -> Option<PortRef> {
        self.peer
    }

    /// Whether the port is wired to a peer.
    pub fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    pub(crate) fn set_peer(&mut self, peer: Option<PortRef>) {
        self.peer = peer;
    }

    pub(crate) fn set_peer_speed(&mut self, speed: DataRate) {
        self.peer_speed = speed;
    }

    /// Capacity available to this side's traffic: the slower of the two
    /// link ends.
    pub fn effective_capacity(&self) -> DataRate {
        self.max_speed.min(self.peer_speed)
    }

    /// The rate this port is currently sending for `flow`.
    pub fn outgoing_rate(&self, flow: FlowId) -> DataRate {
        self.outgoing_rate_of.get(&flow).copied().unwrap_or(DataRate::ZERO)
    }

    /// The rate this port is currently receiving for `flow`.
    pub fn incoming_rate(&self, flow: FlowId) -> DataRate {
        self.incoming_rate_of.get(&flow).copied().unwrap_or(DataRate::ZERO)
    }

    /// Sum of all outgoing per-flow rates.
    pub fn total_outgoing_rate(&self) -> DataRate {
        self.outgoing_rate_of.values().copied().sum()
    }

    /// Sum of all incoming per-flow rates.
    pub fn total_incoming_rate(&self) -> DataRate {
        self.incoming_rate_of.values().copied().sum()
    }

    /// Capacity left in the sending direction.
    pub fn residual_out_capacity(&self) -> DataRate {
        self.max_speed.saturating_sub(self.total_outgoing_rate())
    }

    /// Capacity left in the receiving direction.
    pub fn residual_in_capacity(&self) -> DataRate {
        self.max_speed.saturating_sub(self.total_incoming_rate())
    }

    /// Flows currently sent through this port.
    pub fn outgoing_flows(&self) -> impl Iterator<Item = (&FlowId, &DataRate)> {
        self.outgoing_rate_of.iter()
    }

    /// Flows currently received on this port.
    pub fn incoming_flows(&self) -> impl Iterator<Item = (&FlowId, &DataRate)> {
        self.incoming_rate_of.iter()
    }

    /// Sets this side's sending rate for one flow. A zero rate purges the
    /// entry. The caller must have reconciled aggregate demand with capacity
    /// through the fairness policy first; a rate increase that pushes the
    /// total past `max_speed` is an unrecoverable invariant violation.
    /// (Decreases are exempt so that a batch of writes can drain an
    /// overloaded port after its capacity shrank.)
    pub(crate) fn set_outgoing_rate(&mut self, flow: FlowId, rate: DataRate) {
        if rate.is_zero() {
            self.outgoing_rate_of.remove(&flow);
            return;
        }
        let old = self.outgoing_rate(flow);
        self.outgoing_rate_of.insert(flow, rate);
        if rate > old {
            let total = self.total_outgoing_rate();
            assert!(
                total <= self.max_speed * (1. + crate::units::EPSILON) + DataRate::from_bits_per_sec(crate::units::EPSILON),
                "port {} capacity exceeded: {} > {} bit/s",
                self.index,
                total.bits_per_sec(),
                self.max_speed.bits_per_sec()
            );
        }
    }

    /// Mirrors the peer's outgoing write on the receiving side.
    pub(crate) fn set_incoming_rate(&mut self, flow: FlowId, rate: DataRate) {
        if rate.is_zero() {
            self.incoming_rate_of.remove(&flow);
        } else {
            self.incoming_rate_of.insert(flow, rate);
        }
    }

    pub(crate) fn outgoing_map(&self) -> &BTreeMap<FlowId, DataRate> {
        &self.outgoing_rate_of
    }

    /// Stable FCFS arrival order of the currently contending flows.
    pub fn arrival_order(&self) -> &[FlowId] {
        &self.arrival_order
    }

    /// Replaces the arrival order with the given contending flows; existing
    /// positions are preserved by the caller, newly contending flows arrive
    /// at the back.
    pub(crate) fn set_arrival_order(&mut self, order: Vec<FlowId>) {
        self.arrival_order = order;
    }

    pub(crate) fn capacity_decreased_since_last_round(&self) -> bool {
        self.effective_capacity() < self.last_fair_capacity
            && !self.effective_capacity().approx_eq(self.last_fair_capacity)
    }

    pub(crate) fn contenders_changed(&self, contenders: &BTreeSet<FlowId>) -> bool {
        *contenders != self.last_contenders
    }

    pub(crate) fn record_fairness_round(&mut self, contenders: BTreeSet<FlowId>) {
        self.last_fair_capacity = self.effective_capacity();
        self.last_contenders = contenders;
    }

    /// Drops all per-flow state, used when the link is torn down.
    pub(crate) fn reset_link_state(&mut self) {
        self.peer_speed = DataRate::UNLIMITED;
        self.outgoing_rate_of.clear();
        self.incoming_rate_of.clear();
        self.arrival_order.clear();
        self.last_contenders.clear();
        self.last_fair_capacity = self.max_speed;
    }
}
