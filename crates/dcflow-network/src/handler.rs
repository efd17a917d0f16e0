//! Per-node flow registries.

use std::collections::{BTreeMap, BTreeSet};

use crate::flow::{FlowId, NetFlow};
use crate::units::DataRate;

/// Per-flow aggregate rate currently leaving a node across all its ports.
#[derive(Clone, Copy, Debug)]
pub struct OutFlow {
    /// The flow.
    pub flow: FlowId,
    /// Aggregate outgoing rate.
    pub rate: DataRate,
}

/// Registry of the flows a node participates in.
///
/// The four indices are disjoint in role: `generating` holds flows sourced
/// here, `consuming` flows terminating here (the reference is kept so the
/// destination can write throughput), `outgoing` the per-flow aggregate
/// leaving the node, and `transit` the flows passing through.
#[derive(Default)]
pub struct FlowHandler {
    generating: BTreeMap<FlowId, NetFlow>,
    consuming: BTreeMap<FlowId, NetFlow>,
    outgoing: BTreeMap<FlowId, OutFlow>,
    transit: BTreeSet<FlowId>,
}

impl FlowHandler {
    /// Flows sourced at this node.
    pub fn generating(&self) -> &BTreeMap<FlowId, NetFlow> {
        &self.generating
    }

    /// Flows terminating at this node.
    pub fn consuming(&self) -> &BTreeMap<FlowId, NetFlow> {
        &self.consuming
    }

    /// Aggregate rates currently leaving this node, per flow.
    pub fn outgoing(&self) -> &BTreeMap<FlowId, OutFlow> {
        &self.outgoing
    }

    /// Flows passing through this node.
    pub fn transit(&self) -> &BTreeSet<FlowId> {
        &self.transit
    }

    pub(crate) fn add_generating(&mut self, flow: NetFlow) {
        self.generating.insert(flow.id(), flow);
    }

    pub(crate) fn add_consuming(&mut self, flow: NetFlow) {
        self.consuming.insert(flow.id(), flow);
    }

    pub(crate) fn remove_flow(&mut self, flow: FlowId) {
        self.generating.remove(&flow);
        self.consuming.remove(&flow);
        self.outgoing.remove(&flow);
        self.transit.remove(&flow);
    }

    pub(crate) fn set_transit(&mut self, transit: BTreeSet<FlowId>) {
        self.transit = transit;
    }

    pub(crate) fn set_outgoing_rate(&mut self, flow: FlowId, rate: DataRate) {
        if rate.is_zero() {
            self.outgoing.remove(&flow);
        } else {
            self.outgoing.insert(flow, OutFlow { flow, rate });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_disjoint_for_regular_flows() {
        let mut handler = FlowHandler::default();
        let flow = NetFlow::new(1, 0, 1, DataRate::from_kbps(100.));
        handler.add_generating(flow.clone());
        assert!(handler.generating().contains_key(&1));
        assert!(!handler.consuming().contains_key(&1));

        handler.set_outgoing_rate(1, DataRate::from_kbps(100.));
        assert_eq!(handler.outgoing().len(), 1);
        handler.set_outgoing_rate(1, DataRate::ZERO);
        assert!(handler.outgoing().is_empty());

        handler.remove_flow(1);
        assert!(handler.generating().is_empty());
    }
}
