//! End-to-end network flows.

use std::cell::RefCell;
use std::rc::Rc;

use crate::node::NodeId;
use crate::units::{DataRate, DataSize};

/// Unique flow id, assigned monotonically at flow creation.
pub type FlowId = u64;

/// Synchronous observer of a flow rate change, invoked with
/// `(flow, old_rate, new_rate)`.
///
/// Handlers run inside the update loop and must not mutate the network.
pub type RateChangeHandler = Rc<dyn Fn(FlowId, DataRate, DataRate)>;

struct FlowState {
    demand: DataRate,
    throughput: DataRate,
    transferred: DataSize,
    stopped: bool,
    demand_handlers: Vec<RateChangeHandler>,
    throughput_handlers: Vec<RateChangeHandler>,
}

/// A rate-based end-to-end flow between two nodes.
///
/// The handle is cheaply clonable and shared between the network registry
/// and the per-node flow handlers. Demand is owned by the source side and
/// changed through [`NetworkController::set_flow_demand`]; throughput is
/// written by the destination node as propagation reaches it.
///
/// [`NetworkController::set_flow_demand`]: crate::network::NetworkController::set_flow_demand
#[derive(Clone)]
pub struct NetFlow {
    id: FlowId,
    transmitter: NodeId,
    destination: NodeId,
    state: Rc<RefCell<FlowState>>,
}

impl std::fmt::Debug for NetFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetFlow")
            .field("id", &self.id)
            .field("transmitter", &self.transmitter)
            .field("destination", &self.destination)
            .finish()
    }
}

impl NetFlow {
    pub(crate) fn new(id: FlowId, transmitter: NodeId, destination: NodeId, demand: DataRate) -> Self {
        Self {
            id,
            transmitter,
            destination,
            state: Rc::new(RefCell::new(FlowState {
                demand,
                throughput: DataRate::ZERO,
                transferred: DataSize::ZERO,
                stopped: false,
                demand_handlers: Vec::new(),
                throughput_handlers: Vec::new(),
            })),
        }
    }

    /// Unique flow id.
    pub fn id(&self) -> FlowId {
        self.id
    }

    /// The node generating the flow.
    pub fn transmitter(&self) -> NodeId {
        self.transmitter
    }

    /// The node consuming the flow.
    pub fn destination(&self) -> NodeId {
        self.destination
    }

    /// The rate the source wishes to send.
    pub fn demand(&self) -> DataRate {
        self.state.borrow().demand
    }

    /// The rate actually delivered to the destination.
    pub fn throughput(&self) -> DataRate {
        self.state.borrow().throughput
    }

    /// Throughput over demand, `None` when demand is zero.
    pub fn throughput_ratio(&self) -> Option<f64> {
        let state = self.state.borrow();
        state.throughput.checked_ratio(state.demand)
    }

    /// Total amount of data delivered so far.
    pub fn transferred(&self) -> DataSize {
        self.state.borrow().transferred
    }

    /// Registers an observer of demand changes.
    pub fn add_demand_handler(&self, handler: RateChangeHandler) {
        self.state.borrow_mut().demand_handlers.push(handler);
    }

    /// Registers an observer of throughput changes.
    pub fn add_throughput_handler(&self, handler: RateChangeHandler) {
        self.state.borrow_mut().throughput_handlers.push(handler);
    }

    pub(crate) fn set_demand(&self, rate: DataRate) {
        let (old, handlers) = {
            let mut state = self.state.borrow_mut();
            let old = state.demand;
            if old.approx_eq(rate) {
                return;
            }
            state.demand = rate;
            (old, state.demand_handlers.clone())
        };
        for handler in handlers {
            handler(self.id, old, rate);
        }
    }

    pub(crate) fn set_throughput(&self, rate: DataRate) {
        let (old, handlers) = {
            let mut state = self.state.borrow_mut();
            let old = state.throughput;
            if old.approx_eq(rate) {
                return;
            }
            state.throughput = rate;
            (old, state.throughput_handlers.clone())
        };
        for handler in handlers {
            handler(self.id, old, rate);
        }
    }

    pub(crate) fn record_transfer(&self, delta: DataSize) {
        self.state.borrow_mut().transferred += delta;
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.borrow_mut().stopped = true;
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state.borrow().stopped
    }
}
