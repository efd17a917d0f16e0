//! A library for simulating data-center network flows. It models end-to-end
//! data flows traversing a graph of switches, hosts and an abstract internet
//! node, computes per-link throughput under configurable fairness policies
//! and propagates updates until the network quiesces.
//!
//! Rates are fluid: there are no packets, only per-flow demands reconciled
//! with link capacities. Each node runs an update cycle that combines a
//! [`ForwardingPolicy`](crate::forwarding::ForwardingPolicy) (partitioning a
//! flow's demand across equal-cost next hops) with a
//! [`FairnessPolicy`](crate::fairness::FairnessPolicy) (fitting the
//! aggregate demand of a port into its capacity); rate writes ripple to
//! peer nodes through coalescing update channels until every channel is
//! drained, which the [`StabilityValidator`](crate::stability::StabilityValidator)
//! exposes as the stable state.
//!
//! ## Fairness policies
//!
//! - [`MaxMinFairness`](crate::fairness::MaxMinFairness): classical max-min
//!   allocation, damped so that an allocation is only reduced when the
//!   port's capacity shrank or the set of contending flows changed.
//! - [`FirstComeFirstServed`](crate::fairness::FirstComeFirstServed): flows
//!   are served in arrival order; late flows get what is left.
//!
//! ## Example
//!
//! ```rust
//! use dcflow_network::network::NetworkController;
//! use dcflow_network::units::DataRate;
//!
//! let mut controller = NetworkController::new();
//! let h1 = controller.add_host("h1", DataRate::from_kbps(1000.), 1);
//! let h2 = controller.add_host("h2", DataRate::from_kbps(1000.), 1);
//! let s = controller.add_switch("s", DataRate::from_kbps(1000.), 4);
//! controller.connect(h1, s).unwrap();
//! controller.connect(h2, s).unwrap();
//!
//! let flow = controller.start_flow(h1, h2, DataRate::from_kbps(500.)).unwrap();
//! controller.await_stability().unwrap();
//! assert!(flow.throughput().approx_eq(DataRate::from_kbps(500.)));
//! ```

#![warn(missing_docs)]

pub mod energy;
pub mod error;
pub mod fairness;
pub mod flow;
pub mod forwarding;
pub mod handler;
pub mod log;
pub mod network;
pub mod node;
pub mod port;
pub mod routing;
pub mod snapshot;
pub mod stability;
pub mod topology;
pub mod units;

pub use colored;

pub use error::{Error, Result};
pub use fairness::FairnessMode;
pub use flow::{FlowId, NetFlow};
pub use network::{Network, NetworkController};
pub use node::{Node, NodeId, NodeKind, INTERNET_ID};
pub use port::{Port, PortRef};
pub use snapshot::{NetworkSnapshot, NodeRecord};
pub use units::{DataRate, DataSize, Energy, Power, TimeDelta, TimePoint, EPSILON};
