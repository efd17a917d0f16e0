//! Topology specification.
//!
//! Networks can be described as JSON documents listing nodes and links:
//!
//! ```json
//! {
//!     "nodes": [
//!         {"kind": "host", "port_speed": 1000.0, "num_of_ports": 1},
//!         {"kind": "switch", "id": 10, "port_speed": 1000.0, "num_of_ports": 4}
//!     ],
//!     "links": [{"a": 0, "b": 10}]
//! }
//! ```
//!
//! Port speeds are in Kbps. Missing node ids are assigned the smallest
//! unused values.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::node::NodeId;

/// Kind of a node in a topology specification.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKindSpec {
    /// Transit-only switch.
    Switch,
    /// Switch connectible to the internet node.
    CoreSwitch,
    /// End host.
    Host,
}

/// One node of a topology specification.
#[derive(Clone, Debug, Deserialize)]
pub struct NodeSpec {
    /// Node kind.
    pub kind: NodeKindSpec,
    /// Explicit node id; auto-assigned when missing.
    #[serde(default)]
    pub id: Option<NodeId>,
    /// Port speed in Kbps.
    pub port_speed: f64,
    /// Number of ports.
    pub num_of_ports: usize,
}

/// One bidirectional link of a topology specification.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct LinkSpec {
    /// One endpoint.
    pub a: NodeId,
    /// The other endpoint.
    pub b: NodeId,
}

/// A deserialized topology specification.
#[derive(Clone, Debug, Deserialize)]
pub struct TopologySpec {
    /// Nodes of the network.
    pub nodes: Vec<NodeSpec>,
    /// Links between them.
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

impl TopologySpec {
    /// Parses a specification from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: TopologySpec = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for node in &self.nodes {
            if let Some(id) = node.id {
                if id == crate::node::INTERNET_ID {
                    return Err(Error::InvalidTopology(format!(
                        "node id {id} is reserved for the internet node"
                    )));
                }
                if !seen.insert(id) {
                    return Err(Error::InvalidTopology(format!("duplicate node id {id}")));
                }
            }
            if node.num_of_ports == 0 {
                return Err(Error::InvalidTopology(
                    "every node needs at least one port".into(),
                ));
            }
            if node.port_speed <= 0. {
                return Err(Error::InvalidTopology("port speed must be positive".into()));
            }
        }
        Ok(())
    }

    /// Resolves explicit and auto-assigned node ids, in declaration order.
    pub(crate) fn resolved_ids(&self) -> Vec<NodeId> {
        let taken: std::collections::BTreeSet<NodeId> =
            self.nodes.iter().filter_map(|n| n.id).collect();
        let mut next_auto = 0;
        self.nodes
            .iter()
            .map(|node| match node.id {
                Some(id) => id,
                None => {
                    while taken.contains(&next_auto) {
                        next_auto += 1;
                    }
                    let id = next_auto;
                    next_auto += 1;
                    id
                }
            })
            .collect()
    }
}
