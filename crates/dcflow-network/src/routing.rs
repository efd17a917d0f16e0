//! Shortest-path routing tables.
//!
//! Each node keeps, per destination, the set of ports that lie on a
//! minimum-hop path. Tables are driven by route advertisements
//! `(destination, distance, via_port)` exchanged over links: a strictly
//! closer advertisement replaces the next-hop set, an equally close one
//! joins it (enabling ECMP), a farther one is ignored.

use std::collections::{BTreeMap, BTreeSet};

use crate::node::NodeId;
use crate::port::PortIndex;

/// A route advertisement as seen by the receiving node.
#[derive(Clone, Copy, Debug)]
pub struct Advertisement {
    /// Node receiving the advertisement.
    pub to: NodeId,
    /// The receiving node's port the advertisement arrived on.
    pub via_port: PortIndex,
    /// Advertised destination.
    pub dst: NodeId,
    /// The sender's distance to the destination, in hops.
    pub distance: u32,
}

/// Next hops towards one destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    /// Hop distance to the destination.
    pub distance: u32,
    /// Local ports on minimum-hop paths; never empty.
    pub next_hops: BTreeSet<PortIndex>,
}

/// Outcome of applying one advertisement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteUpdate {
    /// The distance improved; neighbors should hear about it.
    Improved,
    /// An equal-cost next hop joined an existing entry.
    Extended,
    /// The advertisement was no better than the current entry.
    Ignored,
}

/// Per-node map from destination to equal-cost next-hop ports.
#[derive(Default)]
pub struct RoutingTable {
    routes: BTreeMap<NodeId, RouteEntry>,
}

impl RoutingTable {
    /// Returns the route entry for `dst`, if any.
    pub fn lookup(&self, dst: NodeId) -> Option<&RouteEntry> {
        self.routes.get(&dst)
    }

    /// Whether any path to `dst` is known.
    pub fn has_route(&self, dst: NodeId) -> bool {
        self.routes.contains_key(&dst)
    }

    /// Known destinations with their entries, in ascending id order.
    pub fn destinations(&self) -> impl Iterator<Item = (&NodeId, &RouteEntry)> {
        self.routes.iter()
    }

    /// Number of known destinations.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Applies an advertisement for `dst` at `distance` hops (already
    /// including the link the advertisement crossed) through local port
    /// `via`.
    pub fn accept(&mut self, dst: NodeId, distance: u32, via: PortIndex) -> RouteUpdate {
        match self.routes.get_mut(&dst) {
            None => {
                self.routes.insert(
                    dst,
                    RouteEntry {
                        distance,
                        next_hops: BTreeSet::from([via]),
                    },
                );
                RouteUpdate::Improved
            }
            Some(entry) if distance < entry.distance => {
                entry.distance = distance;
                entry.next_hops = BTreeSet::from([via]);
                RouteUpdate::Improved
            }
            Some(entry) if distance == entry.distance => {
                if entry.next_hops.insert(via) {
                    RouteUpdate::Extended
                } else {
                    RouteUpdate::Ignored
                }
            }
            Some(_) => RouteUpdate::Ignored,
        }
    }

    /// Removes every next hop through `port`; entries left without next hops
    /// are dropped entirely. Returns the destinations that lost their route.
    pub fn purge_port(&mut self, port: PortIndex) -> Vec<NodeId> {
        let mut lost = Vec::new();
        self.routes.retain(|dst, entry| {
            entry.next_hops.remove(&port);
            if entry.next_hops.is_empty() {
                lost.push(*dst);
                false
            } else {
                true
            }
        });
        lost
    }

    /// Discards the whole table (topology rebuild).
    pub fn clear(&mut self) {
        self.routes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closer_advertisement_replaces_next_hops() {
        let mut table = RoutingTable::default();
        assert_eq!(table.accept(5, 3, 0), RouteUpdate::Improved);
        assert_eq!(table.accept(5, 2, 1), RouteUpdate::Improved);
        let entry = table.lookup(5).unwrap();
        assert_eq!(entry.distance, 2);
        assert_eq!(entry.next_hops, BTreeSet::from([1]));
    }

    #[test]
    fn equal_cost_advertisement_extends_entry() {
        let mut table = RoutingTable::default();
        table.accept(5, 2, 0);
        assert_eq!(table.accept(5, 2, 1), RouteUpdate::Extended);
        assert_eq!(table.accept(5, 2, 1), RouteUpdate::Ignored);
        assert_eq!(table.lookup(5).unwrap().next_hops, BTreeSet::from([0, 1]));
    }

    #[test]
    fn farther_advertisement_is_ignored() {
        let mut table = RoutingTable::default();
        table.accept(5, 2, 0);
        assert_eq!(table.accept(5, 4, 1), RouteUpdate::Ignored);
        assert_eq!(table.lookup(5).unwrap().next_hops, BTreeSet::from([0]));
    }

    #[test]
    fn purging_last_next_hop_drops_destination() {
        let mut table = RoutingTable::default();
        table.accept(5, 2, 0);
        table.accept(5, 2, 1);
        table.accept(6, 1, 0);
        assert_eq!(table.purge_port(0), vec![6]);
        assert!(table.has_route(5));
        assert!(!table.has_route(6));
    }
}
