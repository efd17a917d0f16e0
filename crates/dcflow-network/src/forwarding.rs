//! Forwarding policies.
//!
//! A forwarding policy partitions the demand of one flow across the
//! candidate next-hop ports reported by the routing table. The subsequent
//! fairness round may still reduce per-flow allocations on oversubscribed
//! ports; forwarding only decides the intended split.

use crate::port::PortIndex;
use crate::units::DataRate;

/// Splits one flow's demand across its candidate next hops.
///
/// `next_hops` is sorted by the peer node's id, so the produced mapping is
/// reproducible across runs.
pub trait ForwardingPolicy {
    /// Returns per-port intended demand; the rates sum to `demand`.
    fn split(&self, demand: DataRate, next_hops: &[PortIndex]) -> Vec<(PortIndex, DataRate)>;
}

/// Equal-cost multi-path forwarding with a static equal split.
///
/// The split is independent of current port load; oversubscription is left
/// to the fairness policy.
#[derive(Default)]
pub struct StaticEcmp;

impl ForwardingPolicy for StaticEcmp {
    fn split(&self, demand: DataRate, next_hops: &[PortIndex]) -> Vec<(PortIndex, DataRate)> {
        if next_hops.is_empty() {
            return Vec::new();
        }
        let share = demand / next_hops.len() as f64;
        next_hops.iter().map(|&port| (port, share)).collect()
    }
}
