//! Fairness policies.
//!
//! Given the flows contending for one outgoing port and the port capacity,
//! a fairness policy assigns each flow a throughput not exceeding its
//! demand, with the total not exceeding capacity. Ties are broken by flow
//! id ascending so recomputations are reproducible.

use std::collections::BTreeMap;

use crate::flow::FlowId;
use crate::units::DataRate;

/// Demand of one flow on one port, as produced by the forwarding stage.
#[derive(Clone, Copy, Debug)]
pub struct FlowDemand {
    /// Contending flow.
    pub flow: FlowId,
    /// Intended rate on this port.
    pub demand: DataRate,
}

/// Everything a fairness policy may consult for one port.
pub struct FairnessContext<'a> {
    /// Port capacity in the sending direction.
    pub capacity: DataRate,
    /// Contending flows with their demands, flow id ascending.
    pub demands: &'a [FlowDemand],
    /// Stable arrival order of the contending flows at this port.
    pub arrival_order: &'a [FlowId],
    /// Allocations produced by the previous round (current port rates).
    pub previous: &'a BTreeMap<FlowId, DataRate>,
    /// Whether the port capacity decreased since the previous round.
    pub capacity_decreased: bool,
    /// Whether the set of contending flows changed since the previous round.
    pub contenders_changed: bool,
}

/// Reconciles aggregate per-port demand with port capacity.
pub trait FairnessPolicy {
    /// Returns per-flow allocations with `alloc <= demand` for each flow and
    /// the total not exceeding `capacity`.
    fn allocate(&self, ctx: &FairnessContext) -> BTreeMap<FlowId, DataRate>;
}

/// Selects the fairness policy used by every node of a network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FairnessMode {
    /// Max-min fairness without forced reductions.
    #[default]
    MaxMin,
    /// Strict arrival-order priority.
    FirstComeFirstServed,
}

impl FairnessMode {
    pub(crate) fn build(&self) -> Box<dyn FairnessPolicy> {
        match self {
            FairnessMode::MaxMin => Box::new(MaxMinFairness),
            FairnessMode::FirstComeFirstServed => Box::new(FirstComeFirstServed),
        }
    }
}

// FCFS ----------------------------------------------------------------------------------------------------------------

/// Flows are served in the order they first contended for the port: each
/// gets its full demand while capacity lasts, the flow at the boundary gets
/// the residual, later flows get nothing.
#[derive(Default)]
pub struct FirstComeFirstServed;

impl FairnessPolicy for FirstComeFirstServed {
    fn allocate(&self, ctx: &FairnessContext) -> BTreeMap<FlowId, DataRate> {
        let demand_of: BTreeMap<FlowId, DataRate> =
            ctx.demands.iter().map(|d| (d.flow, d.demand)).collect();
        let mut allocations = BTreeMap::new();
        let mut remaining = ctx.capacity;
        for flow in ctx.arrival_order {
            let Some(&demand) = demand_of.get(flow) else {
                continue;
            };
            let granted = demand.min(remaining);
            remaining = remaining.saturating_sub(granted);
            if !granted.is_zero() {
                allocations.insert(*flow, granted);
            }
        }
        allocations
    }
}

// Max-min -------------------------------------------------------------------------------------------------------------

/// Classical max-min fairness with damped reductions.
///
/// When the port capacity decreased or the set of contending flows changed,
/// allocations are recomputed from scratch by progressive filling. Otherwise
/// the previous allocations (clamped to the current demands) are kept as a
/// floor and only the residual capacity is distributed, so an allocation
/// never shrinks merely because a neighbor's demand grew. This keeps
/// multi-hop propagation from oscillating.
#[derive(Default)]
pub struct MaxMinFairness;

impl MaxMinFairness {
    /// Progressive filling: grants are handed out in ascending order of
    /// requested amount, each flow receiving at most an equal share of what
    /// remains. Flow id breaks ties.
    fn water_fill(requests: &[(FlowId, DataRate)], capacity: DataRate) -> BTreeMap<FlowId, DataRate> {
        let mut order: Vec<(FlowId, DataRate)> = requests.to_vec();
        order.sort_by(|a, b| {
            a.1.bits_per_sec()
                .total_cmp(&b.1.bits_per_sec())
                .then(a.0.cmp(&b.0))
        });
        let mut grants = BTreeMap::new();
        let mut remaining = capacity;
        let mut left = order.len();
        for (flow, request) in order {
            let share = remaining / left as f64;
            let granted = request.min(share);
            remaining = remaining.saturating_sub(granted);
            left -= 1;
            grants.insert(flow, granted);
        }
        grants
    }
}

impl FairnessPolicy for MaxMinFairness {
    fn allocate(&self, ctx: &FairnessContext) -> BTreeMap<FlowId, DataRate> {
        if ctx.capacity_decreased || ctx.contenders_changed {
            let requests: Vec<(FlowId, DataRate)> =
                ctx.demands.iter().map(|d| (d.flow, d.demand)).collect();
            let mut allocations = Self::water_fill(&requests, ctx.capacity);
            allocations.retain(|_, rate| !rate.is_zero());
            return allocations;
        }

        // Same contenders on an intact link: keep prior allocations as a
        // floor and water-fill only the spare capacity.
        let mut base = BTreeMap::new();
        let mut used = DataRate::ZERO;
        for d in ctx.demands {
            let floor = ctx
                .previous
                .get(&d.flow)
                .copied()
                .unwrap_or(DataRate::ZERO)
                .min(d.demand);
            used += floor;
            base.insert(d.flow, floor);
        }
        let residual = ctx.capacity.saturating_sub(used);
        let requests: Vec<(FlowId, DataRate)> = ctx
            .demands
            .iter()
            .filter_map(|d| {
                let floor = base[&d.flow];
                let want = d.demand.saturating_sub(floor);
                (!want.is_zero()).then_some((d.flow, want))
            })
            .collect();
        if !requests.is_empty() && !residual.is_zero() {
            for (flow, extra) in Self::water_fill(&requests, residual) {
                *base.get_mut(&flow).unwrap() += extra;
            }
        }
        base.retain(|_, rate| !rate.is_zero());
        base
    }
}
