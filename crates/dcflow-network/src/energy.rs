//! Power observation and energy accounting.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use dcflow_models::PowerModel;

use crate::node::NodeId;
use crate::units::{Energy, Power, TimeDelta, TimePoint};

/// Source of wall-clock instants, installed by the outer simulation driver.
///
/// The recorder integrates power over the time reported here, so the source
/// is expected to advance only while the network is stable (the fluid model
/// treats propagation as instantaneous).
pub trait InstantSource {
    /// Current instant.
    fn now(&self) -> TimePoint;
}

/// An instant source advanced by hand, for tests and step-driven harnesses.
#[derive(Default)]
pub struct ManualClock {
    now_ms: Cell<f64>,
}

impl ManualClock {
    /// Creates a clock starting at the given instant.
    pub fn new(start_ms: f64) -> Self {
        Self {
            now_ms: Cell::new(start_ms),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, delta_ms: f64) {
        assert!(delta_ms >= 0., "clock must be monotonic");
        self.now_ms.set(self.now_ms.get() + delta_ms);
    }
}

impl InstantSource for ManualClock {
    fn now(&self) -> TimePoint {
        TimePoint::from_millis(self.now_ms.get())
    }
}

/// Observer of a node's power transitions, invoked with `(old, new)`.
pub type PowerChangeHandler = Rc<dyn Fn(Power, Power)>;

/// Observes one node's state transitions and recomputes its instantaneous
/// power draw through a pluggable model.
pub struct EnergyMonitor {
    model: Box<dyn PowerModel>,
    current_power: Power,
    observers: Vec<PowerChangeHandler>,
}

impl EnergyMonitor {
    pub(crate) fn new(model: Box<dyn PowerModel>) -> Self {
        Self {
            model,
            current_power: Power::ZERO,
            observers: Vec::new(),
        }
    }

    /// The power draw computed by the last update cycle.
    pub fn current_power(&self) -> Power {
        self.current_power
    }

    /// Registers an observer of power transitions.
    pub fn add_observer(&mut self, observer: PowerChangeHandler) {
        self.observers.push(observer);
    }

    /// Recomputes power from the node's current utilization; observers see
    /// the old/new pair when the value moved.
    pub(crate) fn recompute(&mut self, utilization: f64) {
        let new = Power::from_watts(self.model.get_power(utilization));
        if new.approx_eq(self.current_power) {
            return;
        }
        let old = self.current_power;
        self.current_power = new;
        for observer in &self.observers {
            observer(old, new);
        }
    }
}

/// Integrates per-node power over wall time to produce consumed energy.
#[derive(Default)]
pub struct EnergyRecorder {
    last_sample: Option<TimePoint>,
    consumed: BTreeMap<NodeId, Energy>,
    total: Energy,
}

impl EnergyRecorder {
    /// Advances the integrator to `now`, charging each node its current
    /// power over the elapsed span. Returns the span covered.
    pub(crate) fn advance(
        &mut self,
        now: TimePoint,
        powers: impl Iterator<Item = (NodeId, Power)>,
    ) -> TimeDelta {
        let delta = match self.last_sample {
            Some(last) => (now - last).max_zero(),
            None => TimeDelta::ZERO,
        };
        self.last_sample = Some(now);
        if delta > TimeDelta::ZERO {
            for (node, power) in powers {
                let energy = power * delta;
                *self.consumed.entry(node).or_default() += energy;
                self.total += energy;
            }
        }
        delta
    }

    /// Forgets the last sample so integration restarts at the next
    /// advance; accumulated energy is kept.
    pub(crate) fn restart_origin(&mut self) {
        self.last_sample = None;
    }

    /// Energy consumed by one node so far.
    pub fn consumed_by(&self, node: NodeId) -> Energy {
        self.consumed.get(&node).copied().unwrap_or(Energy::ZERO)
    }

    /// Total energy consumed by all nodes.
    pub fn total(&self) -> Energy {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use dcflow_models::ConstantPowerModel;

    use super::*;

    #[test]
    fn monitor_notifies_on_power_transitions() {
        let mut monitor = EnergyMonitor::new(Box::new(ConstantPowerModel::new(200.)));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        monitor.add_observer(Rc::new(move |old, new| {
            log.borrow_mut().push((old.watts(), new.watts()));
        }));

        monitor.recompute(0.5);
        monitor.recompute(0.7);
        monitor.recompute(0.);

        assert_eq!(*seen.borrow(), vec![(0., 200.), (200., 0.)]);
    }

    #[test]
    fn recorder_integrates_power_over_time() {
        let mut recorder = EnergyRecorder::default();
        recorder.advance(TimePoint::from_millis(0.), std::iter::empty());
        recorder.advance(
            TimePoint::from_millis(2000.),
            [(0, Power::from_watts(100.)), (1, Power::from_watts(50.))].into_iter(),
        );
        assert!((recorder.consumed_by(0).joules() - 200.).abs() < 1e-9);
        assert!((recorder.consumed_by(1).joules() - 100.).abs() < 1e-9);
        assert!((recorder.total().joules() - 300.).abs() < 1e-9);
    }
}
