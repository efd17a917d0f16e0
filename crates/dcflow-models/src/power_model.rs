//! Power consumption models.

use dyn_clone::{clone_trait_object, DynClone};

/// Model for computing power consumption of a network component.
pub trait PowerModel: DynClone {
    /// Computes the current power consumption in watts.
    ///
    /// * `utilization` - current component utilization (0-1).
    fn get_power(&self, utilization: f64) -> f64;
}

clone_trait_object!(PowerModel);

/// A power model with constant power consumption value.
#[derive(Clone)]
pub struct ConstantPowerModel {
    power: f64,
}

impl ConstantPowerModel {
    /// Creates constant power model with specified parameters.
    ///
    /// * `power` - Power consumption value in watts.
    pub fn new(power: f64) -> Self {
        Self { power }
    }
}

impl PowerModel for ConstantPowerModel {
    fn get_power(&self, utilization: f64) -> f64 {
        if utilization == 0. {
            return 0.;
        }
        self.power
    }
}

/// A power model for components that draw no power at all.
#[derive(Clone, Default)]
pub struct ZeroPowerModel;

impl PowerModel for ZeroPowerModel {
    fn get_power(&self, _utilization: f64) -> f64 {
        0.
    }
}
