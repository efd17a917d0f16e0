//! Power consumption models for network equipment.
//!
//! The simulator recomputes the instantaneous power draw of every node from
//! its current utilization; the models in this crate supply the function that
//! maps utilization to watts. Implement [`PowerModel`] to plug in a custom
//! model.

#![warn(missing_docs)]

pub mod power_model;
pub mod switch;

pub use power_model::{ConstantPowerModel, PowerModel, ZeroPowerModel};
pub use switch::LinearPowerModel;
