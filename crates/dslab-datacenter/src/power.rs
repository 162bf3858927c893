//! Host power models and power states.

use std::fmt::{Display, Formatter};

use dyn_clone::{clone_trait_object, DynClone};
use serde::Serialize;

use crate::config::{parse_config_value, parse_options};
use crate::error::{DatacenterError, Result};

/// Power state of a host.
///
/// Transitions follow the cycle `Inactive -> Activating -> Active -> Deactivating -> Inactive`.
/// The transitional states last for the startup/shutdown delay of the host power model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PowerState {
    Inactive,
    Activating,
    Active,
    Deactivating,
}

impl PowerState {
    pub fn is_transitional(&self) -> bool {
        matches!(self, PowerState::Activating | PowerState::Deactivating)
    }
}

impl Display for PowerState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            PowerState::Inactive => write!(f, "inactive"),
            PowerState::Activating => write!(f, "activating"),
            PowerState::Active => write!(f, "active"),
            PowerState::Deactivating => write!(f, "deactivating"),
        }
    }
}

/// Power model of a physical host.
///
/// Besides the power consumption, the model defines how long it takes to power the host on and off.
pub trait PowerModel: DynClone {
    /// Returns the power consumption of an active host with specified CPU utilization (0-1).
    fn get_power(&self, utilization: f64) -> f64;

    /// Time in seconds needed to power the host on.
    fn startup_delay(&self) -> f64 {
        0.
    }

    /// Time in seconds needed to power the host off.
    fn shutdown_delay(&self) -> f64 {
        0.
    }
}

clone_trait_object!(PowerModel);

/// Linear power model.
///
/// Computes power consumption as `idle_power + utilization * (max_power - idle_power)`.
#[derive(Clone)]
pub struct LinearPowerModel {
    max_power: f64,
    idle_power: f64,
    startup_delay: f64,
    shutdown_delay: f64,
}

impl LinearPowerModel {
    /// Creates model with zero startup and shutdown delays.
    pub fn new(max_power: f64, idle_power: f64) -> Self {
        Self {
            max_power,
            idle_power,
            startup_delay: 0.,
            shutdown_delay: 0.,
        }
    }

    pub fn with_startup_delay(mut self, delay: f64) -> Self {
        self.startup_delay = delay.max(0.);
        self
    }

    pub fn with_shutdown_delay(mut self, delay: f64) -> Self {
        self.shutdown_delay = delay.max(0.);
        self
    }
}

impl PowerModel for LinearPowerModel {
    fn get_power(&self, utilization: f64) -> f64 {
        self.idle_power + utilization * (self.max_power - self.idle_power)
    }

    fn startup_delay(&self) -> f64 {
        self.startup_delay
    }

    fn shutdown_delay(&self) -> f64 {
        self.shutdown_delay
    }
}

/// A power model with constant power consumption value.
#[derive(Clone)]
pub struct ConstantPowerModel {
    power: f64,
    startup_delay: f64,
    shutdown_delay: f64,
}

impl ConstantPowerModel {
    pub fn new(power: f64) -> Self {
        Self {
            power,
            startup_delay: 0.,
            shutdown_delay: 0.,
        }
    }

    pub fn with_delays(mut self, startup_delay: f64, shutdown_delay: f64) -> Self {
        self.startup_delay = startup_delay.max(0.);
        self.shutdown_delay = shutdown_delay.max(0.);
        self
    }
}

impl PowerModel for ConstantPowerModel {
    fn get_power(&self, _utilization: f64) -> f64 {
        self.power
    }

    fn startup_delay(&self) -> f64 {
        self.startup_delay
    }

    fn shutdown_delay(&self) -> f64 {
        self.shutdown_delay
    }
}

fn parse_option(options: &std::collections::HashMap<String, String>, name: &str, default: f64) -> Result<f64> {
    match options.get(name) {
        Some(value) => value
            .parse::<f64>()
            .map_err(|_| DatacenterError::InvalidArgument(format!("bad power model option {}={}", name, value))),
        None => Ok(default),
    }
}

/// Builds power model from config string such as `Linear[max=200,idle=80,startup=5,shutdown=2]`
/// or `Constant[power=100]`.
pub fn power_model_resolver(config_str: &str) -> Result<Box<dyn PowerModel>> {
    let (name, options) = parse_config_value(config_str);
    let options = parse_options(&options.unwrap_or_default());
    let startup = parse_option(&options, "startup", 0.)?;
    let shutdown = parse_option(&options, "shutdown", 0.)?;
    match name.as_str() {
        "Linear" => {
            let max = parse_option(&options, "max", 1.)?;
            let idle = parse_option(&options, "idle", 0.)?;
            Ok(Box::new(
                LinearPowerModel::new(max, idle)
                    .with_startup_delay(startup)
                    .with_shutdown_delay(shutdown),
            ))
        }
        "Constant" => {
            let power = parse_option(&options, "power", 0.)?;
            Ok(Box::new(ConstantPowerModel::new(power).with_delays(startup, shutdown)))
        }
        _ => Err(DatacenterError::InvalidArgument(format!(
            "can't resolve power model: {}",
            config_str
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_model() {
        let model = LinearPowerModel::new(200., 80.).with_startup_delay(5.).with_shutdown_delay(-1.);
        assert_eq!(model.get_power(0.), 80.);
        assert_eq!(model.get_power(0.5), 140.);
        assert_eq!(model.get_power(1.), 200.);
        assert_eq!(model.startup_delay(), 5.);
        assert_eq!(model.shutdown_delay(), 0.);
    }

    #[test]
    fn test_resolver() {
        let model = power_model_resolver("Linear[max=200,idle=100,startup=3]").unwrap();
        assert_eq!(model.get_power(0.5), 150.);
        assert_eq!(model.startup_delay(), 3.);
        assert_eq!(model.shutdown_delay(), 0.);
        let model = power_model_resolver("Constant[power=42]").unwrap();
        assert_eq!(model.get_power(0.9), 42.);
        assert!(power_model_resolver("Cubic").is_err());
        assert!(power_model_resolver("Linear[max=abc]").is_err());
    }
}
