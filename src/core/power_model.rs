//! Physical host power consumption models and energy accounting.

use dyn_clone::{clone_trait_object, DynClone};

/// Power model is a function, which computes the power consumption of a physical host
/// based on its current CPU load and simulation time.
///
/// The migration planner consumes it only as a black box for computing power deltas
/// between candidate placements.
pub trait PowerModel: DynClone {
    /// Returns the current power consumption of a physical host.
    ///
    /// - `time` - current simulation time.
    /// - `cpu_load` - current host CPU load.
    fn get_power(&self, time: f64, cpu_load: f64) -> f64;
}

clone_trait_object!(PowerModel);

/// Simple linear power model.
///
/// If CPU load is zero, then it is assumed that the host is powered off and its power
/// consumption is zero.
#[derive(Clone)]
pub struct LinearPowerModel {
    max_power: f64,
    idle_power: f64,
}

impl LinearPowerModel {
    /// Creates the model with specified maximum power and the default 40% idle power.
    pub fn new(max_power: f64) -> Self {
        Self {
            idle_power: 0.4 * max_power,
            max_power,
        }
    }

    pub fn with_idle_power(max_power: f64, idle_power: f64) -> Self {
        Self { idle_power, max_power }
    }
}

impl PowerModel for LinearPowerModel {
    fn get_power(&self, _time: f64, cpu_load: f64) -> f64 {
        if cpu_load == 0. {
            return 0.;
        }
        self.idle_power + cpu_load * (self.max_power - self.idle_power)
    }
}

/// Model with fixed power consumption regardless of the load.
#[derive(Clone)]
pub struct ConstantPowerModel {
    power: f64,
}

impl ConstantPowerModel {
    pub fn new(power: f64) -> Self {
        Self { power }
    }
}

impl PowerModel for ConstantPowerModel {
    fn get_power(&self, _time: f64, _cpu_load: f64) -> f64 {
        self.power
    }
}

/// Integrates host power consumption over simulation time.
#[derive(Clone, Debug)]
pub struct EnergyMeter {
    energy_consumed: f64,
    current_power: f64,
    prev_time: f64,
}

impl EnergyMeter {
    pub fn new() -> Self {
        Self {
            energy_consumed: 0.,
            current_power: 0.,
            prev_time: 0.,
        }
    }

    /// Invoked each time the host power consumption changes.
    pub fn update(&mut self, time: f64, power: f64) {
        self.energy_consumed += (time - self.prev_time) * self.current_power;
        self.current_power = power;
        self.prev_time = time;
    }

    pub fn energy_consumed(&self) -> f64 {
        self.energy_consumed
    }
}

impl Default for EnergyMeter {
    fn default() -> Self {
        Self::new()
    }
}
