//! Simulation configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Represents physical host(s) configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct HostConfig {
    /// number of processing elements
    pub cores: u32,
    /// rated capacity of one processing element
    pub core_mips: f64,
    /// host RAM capacity
    pub ram: f64,
    /// host network bandwidth
    pub bandwidth: f64,
    /// host storage capacity
    pub storage: f64,
    /// host power consumption at full load
    pub max_power: Option<f64>,
    /// number of such hosts
    pub count: Option<u32>,
}

/// Raw configuration as read from a YAML file, all fields optional.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
struct ConfigDataRaw {
    scheduling_interval: Option<f64>,
    vm_start_delay: Option<f64>,
    container_start_delay: Option<f64>,
    container_migration_delay: Option<f64>,
    disable_migrations: Option<bool>,
    overload_detector: Option<String>,
    vm_selection: Option<String>,
    container_selection: Option<String>,
    placement: Option<String>,
    planner_mode: Option<String>,
    hosts: Option<Vec<HostConfig>>,
}

/// Represents simulation configuration.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// period of the datacenter control loop tick
    pub scheduling_interval: f64,
    /// vm initialization duration
    pub vm_start_delay: f64,
    /// container initialization duration
    pub container_start_delay: f64,
    /// simulated transfer time of a container migration
    pub container_migration_delay: f64,
    /// disables the migration planner, leaving only initial placement
    pub disable_migrations: bool,
    /// overload detector policy string, e.g. `Mad[safety_factor=2.5,fallback_threshold=0.8]`
    pub overload_detector: String,
    /// VM eviction selection policy name
    pub vm_selection: String,
    /// container eviction selection policy name
    pub container_selection: String,
    /// placement algorithm name
    pub placement: String,
    /// migration granularity, `Vm` or `Container`
    pub planner_mode: String,
    /// cloud physical hosts
    pub hosts: Vec<HostConfig>,
}

impl SimulationConfig {
    /// Creates simulation config with default parameter values.
    pub fn new() -> Self {
        Self {
            scheduling_interval: 1.,
            vm_start_delay: 1.,
            container_start_delay: 0.5,
            container_migration_delay: 0.5,
            disable_migrations: false,
            overload_detector: "StaticThreshold[threshold=0.8]".to_string(),
            vm_selection: "MinimumMigrationTime".to_string(),
            container_selection: "MinimumMigrationTime".to_string(),
            placement: "PowerAware".to_string(),
            planner_mode: "Vm".to_string(),
            hosts: Vec::new(),
        }
    }

    /// Creates simulation config by reading parameter values from a YAML file
    /// (uses default values for absent parameters).
    ///
    /// Malformed files and invalid parameter values are fatal.
    pub fn from_file(file_name: &str) -> Self {
        let raw: ConfigDataRaw = serde_yaml::from_str(
            &std::fs::read_to_string(file_name).unwrap_or_else(|_| panic!("Can't read file {}", file_name)),
        )
        .unwrap_or_else(|_| panic!("Can't parse YAML from file {}", file_name));
        let default = SimulationConfig::new();
        let config = Self {
            scheduling_interval: raw.scheduling_interval.unwrap_or(default.scheduling_interval),
            vm_start_delay: raw.vm_start_delay.unwrap_or(default.vm_start_delay),
            container_start_delay: raw.container_start_delay.unwrap_or(default.container_start_delay),
            container_migration_delay: raw
                .container_migration_delay
                .unwrap_or(default.container_migration_delay),
            disable_migrations: raw.disable_migrations.unwrap_or(default.disable_migrations),
            overload_detector: raw.overload_detector.unwrap_or(default.overload_detector),
            vm_selection: raw.vm_selection.unwrap_or(default.vm_selection),
            container_selection: raw.container_selection.unwrap_or(default.container_selection),
            placement: raw.placement.unwrap_or(default.placement),
            planner_mode: raw.planner_mode.unwrap_or(default.planner_mode),
            hosts: raw.hosts.unwrap_or_default(),
        };
        config.validate();
        config
    }

    fn validate(&self) {
        if self.scheduling_interval <= 0. {
            panic!("Scheduling interval must be positive, got {}", self.scheduling_interval);
        }
        if self.vm_start_delay < 0. || self.container_start_delay < 0. || self.container_migration_delay < 0. {
            panic!("Start and migration delays cannot be negative");
        }
        for host in &self.hosts {
            if host.cores == 0 || host.core_mips <= 0. {
                panic!("Host compute capacity must be positive");
            }
        }
    }

    /// Returns total hosts count.
    pub fn number_of_hosts(&self) -> u32 {
        self.hosts.iter().map(|h| h.count.unwrap_or(1)).sum()
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses config value string, which consists of two parts - name and options.
/// Example: `StaticThreshold[threshold=0.8]` parts are name `StaticThreshold`
/// and options string `threshold=0.8`.
pub fn parse_config_value(config_str: &str) -> (String, Option<String>) {
    match config_str.split_once('[') {
        Some((l, r)) => (l.to_string(), Some(r.to_string().replace(']', ""))),
        None => (config_str.to_string(), None),
    }
}

/// Parses options string from config value, returns map with option names and values.
pub fn parse_options(options_str: &str) -> HashMap<String, String> {
    let mut options = HashMap::new();
    for option_str in options_str.split(',') {
        if let Some((name, value)) = option_str.split_once('=') {
            options.insert(name.to_string(), value.to_string());
        }
    }
    options
}
