pub mod capacity_scheduler;
pub mod common;
pub mod config;
pub mod container;
pub mod datacenter;
pub mod events;
pub mod host;
pub mod logger;
pub mod migration_planner;
pub mod overload_detector;
pub mod placement;
pub mod power_model;
pub mod provisioner;
pub mod resource_pool;
pub mod selection_policy;
pub mod utilization;
pub mod vm;
pub mod workload_model;
