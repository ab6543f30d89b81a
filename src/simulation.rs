//! Simulation façade tying the datacenter to the event kernel.

use std::cell::RefCell;
use std::rc::Rc;
use sugars::{rc, refcell};

use dslab_core::context::SimulationContext;
use dslab_core::simulation::Simulation;

use crate::core::config::SimulationConfig;
use crate::core::container::ContainerSpec;
use crate::core::datacenter::Datacenter;
use crate::core::events::{ContainerRequest, ContainerSubmit};
use crate::core::logger;
use crate::core::logger::{Logger, StdoutLogger};
use crate::core::vm::VmSpec;
use crate::core::workload_model::WorkloadModel;

/// Represents a simulation of one datacenter.
///
/// Provides methods for configuring the simulation, submitting workloads,
/// driving simulated time and inspecting the resulting state.
pub struct CloudSimulation {
    datacenter: Rc<RefCell<Datacenter>>,
    datacenter_id: u32,
    logger: Rc<RefCell<Box<dyn Logger>>>,
    sim: Simulation,
    ctx: SimulationContext,
    sim_config: Rc<SimulationConfig>,
}

impl CloudSimulation {
    /// Creates a simulation with hosts from the config, logging to stdout.
    pub fn new(sim: Simulation, sim_config: SimulationConfig) -> Self {
        Self::with_logger(sim, sim_config, Box::new(StdoutLogger::new()))
    }

    pub fn with_logger(mut sim: Simulation, sim_config: SimulationConfig, logger: Box<dyn Logger>) -> Self {
        let logger: Rc<RefCell<Box<dyn Logger>>> = rc!(refcell!(logger));
        let sim_config = rc!(sim_config);
        let datacenter = rc!(refcell!(Datacenter::new(
            sim.create_context("datacenter"),
            sim_config.clone(),
            logger.clone(),
        )));
        let datacenter_id = sim.add_handler("datacenter", datacenter.clone());
        let ctx = sim.create_context("simulation");
        let mut simulation = Self {
            datacenter,
            datacenter_id,
            logger,
            sim,
            ctx,
            sim_config,
        };
        let hosts = simulation.sim_config.hosts.clone();
        for host in &hosts {
            for _ in 0..host.count.unwrap_or(1) {
                simulation.add_host(
                    host.cores,
                    host.core_mips,
                    host.ram,
                    host.bandwidth,
                    host.storage,
                    host.max_power,
                );
            }
        }
        simulation
    }

    /// Creates a new host and returns its id.
    pub fn add_host(
        &mut self,
        cores: u32,
        core_mips: f64,
        ram: f64,
        bandwidth: f64,
        storage: f64,
        max_power: Option<f64>,
    ) -> u32 {
        self.datacenter
            .borrow_mut()
            .add_host(cores, core_mips, ram, bandwidth, storage, max_power)
    }

    /// Creates a VM directly on the given host, bypassing the placement policy.
    pub fn spawn_vm_on(&mut self, host_id: u32, spec: VmSpec) -> Option<u32> {
        self.datacenter.borrow_mut().spawn_vm_on(host_id, spec)
    }

    /// Creates a container directly inside the given VM, bypassing the placement policy.
    pub fn spawn_container_on(
        &mut self,
        vm_id: u32,
        spec: ContainerSpec,
        workload: Box<dyn WorkloadModel>,
    ) -> Option<u32> {
        self.datacenter.borrow_mut().spawn_container_on(vm_id, spec, workload)
    }

    /// Marks a host as failed or repaired.
    pub fn set_host_failed(&mut self, host_id: u32, failed: bool) {
        self.datacenter.borrow_mut().set_host_failed(host_id, failed);
    }

    /// Submits containers for placement through the regular event flow.
    pub fn submit_containers(&mut self, requests: Vec<ContainerRequest>) {
        self.ctx.emit_now(ContainerSubmit { requests }, self.datacenter_id);
    }

    pub fn datacenter(&self) -> Rc<RefCell<Datacenter>> {
        self.datacenter.clone()
    }

    pub fn datacenter_id(&self) -> u32 {
        self.datacenter_id
    }

    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    pub fn steps(&mut self, step_count: u64) -> bool {
        self.sim.steps(step_count)
    }

    pub fn step_for_duration(&mut self, time: f64) {
        self.sim.step_for_duration(time);
    }

    pub fn event_count(&self) -> u64 {
        self.sim.event_count()
    }

    pub fn current_time(&mut self) -> f64 {
        self.sim.time()
    }

    /// Host currently holding the VM.
    pub fn vm_location(&self, vm_id: u32) -> Option<u32> {
        self.datacenter.borrow().pool().vm_host(vm_id)
    }

    /// VM currently holding the container.
    pub fn container_location(&self, container_id: u32) -> Option<u32> {
        self.datacenter.borrow().pool().container_vm(container_id)
    }

    pub fn host_demand_ratio(&self, host_id: u32) -> f64 {
        self.datacenter.borrow().pool().host(host_id).demand_ratio()
    }

    pub fn host_energy_consumed(&self, host_id: u32) -> f64 {
        self.datacenter.borrow().pool().host(host_id).energy_consumed()
    }

    /// Saves the collected log if the configured logger supports it.
    pub fn save_log(&self, path: &str) -> Result<(), std::io::Error> {
        self.logger.borrow().save_log(path)
    }

    /// Saves the per-entity state audit log to a CSV file.
    pub fn save_state_log(&self, path: &str) -> Result<(), std::io::Error> {
        logger::save_state_log(self.datacenter.borrow().pool(), path)
    }

    pub fn sim_config(&self) -> Rc<SimulationConfig> {
        self.sim_config.clone()
    }
}
