//! Representation of a physical host.

use crate::core::power_model::{EnergyMeter, PowerModel};
use crate::core::provisioner::{ComputeProvisioner, ResourceProvisioner};
use crate::core::utilization::{StateLog, UtilizationHistory};

/// Physical machine hosting virtual machines.
///
/// Owns one provisioner per resource kind. Hosts are created once at setup and
/// are never destroyed, only marked failed or active.
pub struct Host {
    pub id: u32,
    storage_total: f64,
    storage_free: f64,
    pub ram: ResourceProvisioner,
    pub bw: ResourceProvisioner,
    pub cpu: ComputeProvisioner,
    /// VMs residing on this host.
    pub vms: Vec<u32>,
    /// Incoming halves of in-flight VM migrations. A second index over the same
    /// entity arena, never a duplicate entity.
    pub vms_migrating_in: Vec<u32>,
    pub failed: bool,
    power_model: Box<dyn PowerModel>,
    energy: EnergyMeter,
    pub util_history: UtilizationHistory,
    pub state_log: StateLog,
    demand_ratio: f64,
}

impl Host {
    pub fn new(
        id: u32,
        cores: u32,
        core_mips: f64,
        ram: f64,
        bandwidth: f64,
        storage: f64,
        power_model: Box<dyn PowerModel>,
    ) -> Self {
        Self {
            id,
            storage_total: storage,
            storage_free: storage,
            ram: ResourceProvisioner::new(ram),
            bw: ResourceProvisioner::new(bandwidth),
            cpu: ComputeProvisioner::new(cores, core_mips),
            vms: Vec::new(),
            vms_migrating_in: Vec::new(),
            failed: false,
            power_model,
            energy: EnergyMeter::new(),
            util_history: UtilizationHistory::new(),
            state_log: StateLog::new(),
            demand_ratio: 0.,
        }
    }

    pub fn total_mips(&self) -> f64 {
        self.cpu.capacity()
    }

    pub fn cores(&self) -> u32 {
        self.cpu.cores()
    }

    pub fn core_mips(&self) -> f64 {
        self.cpu.core_capacity()
    }

    pub fn storage_total(&self) -> f64 {
        self.storage_total
    }

    pub fn storage_free(&self) -> f64 {
        self.storage_free
    }

    pub fn reserve_storage(&mut self, size: f64) -> bool {
        if size > self.storage_free {
            return false;
        }
        self.storage_free -= size;
        true
    }

    pub fn release_storage(&mut self, size: f64) {
        self.storage_free = (self.storage_free + size).min(self.storage_total);
    }

    pub fn add_vm(&mut self, vm_id: u32) {
        self.vms.push(vm_id);
    }

    pub fn remove_vm(&mut self, vm_id: u32) {
        self.vms.retain(|id| *id != vm_id);
    }

    pub fn has_vm(&self, vm_id: u32) -> bool {
        self.vms.contains(&vm_id)
    }

    pub fn add_migrating_in(&mut self, vm_id: u32) {
        self.vms_migrating_in.push(vm_id);
    }

    pub fn remove_migrating_in(&mut self, vm_id: u32) {
        self.vms_migrating_in.retain(|id| *id != vm_id);
    }

    /// Ratio of the aggregate requested compute capacity to the total capacity,
    /// refreshed on every processing pass.
    pub fn demand_ratio(&self) -> f64 {
        self.demand_ratio
    }

    pub fn set_demand_ratio(&mut self, ratio: f64) {
        self.demand_ratio = ratio;
    }

    pub fn is_active(&self) -> bool {
        !self.failed
    }

    pub fn power(&self, time: f64, cpu_load: f64) -> f64 {
        self.power_model.get_power(time, cpu_load)
    }

    pub fn update_energy(&mut self, time: f64, cpu_load: f64) {
        let power = self.power(time, cpu_load);
        self.energy.update(time, power);
    }

    pub fn energy_consumed(&self) -> f64 {
        self.energy.energy_consumed()
    }
}
