//! Representation of a virtual machine.

use serde::Serialize;

use crate::core::common::WorkloadUid;
use crate::core::provisioner::{ComputeProvisioner, ResourceProvisioner};
use crate::core::utilization::{StateLog, UtilizationHistory};

/// Resource requirements of a virtual machine.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VmSpec {
    pub cores: u32,
    pub core_mips: f64,
    pub ram: f64,
    pub bandwidth: f64,
    /// Storage footprint of the VM image on its host.
    pub size: f64,
}

impl VmSpec {
    pub fn total_mips(&self) -> f64 {
        self.cores as f64 * self.core_mips
    }
}

/// Virtual machine hosting containers.
///
/// Mirrors [`Host`](crate::core::host::Host) one level down: owns RAM, bandwidth
/// and compute provisioners for its containers. Created by the placement policy
/// on demand and destroyed when its container count reaches zero.
pub struct Vm {
    pub id: u32,
    pub owner_id: u32,
    pub spec: VmSpec,
    pub ram: ResourceProvisioner,
    pub bw: ResourceProvisioner,
    pub cpu: ComputeProvisioner,
    pub containers: Vec<u32>,
    pub containers_migrating_in: Vec<u32>,
    /// True until the first processing tick after creation.
    pub being_instantiated: bool,
    pub in_migration: bool,
    /// Created but deliberately idle, awaiting a container arrival.
    pub in_waiting: bool,
    /// Compute capacity allocated by the host on the last processing pass.
    pub allocated_mips: f64,
    pub util_history: UtilizationHistory,
    pub state_log: StateLog,
}

impl Vm {
    pub fn new(id: u32, owner_id: u32, spec: VmSpec) -> Self {
        let ram = ResourceProvisioner::new(spec.ram);
        let bw = ResourceProvisioner::new(spec.bandwidth);
        let cpu = ComputeProvisioner::new(spec.cores, spec.core_mips);
        Self {
            id,
            owner_id,
            spec,
            ram,
            bw,
            cpu,
            containers: Vec::new(),
            containers_migrating_in: Vec::new(),
            being_instantiated: true,
            in_migration: false,
            in_waiting: false,
            allocated_mips: 0.,
            util_history: UtilizationHistory::new(),
            state_log: StateLog::new(),
        }
    }

    pub fn uid(&self) -> WorkloadUid {
        WorkloadUid::new(self.owner_id, self.id)
    }

    pub fn total_mips(&self) -> f64 {
        self.spec.total_mips()
    }

    pub fn add_container(&mut self, container_id: u32) {
        self.containers.push(container_id);
    }

    pub fn remove_container(&mut self, container_id: u32) {
        self.containers.retain(|id| *id != container_id);
    }

    pub fn add_migrating_in(&mut self, container_id: u32) {
        self.containers_migrating_in.push(container_id);
    }

    pub fn remove_migrating_in(&mut self, container_id: u32) {
        self.containers_migrating_in.retain(|id| *id != container_id);
    }

    /// Simulated transfer time of a live migration of this VM.
    ///
    /// The VM memory is sent over half the link bandwidth, modelling sharing
    /// with normal traffic.
    pub fn migration_time(&self) -> f64 {
        self.spec.ram / (self.spec.bandwidth / 2. / 8000.)
    }
}
