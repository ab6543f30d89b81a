//! Entity arena and containment state of one datacenter.

use std::collections::BTreeMap;

use crate::core::common::{AllocationVerdict, WorkloadUid};
use crate::core::container::{Container, ContainerSpec};
use crate::core::host::Host;
use crate::core::vm::{Vm, VmSpec};

/// Assignment tables captured before an optimization pass.
///
/// Workloads currently migrating in are not part of the containment indices,
/// so they are naturally excluded from the snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolSnapshot {
    vm_placements: Vec<(u32, u32)>,
    container_placements: Vec<(u32, u32)>,
}

/// Stores all hosts, VMs and containers of a datacenter by id, together with
/// the containment indices between the tiers.
///
/// Entities are referenced by stable integer ids everywhere; "migrating-in"
/// membership is a second index into the same arena kept on the owner side.
#[derive(Default)]
pub struct ResourcePool {
    hosts: BTreeMap<u32, Host>,
    vms: BTreeMap<u32, Vm>,
    containers: BTreeMap<u32, Container>,
    /// vm id -> host id, covering settled placements only.
    vm_hosts: BTreeMap<u32, u32>,
    /// container id -> vm id, covering settled placements only.
    container_vms: BTreeMap<u32, u32>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    // Entity access //////////////////////////////////////////////////////////

    pub fn add_host(&mut self, host: Host) {
        self.hosts.insert(host.id, host);
    }

    pub fn add_vm(&mut self, vm: Vm) {
        self.vms.insert(vm.id, vm);
    }

    pub fn add_container(&mut self, container: Container) {
        self.containers.insert(container.id, container);
    }

    /// Destroys a VM entity. The VM must not be placed on any host.
    pub fn remove_vm(&mut self, vm_id: u32) {
        debug_assert!(!self.vm_hosts.contains_key(&vm_id));
        self.vms.remove(&vm_id);
    }

    /// Destroys a container entity. The container must not be placed on any VM.
    pub fn remove_container(&mut self, container_id: u32) {
        debug_assert!(!self.container_vms.contains_key(&container_id));
        self.containers.remove(&container_id);
    }

    pub fn host(&self, id: u32) -> &Host {
        self.hosts.get(&id).unwrap_or_else(|| panic!("unknown host {}", id))
    }

    pub fn host_mut(&mut self, id: u32) -> &mut Host {
        self.hosts.get_mut(&id).unwrap_or_else(|| panic!("unknown host {}", id))
    }

    pub fn vm(&self, id: u32) -> &Vm {
        self.vms.get(&id).unwrap_or_else(|| panic!("unknown vm {}", id))
    }

    pub fn vm_mut(&mut self, id: u32) -> &mut Vm {
        self.vms.get_mut(&id).unwrap_or_else(|| panic!("unknown vm {}", id))
    }

    pub fn container(&self, id: u32) -> &Container {
        self.containers
            .get(&id)
            .unwrap_or_else(|| panic!("unknown container {}", id))
    }

    pub fn container_mut(&mut self, id: u32) -> &mut Container {
        self.containers
            .get_mut(&id)
            .unwrap_or_else(|| panic!("unknown container {}", id))
    }

    pub fn contains_vm(&self, id: u32) -> bool {
        self.vms.contains_key(&id)
    }

    pub fn contains_container(&self, id: u32) -> bool {
        self.containers.contains_key(&id)
    }

    /// Host ids in creation order.
    pub fn host_ids(&self) -> Vec<u32> {
        self.hosts.keys().copied().collect()
    }

    pub fn vm_ids(&self) -> Vec<u32> {
        self.vms.keys().copied().collect()
    }

    pub fn container_ids(&self) -> Vec<u32> {
        self.containers.keys().copied().collect()
    }

    pub fn vm_host(&self, vm_id: u32) -> Option<u32> {
        self.vm_hosts.get(&vm_id).copied()
    }

    pub fn container_vm(&self, container_id: u32) -> Option<u32> {
        self.container_vms.get(&container_id).copied()
    }

    // Suitability checks /////////////////////////////////////////////////////

    /// Checks all four host resources without mutating anything.
    pub fn can_host_fit_vm(&self, host_id: u32, uid: WorkloadUid, spec: &VmSpec) -> AllocationVerdict {
        let host = match self.hosts.get(&host_id) {
            Some(host) => host,
            None => return AllocationVerdict::HostNotFound,
        };
        if spec.size > host.storage_free() {
            return AllocationVerdict::NotEnoughStorage;
        }
        if !host.ram.is_suitable(uid, spec.ram) {
            return AllocationVerdict::NotEnoughRam;
        }
        if !host.bw.is_suitable(uid, spec.bandwidth) {
            return AllocationVerdict::NotEnoughBandwidth;
        }
        if spec.core_mips > host.cpu.core_capacity() {
            return AllocationVerdict::ShareExceedsCoreCapacity;
        }
        let shares = vec![spec.core_mips; spec.cores as usize];
        if !host.cpu.is_suitable(uid, &shares) {
            return AllocationVerdict::NotEnoughCpu;
        }
        AllocationVerdict::Success
    }

    pub fn can_vm_fit_container(&self, vm_id: u32, uid: WorkloadUid, spec: &ContainerSpec) -> AllocationVerdict {
        let vm = match self.vms.get(&vm_id) {
            Some(vm) => vm,
            None => return AllocationVerdict::HostNotFound,
        };
        if !vm.ram.is_suitable(uid, spec.ram) {
            return AllocationVerdict::NotEnoughRam;
        }
        if !vm.bw.is_suitable(uid, spec.bandwidth) {
            return AllocationVerdict::NotEnoughBandwidth;
        }
        if spec.core_mips > vm.cpu.core_capacity() {
            return AllocationVerdict::ShareExceedsCoreCapacity;
        }
        let shares = vec![spec.core_mips; spec.cores as usize];
        if !vm.cpu.is_suitable(uid, &shares) {
            return AllocationVerdict::NotEnoughCpu;
        }
        AllocationVerdict::Success
    }

    // Placement //////////////////////////////////////////////////////////////

    /// Allocates the VM's resources on the host: storage, RAM, bandwidth and
    /// compute, in that order. Any failure rolls back the allocations already
    /// made by this call and leaves the host untouched.
    fn allocate_vm_resources(&mut self, vm_id: u32, host_id: u32) -> bool {
        let (uid, spec) = {
            let vm = self.vm(vm_id);
            (vm.uid(), vm.spec.clone())
        };
        let host = match self.hosts.get_mut(&host_id) {
            Some(host) => host,
            None => return false,
        };
        if !host.reserve_storage(spec.size) {
            return false;
        }
        if !host.ram.allocate(uid, spec.ram) {
            host.release_storage(spec.size);
            return false;
        }
        if !host.bw.allocate(uid, spec.bandwidth) {
            host.ram.deallocate(uid);
            host.release_storage(spec.size);
            return false;
        }
        let shares = vec![spec.core_mips; spec.cores as usize];
        if !host.cpu.allocate(uid, &shares) {
            host.bw.deallocate(uid);
            host.ram.deallocate(uid);
            host.release_storage(spec.size);
            return false;
        }
        true
    }

    fn release_vm_resources(&mut self, vm_id: u32, host_id: u32) {
        let (uid, size) = {
            let vm = self.vm(vm_id);
            (vm.uid(), vm.spec.size)
        };
        if let Some(host) = self.hosts.get_mut(&host_id) {
            host.cpu.deallocate(uid);
            host.bw.deallocate(uid);
            host.ram.deallocate(uid);
            host.release_storage(size);
        }
    }

    /// Places the VM on the host, allocating all its resources atomically.
    pub fn place_vm(&mut self, vm_id: u32, host_id: u32) -> bool {
        if !self.allocate_vm_resources(vm_id, host_id) {
            return false;
        }
        self.host_mut(host_id).add_vm(vm_id);
        self.vm_hosts.insert(vm_id, host_id);
        true
    }

    /// Removes the VM from its current host, releasing all its resources.
    pub fn unplace_vm(&mut self, vm_id: u32) {
        if let Some(host_id) = self.vm_hosts.remove(&vm_id) {
            self.host_mut(host_id).remove_vm(vm_id);
            self.release_vm_resources(vm_id, host_id);
        }
    }

    fn allocate_container_resources(&mut self, container_id: u32, vm_id: u32) -> bool {
        let (uid, spec) = {
            let container = self.container(container_id);
            (container.uid(), container.spec.clone())
        };
        let vm = match self.vms.get_mut(&vm_id) {
            Some(vm) => vm,
            None => return false,
        };
        if !vm.ram.allocate(uid, spec.ram) {
            return false;
        }
        if !vm.bw.allocate(uid, spec.bandwidth) {
            vm.ram.deallocate(uid);
            return false;
        }
        let shares = vec![spec.core_mips; spec.cores as usize];
        if !vm.cpu.allocate(uid, &shares) {
            vm.bw.deallocate(uid);
            vm.ram.deallocate(uid);
            return false;
        }
        true
    }

    fn release_container_resources(&mut self, container_id: u32, vm_id: u32) {
        let uid = self.container(container_id).uid();
        if let Some(vm) = self.vms.get_mut(&vm_id) {
            vm.cpu.deallocate(uid);
            vm.bw.deallocate(uid);
            vm.ram.deallocate(uid);
        }
    }

    pub fn place_container(&mut self, container_id: u32, vm_id: u32) -> bool {
        if !self.allocate_container_resources(container_id, vm_id) {
            return false;
        }
        self.vm_mut(vm_id).add_container(container_id);
        self.container_vms.insert(container_id, vm_id);
        true
    }

    pub fn unplace_container(&mut self, container_id: u32) {
        if let Some(vm_id) = self.container_vms.remove(&container_id) {
            self.vm_mut(vm_id).remove_container(container_id);
            self.release_container_resources(container_id, vm_id);
        }
    }

    // Migration bookkeeping //////////////////////////////////////////////////

    /// Starts a VM migration: allocates the VM's resources on the destination
    /// host and registers it in the destination's migrating-in index. The VM
    /// keeps residing on its source host until the commit.
    pub fn begin_vm_migration(&mut self, vm_id: u32, dest_host: u32) -> bool {
        if !self.allocate_vm_resources(vm_id, dest_host) {
            return false;
        }
        self.host_mut(dest_host).add_migrating_in(vm_id);
        self.vm_mut(vm_id).in_migration = true;
        true
    }

    /// Finishes a VM migration: releases the source-side resources and settles
    /// the VM on the destination. Returns `false` if the recorded state does
    /// not match the commit request.
    pub fn commit_vm_migration(&mut self, vm_id: u32, source_host: u32, dest_host: u32) -> bool {
        if self.vm_hosts.get(&vm_id) != Some(&source_host) {
            return false;
        }
        if !self.host(dest_host).vms_migrating_in.contains(&vm_id) {
            return false;
        }
        self.host_mut(source_host).remove_vm(vm_id);
        self.release_vm_resources(vm_id, source_host);
        let dest = self.host_mut(dest_host);
        dest.remove_migrating_in(vm_id);
        dest.add_vm(vm_id);
        self.vm_hosts.insert(vm_id, dest_host);
        self.vm_mut(vm_id).in_migration = false;
        true
    }

    pub fn begin_container_migration(&mut self, container_id: u32, dest_vm: u32) -> bool {
        if !self.allocate_container_resources(container_id, dest_vm) {
            return false;
        }
        self.vm_mut(dest_vm).add_migrating_in(container_id);
        self.container_mut(container_id).in_migration = true;
        true
    }

    pub fn commit_container_migration(&mut self, container_id: u32, dest_vm: u32) -> bool {
        if !self.vm(dest_vm).containers_migrating_in.contains(&container_id) {
            return false;
        }
        if let Some(source_vm) = self.container_vms.remove(&container_id) {
            self.vm_mut(source_vm).remove_container(container_id);
            self.release_container_resources(container_id, source_vm);
        }
        let dest = self.vm_mut(dest_vm);
        dest.remove_migrating_in(container_id);
        dest.add_container(container_id);
        self.container_vms.insert(container_id, dest_vm);
        self.container_mut(container_id).in_migration = false;
        true
    }

    // Demand aggregation /////////////////////////////////////////////////////

    /// Compute capacity currently requested by the VM: its rated maximum while
    /// being instantiated, the aggregate demand of its containers (including
    /// arriving ones) afterwards. The aggregate may exceed the VM's rated
    /// capacity, making the host demand ratio exceed 1 under oversubscription.
    pub fn vm_requested_mips(&self, vm_id: u32) -> f64 {
        let vm = self.vm(vm_id);
        if vm.being_instantiated {
            return vm.total_mips();
        }
        let mut requested = 0.;
        for container_id in vm.containers.iter().chain(vm.containers_migrating_in.iter()) {
            requested += self.container(*container_id).requested_mips();
        }
        requested
    }

    pub fn host_requested_mips(&self, host_id: u32) -> f64 {
        let host = self.host(host_id);
        let mut requested = 0.;
        for vm_id in host.vms.iter().chain(host.vms_migrating_in.iter()) {
            requested += self.vm_requested_mips(*vm_id);
        }
        requested
    }

    /// Recomputes and caches the host's requested-vs-total compute ratio.
    pub fn refresh_host_demand(&mut self, host_id: u32) -> f64 {
        let ratio = self.host_requested_mips(host_id) / self.host(host_id).total_mips();
        self.host_mut(host_id).set_demand_ratio(ratio);
        ratio
    }

    /// The longest migration transfer time among the host's VMs.
    pub fn host_max_migration_time(&self, host_id: u32) -> f64 {
        self.host(host_id)
            .vms
            .iter()
            .map(|vm_id| self.vm(*vm_id).migration_time())
            .fold(0., f64::max)
    }

    // Snapshot / restore /////////////////////////////////////////////////////

    /// Captures the current assignment tables.
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            vm_placements: self.vm_hosts.iter().map(|(vm, host)| (*vm, *host)).collect(),
            container_placements: self.container_vms.iter().map(|(c, vm)| (*c, *vm)).collect(),
        }
    }

    /// Destroys all settled assignments and rebuilds exactly the snapshot.
    ///
    /// A rebuild failure means the capacity accounting diverged during the
    /// optimization pass, which would silently corrupt all subsequent
    /// measurements, so it aborts the simulation.
    pub fn restore(&mut self, snapshot: &PoolSnapshot) {
        let containers: Vec<u32> = self.container_vms.keys().copied().collect();
        for container_id in containers {
            self.unplace_container(container_id);
        }
        let vms: Vec<u32> = self.vm_hosts.keys().copied().collect();
        for vm_id in vms {
            self.unplace_vm(vm_id);
        }
        for (vm_id, host_id) in &snapshot.vm_placements {
            if !self.place_vm(*vm_id, *host_id) {
                panic!("restore failed: cannot re-create assignment of vm {} to host {}", vm_id, host_id);
            }
        }
        for (container_id, vm_id) in &snapshot.container_placements {
            if !self.place_container(*container_id, *vm_id) {
                panic!(
                    "restore failed: cannot re-create assignment of container {} to vm {}",
                    container_id, vm_id
                );
            }
        }
    }
}
