//! Migration planner running the detect, evacuate, replace, consolidate cycle.

use std::collections::BTreeSet;

use crate::core::common::AllocationVerdict;
use crate::core::config::SimulationConfig;
use crate::core::container::ContainerSpec;
use crate::core::overload_detector::{overload_detector_resolver, HostSample, OverloadDetector};
use crate::core::placement::{placement_algorithm_resolver, HostCandidate, PlacementAlgorithm};
use crate::core::resource_pool::ResourcePool;
use crate::core::selection_policy::{selection_policy_resolver, MigrationCandidate, SelectionPolicy};
use crate::core::vm::VmSpec;

/// Migration granularity of the planner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlannerMode {
    /// Whole VMs move between hosts.
    Vm,
    /// Individual containers move between VMs.
    Container,
}

impl PlannerMode {
    pub fn from_str(name: &str) -> Self {
        match name {
            "Vm" => PlannerMode::Vm,
            "Container" => PlannerMode::Container,
            _ => panic!("Can't resolve planner mode: {}", name),
        }
    }
}

/// The workload moved by one migration-map entry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WorkloadRef {
    Vm(u32),
    Container(u32),
}

/// One planned migration, handed to the control loop for execution.
#[derive(Clone, Debug)]
pub struct MigrationMapEntry {
    pub workload: WorkloadRef,
    /// Source host for VMs, source VM for containers.
    pub source: Option<u32>,
    pub dest_host: u32,
    /// Destination VM for container moves into an existing VM.
    pub dest_vm: Option<u32>,
    /// The destination VM does not exist yet and must be created first.
    pub requires_new_owner: bool,
    pub new_owner_spec: Option<VmSpec>,
}

/// Plans migrations over speculative pool state.
///
/// `optimize` explores placements by mutating the pool directly, then restores
/// the pre-pass snapshot before returning, so the live simulated state never
/// reflects speculative-only moves. The returned migration map is executed by
/// the control loop through the regular two-phase migration bookkeeping.
pub struct MigrationPlanner {
    detector: Box<dyn OverloadDetector>,
    vm_selection: Box<dyn SelectionPolicy>,
    container_selection: Box<dyn SelectionPolicy>,
    placement: Box<dyn PlacementAlgorithm>,
    mode: PlannerMode,
}

impl MigrationPlanner {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            detector: overload_detector_resolver(&config.overload_detector, config.scheduling_interval),
            vm_selection: selection_policy_resolver(&config.vm_selection),
            container_selection: selection_policy_resolver(&config.container_selection),
            placement: placement_algorithm_resolver(&config.placement),
            mode: PlannerMode::from_str(&config.planner_mode),
        }
    }

    pub fn mode(&self) -> PlannerMode {
        self.mode
    }

    pub fn detector(&mut self) -> &mut dyn OverloadDetector {
        self.detector.as_mut()
    }

    /// Finds a destination for a freshly submitted container.
    ///
    /// Returns the chosen host and the VM on it that can admit the container,
    /// or `None` for the VM when a new one must be created first.
    pub fn find_container_destination(
        &mut self,
        time: f64,
        pool: &mut ResourcePool,
        container_id: u32,
    ) -> Option<(u32, Option<u32>)> {
        let excluded = BTreeSet::new();
        let candidates = self.host_candidates_for_container(time, pool, container_id, &excluded);
        let dest_host = self.placement.select_host(&candidates)?;
        Some((dest_host, self.dest_vm_on_host(pool, dest_host, container_id)))
    }

    /// Runs one optimization pass and returns the migration map.
    pub fn optimize(&mut self, time: f64, pool: &mut ResourcePool) -> Vec<MigrationMapEntry> {
        let over = self.detect(time, pool);
        let snapshot = pool.snapshot();

        let mut entries = match self.mode {
            PlannerMode::Vm => self.evacuate_and_replace_vms(time, pool, &over),
            PlannerMode::Container => self.evacuate_and_replace_containers(time, pool, &over),
        };
        let mut chosen_dests: BTreeSet<u32> = entries.iter().map(|e| e.dest_host).collect();
        entries.extend(self.consolidate(time, pool, &over, &mut chosen_dests));

        pool.restore(&snapshot);
        for host_id in pool.host_ids() {
            pool.refresh_host_demand(host_id);
        }
        entries
    }

    /// Collects all over-utilized active hosts.
    fn detect(&mut self, time: f64, pool: &ResourcePool) -> BTreeSet<u32> {
        let mut over = BTreeSet::new();
        for host_id in pool.host_ids() {
            if !pool.host(host_id).is_active() {
                continue;
            }
            if self.host_overloaded(time, pool, host_id) {
                over.insert(host_id);
            }
        }
        over
    }

    fn host_overloaded(&mut self, time: f64, pool: &ResourcePool, host_id: u32) -> bool {
        let host = pool.host(host_id);
        let sample = HostSample {
            host_id,
            demand_ratio: host.demand_ratio(),
            history: &host.util_history,
            max_migration_time: pool.host_max_migration_time(host_id),
        };
        self.detector.is_overloaded(time, &sample)
    }

    /// Evacuates over-utilized hosts one VM at a time and finds replacements.
    fn evacuate_and_replace_vms(
        &mut self,
        time: f64,
        pool: &mut ResourcePool,
        over: &BTreeSet<u32>,
    ) -> Vec<MigrationMapEntry> {
        let mut evacuated: Vec<(u32, u32)> = Vec::new();
        for host_id in over {
            loop {
                if !self.host_overloaded(time, pool, *host_id) {
                    break;
                }
                let candidates: Vec<MigrationCandidate> = pool
                    .host(*host_id)
                    .vms
                    .iter()
                    .filter(|vm_id| {
                        let vm = pool.vm(**vm_id);
                        !vm.in_migration && !vm.in_waiting
                    })
                    .map(|vm_id| MigrationCandidate {
                        uid: pool.vm(*vm_id).uid(),
                        entity_id: *vm_id,
                        ram: pool.vm(*vm_id).spec.ram,
                        requested_mips: pool.vm_requested_mips(*vm_id),
                    })
                    .collect();
                let chosen = match self.vm_selection.select(&candidates) {
                    Some(idx) => candidates[idx].entity_id,
                    None => break,
                };
                pool.unplace_vm(chosen);
                pool.refresh_host_demand(*host_id);
                evacuated.push((chosen, *host_id));
            }
        }

        let mut entries = Vec::new();
        for (vm_id, source_host) in evacuated {
            let candidates = self.host_candidates_for_vm(time, pool, vm_id, over);
            if let Some(dest_host) = self.placement.select_host(&candidates) {
                if pool.place_vm(vm_id, dest_host) {
                    pool.refresh_host_demand(dest_host);
                    entries.push(MigrationMapEntry {
                        workload: WorkloadRef::Vm(vm_id),
                        source: Some(source_host),
                        dest_host,
                        dest_vm: None,
                        requires_new_owner: false,
                        new_owner_spec: None,
                    });
                }
            }
            // Unplaced VMs stay evacuated speculatively and are put back
            // by the snapshot restore.
        }
        entries
    }

    /// Container-granularity counterpart of `evacuate_and_replace_vms`.
    fn evacuate_and_replace_containers(
        &mut self,
        time: f64,
        pool: &mut ResourcePool,
        over: &BTreeSet<u32>,
    ) -> Vec<MigrationMapEntry> {
        let mut evacuated: Vec<(u32, u32)> = Vec::new();
        for host_id in over {
            loop {
                if !self.host_overloaded(time, pool, *host_id) {
                    break;
                }
                let mut candidates: Vec<MigrationCandidate> = Vec::new();
                for vm_id in &pool.host(*host_id).vms {
                    let vm = pool.vm(*vm_id);
                    if vm.in_migration || vm.in_waiting {
                        continue;
                    }
                    for container_id in &vm.containers {
                        let container = pool.container(*container_id);
                        if container.in_migration {
                            continue;
                        }
                        candidates.push(MigrationCandidate {
                            uid: container.uid(),
                            entity_id: *container_id,
                            ram: container.spec.ram,
                            requested_mips: container.requested_mips(),
                        });
                    }
                }
                let chosen = match self.container_selection.select(&candidates) {
                    Some(idx) => candidates[idx].entity_id,
                    None => break,
                };
                let source_vm = pool
                    .container_vm(chosen)
                    .unwrap_or_else(|| panic!("container {} has no placement", chosen));
                pool.unplace_container(chosen);
                pool.refresh_host_demand(*host_id);
                evacuated.push((chosen, source_vm));
            }
        }

        let mut entries = Vec::new();
        for (container_id, source_vm) in evacuated {
            let candidates = self.host_candidates_for_container(time, pool, container_id, over);
            let dest_host = match self.placement.select_host(&candidates) {
                Some(host_id) => host_id,
                None => continue,
            };
            match self.dest_vm_on_host(pool, dest_host, container_id) {
                Some(dest_vm) => {
                    if pool.place_container(container_id, dest_vm) {
                        pool.refresh_host_demand(dest_host);
                        entries.push(MigrationMapEntry {
                            workload: WorkloadRef::Container(container_id),
                            source: Some(source_vm),
                            dest_host,
                            dest_vm: Some(dest_vm),
                            requires_new_owner: false,
                            new_owner_spec: None,
                        });
                    }
                }
                None => {
                    let spec = new_owner_spec(&pool.container(container_id).spec);
                    entries.push(MigrationMapEntry {
                        workload: WorkloadRef::Container(container_id),
                        source: Some(source_vm),
                        dest_host,
                        dest_vm: None,
                        requires_new_owner: true,
                        new_owner_spec: Some(spec),
                    });
                }
            }
        }
        entries
    }

    /// Drains the least-loaded hosts entirely onto other hosts.
    ///
    /// Consolidation always moves whole VMs, in both planner modes. The attempt
    /// for one host is all-or-nothing: if any of its VMs cannot be placed, the
    /// speculative placements of that host's VMs are rolled back.
    fn consolidate(
        &mut self,
        time: f64,
        pool: &mut ResourcePool,
        over: &BTreeSet<u32>,
        chosen_dests: &mut BTreeSet<u32>,
    ) -> Vec<MigrationMapEntry> {
        let mut entries = Vec::new();
        let mut skipped: BTreeSet<u32> = BTreeSet::new();
        let mut drained: BTreeSet<u32> = BTreeSet::new();
        loop {
            let mut excluded: BTreeSet<u32> = over.clone();
            excluded.extend(chosen_dests.iter());
            excluded.extend(drained.iter());
            for host_id in pool.host_ids() {
                if pool.host(host_id).demand_ratio() == 0. {
                    excluded.insert(host_id);
                }
            }

            let source = pool
                .host_ids()
                .into_iter()
                .filter(|host_id| {
                    if excluded.contains(host_id) || skipped.contains(host_id) {
                        return false;
                    }
                    let host = pool.host(*host_id);
                    if !host.is_active() || host.vms.is_empty() || !host.vms_migrating_in.is_empty() {
                        return false;
                    }
                    host.vms.iter().all(|vm_id| {
                        let vm = pool.vm(*vm_id);
                        !vm.in_migration && !vm.in_waiting
                    })
                })
                .min_by(|a, b| pool.host(*a).demand_ratio().total_cmp(&pool.host(*b).demand_ratio()));
            let source = match source {
                Some(host_id) => host_id,
                None => break,
            };

            let vm_list = pool.host(source).vms.clone();
            for vm_id in &vm_list {
                pool.unplace_vm(*vm_id);
            }
            pool.refresh_host_demand(source);
            excluded.insert(source);

            let mut placed: Vec<(u32, u32)> = Vec::new();
            let mut complete = true;
            for vm_id in &vm_list {
                let candidates = self.host_candidates_for_vm(time, pool, *vm_id, &excluded);
                match self.placement.select_host(&candidates) {
                    Some(dest_host) if pool.place_vm(*vm_id, dest_host) => {
                        pool.refresh_host_demand(dest_host);
                        placed.push((*vm_id, dest_host));
                    }
                    _ => {
                        complete = false;
                        break;
                    }
                }
            }

            if complete {
                for (vm_id, dest_host) in placed {
                    chosen_dests.insert(dest_host);
                    entries.push(MigrationMapEntry {
                        workload: WorkloadRef::Vm(vm_id),
                        source: Some(source),
                        dest_host,
                        dest_vm: None,
                        requires_new_owner: false,
                        new_owner_spec: None,
                    });
                }
                drained.insert(source);
            } else {
                for (vm_id, dest_host) in placed {
                    pool.unplace_vm(vm_id);
                    pool.refresh_host_demand(dest_host);
                }
                for vm_id in &vm_list {
                    if !pool.place_vm(*vm_id, source) {
                        panic!("restore failed: cannot re-create assignment of vm {} to host {}", vm_id, source);
                    }
                }
                pool.refresh_host_demand(source);
                skipped.insert(source);
            }
        }
        entries
    }

    /// Builds placement facts for an unplaced VM against all allowed hosts.
    ///
    /// Probes each suitable host by speculatively placing the VM, asking the
    /// overload detector, and removing it again.
    fn host_candidates_for_vm(
        &mut self,
        time: f64,
        pool: &mut ResourcePool,
        vm_id: u32,
        excluded: &BTreeSet<u32>,
    ) -> Vec<HostCandidate> {
        let uid = pool.vm(vm_id).uid();
        let spec = pool.vm(vm_id).spec.clone();
        let mut candidates = Vec::new();
        for host_id in pool.host_ids() {
            if excluded.contains(&host_id) || !pool.host(host_id).is_active() {
                continue;
            }
            let mut suitable = pool.can_host_fit_vm(host_id, uid, &spec) == AllocationVerdict::Success;
            let mut would_overload = false;
            let mut power_increase = 0.;
            let allocated_cpu = pool.host(host_id).cpu.allocated();
            if suitable {
                let before_ratio = pool.host(host_id).demand_ratio();
                if pool.place_vm(vm_id, host_id) {
                    let after_ratio = pool.refresh_host_demand(host_id);
                    would_overload = self.host_overloaded(time, pool, host_id);
                    pool.unplace_vm(vm_id);
                    pool.refresh_host_demand(host_id);
                    let host = pool.host(host_id);
                    power_increase =
                        host.power(time, after_ratio.min(1.)) - host.power(time, before_ratio.min(1.));
                } else {
                    suitable = false;
                }
            }
            candidates.push(HostCandidate {
                host_id,
                suitable,
                would_overload,
                power_increase,
                allocated_cpu,
            });
        }
        candidates
    }

    /// Builds placement facts for an unplaced container against all allowed hosts.
    ///
    /// A host is suitable if one of its VMs can admit the container, or if the
    /// host itself can admit a new VM sized for the container.
    fn host_candidates_for_container(
        &mut self,
        time: f64,
        pool: &ResourcePool,
        container_id: u32,
        excluded: &BTreeSet<u32>,
    ) -> Vec<HostCandidate> {
        let uid = pool.container(container_id).uid();
        let spec = pool.container(container_id).spec.clone();
        let requested = pool.container(container_id).requested_mips();
        let owner_spec = new_owner_spec(&spec);
        let mut candidates = Vec::new();
        for host_id in pool.host_ids() {
            if excluded.contains(&host_id) || !pool.host(host_id).is_active() {
                continue;
            }
            let fits_existing_vm = self.dest_vm_on_host(pool, host_id, container_id).is_some();
            let fits_new_vm = pool.can_host_fit_vm(host_id, uid, &owner_spec) == AllocationVerdict::Success;
            let suitable = fits_existing_vm || fits_new_vm;
            let mut would_overload = false;
            let mut power_increase = 0.;
            let host = pool.host(host_id);
            if suitable {
                let before_ratio = host.demand_ratio();
                let after_ratio = (pool.host_requested_mips(host_id) + requested) / host.total_mips();
                let sample = HostSample {
                    host_id,
                    demand_ratio: after_ratio,
                    history: &host.util_history,
                    max_migration_time: pool.host_max_migration_time(host_id),
                };
                would_overload = self.detector.is_overloaded(time, &sample);
                power_increase = host.power(time, after_ratio.min(1.)) - host.power(time, before_ratio.min(1.));
            }
            candidates.push(HostCandidate {
                host_id,
                suitable,
                would_overload,
                power_increase,
                allocated_cpu: host.cpu.allocated(),
            });
        }
        candidates
    }

    /// Finds the first VM on the host that can admit the container.
    fn dest_vm_on_host(&self, pool: &ResourcePool, host_id: u32, container_id: u32) -> Option<u32> {
        let uid = pool.container(container_id).uid();
        let spec = &pool.container(container_id).spec;
        for vm_id in &pool.host(host_id).vms {
            if pool.vm(*vm_id).in_migration {
                continue;
            }
            if pool.can_vm_fit_container(*vm_id, uid, spec) == AllocationVerdict::Success {
                return Some(*vm_id);
            }
        }
        None
    }
}

/// Sizes a VM to be created for a single migrated container.
fn new_owner_spec(spec: &ContainerSpec) -> VmSpec {
    VmSpec {
        cores: spec.cores,
        core_mips: spec.core_mips,
        ram: spec.ram,
        bandwidth: spec.bandwidth,
        size: spec.ram,
    }
}
