//! Datacenter component: event handling and the recurring control loop.

use std::cell::RefCell;
use std::rc::Rc;

use dslab_core::{cast, event::EventId, Event, EventHandler, SimulationContext};

use crate::core::capacity_scheduler::{split_capacity, ShareRequest};
use crate::core::common::{IdAllocator, NO_EVENT};
use crate::core::config::SimulationConfig;
use crate::core::container::{Container, ContainerSpec};
use crate::core::events::{
    ContainerCreateAck, ContainerMigrate, ContainerRequest, ContainerSubmit, DatacenterTick, VmCreate, VmCreateAck,
    VmMigrate,
};
use crate::core::host::Host;
use crate::core::logger::Logger;
use crate::core::migration_planner::{MigrationMapEntry, MigrationPlanner, WorkloadRef};
use crate::core::power_model::{ConstantPowerModel, LinearPowerModel, PowerModel};
use crate::core::resource_pool::ResourcePool;
use crate::core::utilization::StateLogEntry;
use crate::core::vm::{Vm, VmSpec};
use crate::core::workload_model::WorkloadModel;

/// Central component of the simulation.
///
/// Owns the resource pool and the migration planner, handles container
/// submissions and migration commits, and drives the recurring control-loop
/// tick. At most one tick event is pending at any simulated time; it is
/// cancelled and rescheduled whenever an earlier wake-up becomes necessary.
pub struct Datacenter {
    pool: ResourcePool,
    planner: MigrationPlanner,
    id_allocator: IdAllocator,
    pending_tick: Option<EventId>,
    has_workload: bool,
    ctx: SimulationContext,
    sim_config: Rc<SimulationConfig>,
    logger: Rc<RefCell<Box<dyn Logger>>>,
}

impl Datacenter {
    pub fn new(ctx: SimulationContext, sim_config: Rc<SimulationConfig>, logger: Rc<RefCell<Box<dyn Logger>>>) -> Self {
        Self {
            pool: ResourcePool::new(),
            planner: MigrationPlanner::new(&sim_config),
            id_allocator: IdAllocator::new(),
            pending_tick: None,
            has_workload: false,
            ctx,
            sim_config,
            logger,
        }
    }

    pub fn id(&self) -> u32 {
        self.ctx.id()
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ResourcePool {
        &mut self.pool
    }

    pub fn planner(&mut self) -> &mut MigrationPlanner {
        &mut self.planner
    }

    /// Registers a new host and returns its id.
    pub fn add_host(
        &mut self,
        cores: u32,
        core_mips: f64,
        ram: f64,
        bandwidth: f64,
        storage: f64,
        max_power: Option<f64>,
    ) -> u32 {
        let host_id = self.id_allocator.next();
        let power_model: Box<dyn PowerModel> = match max_power {
            Some(max_power) => Box::new(LinearPowerModel::new(max_power)),
            None => Box::new(ConstantPowerModel::new(0.)),
        };
        self.pool
            .add_host(Host::new(host_id, cores, core_mips, ram, bandwidth, storage, power_model));
        self.logger.borrow_mut().log_debug(
            &self.ctx,
            format!("created host {} with {} cores of capacity {}", host_id, cores, core_mips),
        );
        host_id
    }

    /// Creates a VM directly on the given host, bypassing the placement policy.
    pub fn spawn_vm_on(&mut self, host_id: u32, spec: VmSpec) -> Option<u32> {
        let vm_id = self.id_allocator.next();
        self.pool.add_vm(Vm::new(vm_id, self.ctx.id(), spec));
        if !self.pool.place_vm(vm_id, host_id) {
            self.logger.borrow_mut().log_warn(
                &self.ctx,
                format!("not enough resources on host {} for vm {}", host_id, vm_id),
            );
            self.pool.remove_vm(vm_id);
            return None;
        }
        self.pool.refresh_host_demand(host_id);
        Some(vm_id)
    }

    /// Creates a container directly inside the given VM, bypassing the placement policy.
    pub fn spawn_container_on(
        &mut self,
        vm_id: u32,
        spec: ContainerSpec,
        workload: Box<dyn WorkloadModel>,
    ) -> Option<u32> {
        let container_id = self.id_allocator.next();
        self.pool
            .add_container(Container::new(container_id, self.ctx.id(), spec, workload));
        if !self.pool.place_container(container_id, vm_id) {
            self.logger.borrow_mut().log_warn(
                &self.ctx,
                format!("not enough resources on vm {} for container {}", vm_id, container_id),
            );
            self.pool.remove_container(container_id);
            return None;
        }
        if let Some(host_id) = self.pool.vm_host(vm_id) {
            self.pool.refresh_host_demand(host_id);
        }
        self.has_workload = true;
        self.ensure_tick();
        Some(container_id)
    }

    /// Marks a host as failed or repaired. Failed hosts are skipped by
    /// detection and never receive placements; their workloads are not
    /// evacuated automatically.
    pub fn set_host_failed(&mut self, host_id: u32, failed: bool) {
        self.pool.host_mut(host_id).failed = failed;
        self.logger.borrow_mut().log_warn(
            &self.ctx,
            format!("host {} is now {}", host_id, if failed { "failed" } else { "active" }),
        );
    }

    /// Schedules an immediate tick unless one is already pending.
    pub fn ensure_tick(&mut self) {
        if self.pending_tick.is_none() {
            self.pending_tick = Some(self.ctx.emit_self(DatacenterTick {}, 0.));
        }
    }

    fn on_tick(&mut self) {
        self.pending_tick = None;
        if !self.has_workload {
            self.schedule_next_tick(NO_EVENT);
            return;
        }
        let next_event_time = self.process_workloads();
        if !self.sim_config.disable_migrations {
            let plan = self.planner.optimize(self.ctx.time(), &mut self.pool);
            self.execute_plan(plan);
        }
        self.schedule_next_tick(next_event_time);
    }

    /// Runs the capacity scheduling cascade over every host, VM and container.
    ///
    /// Returns the earliest predicted workload completion time or [`NO_EVENT`].
    fn process_workloads(&mut self) -> f64 {
        let time = self.ctx.time();
        let mut next_event_time = NO_EVENT;
        let mut finished: Vec<u32> = Vec::new();
        for host_id in self.pool.host_ids() {
            let (vm_ids, host_capacity) = {
                let host = self.pool.host(host_id);
                let ids: Vec<(u32, bool)> = host
                    .vms
                    .iter()
                    .map(|id| (*id, false))
                    .chain(host.vms_migrating_in.iter().map(|id| (*id, true)))
                    .collect();
                (ids, host.total_mips())
            };
            let mut requests: Vec<ShareRequest> = Vec::new();
            for (vm_id, migrating_in) in &vm_ids {
                let vm = self.pool.vm(*vm_id);
                requests.push(ShareRequest {
                    uid: vm.uid(),
                    entity_id: *vm_id,
                    requested: self.pool.vm_requested_mips(*vm_id),
                    in_migration: vm.in_migration || *migrating_in,
                    migrating_in: *migrating_in,
                });
            }
            let shares = split_capacity(host_capacity, &requests);
            let host_requested: f64 = requests.iter().map(|r| r.requested).sum();
            let mut host_allocated = 0.;
            for (request, share) in requests.iter().zip(shares.iter()) {
                host_allocated += share;
                let vm_next = self.process_vm(time, request.entity_id, *share, &mut finished);
                next_event_time = next_event_time.min(vm_next);
            }
            let load = (host_allocated / host_capacity).min(1.);
            let host = self.pool.host_mut(host_id);
            host.util_history.record(load);
            host.update_energy(time, load);
            let active = host.is_active();
            host.state_log.record(StateLogEntry {
                time,
                allocated: host_allocated,
                requested: host_requested,
                flag: active,
            });
            host.set_demand_ratio(host_requested / host_capacity);
        }
        self.finish_instantiation();
        self.destroy_finished(finished);
        next_event_time
    }

    fn process_vm(&mut self, time: f64, vm_id: u32, allocated: f64, finished: &mut Vec<u32>) -> f64 {
        let mut next_event_time = NO_EVENT;
        let (container_ids, vm_capacity) = {
            let vm = self.pool.vm(vm_id);
            let ids: Vec<(u32, bool)> = vm
                .containers
                .iter()
                .map(|id| (*id, false))
                .chain(vm.containers_migrating_in.iter().map(|id| (*id, true)))
                .collect();
            (ids, vm.total_mips())
        };
        let mut requests: Vec<ShareRequest> = Vec::new();
        for (container_id, migrating_in) in &container_ids {
            let container = self.pool.container(*container_id);
            requests.push(ShareRequest {
                uid: container.uid(),
                entity_id: *container_id,
                requested: container.requested_mips(),
                in_migration: container.in_migration || *migrating_in,
                migrating_in: *migrating_in,
            });
        }
        let vm_requested: f64 = requests.iter().map(|r| r.requested).sum();
        let shares = split_capacity(allocated.min(vm_capacity), &requests);
        let mut vm_allocated = 0.;
        for (request, share) in requests.iter().zip(shares.iter()) {
            vm_allocated += share;
            let container = self.pool.container_mut(request.entity_id);
            container.allocated_mips = *share;
            let completion = container.workload.update_processing(time, *share);
            if completion > time {
                next_event_time = next_event_time.min(completion);
            }
            let rated = container.total_mips();
            container.util_history.record((*share / rated).min(1.));
            let in_migration = container.in_migration;
            container.state_log.record(StateLogEntry {
                time,
                allocated: *share,
                requested: request.requested,
                flag: in_migration,
            });
            if container.is_finished() && !container.in_migration {
                finished.push(request.entity_id);
            }
        }
        let vm = self.pool.vm_mut(vm_id);
        vm.allocated_mips = allocated;
        vm.util_history.record((vm_allocated / vm.total_mips()).min(1.));
        let in_migration = vm.in_migration;
        vm.state_log.record(StateLogEntry {
            time,
            allocated: vm_allocated,
            requested: vm_requested,
            flag: in_migration,
        });
        next_event_time
    }

    /// Instantiation ends with the first processing pass an entity takes part in.
    fn finish_instantiation(&mut self) {
        for vm_id in self.pool.vm_ids() {
            self.pool.vm_mut(vm_id).being_instantiated = false;
        }
        for container_id in self.pool.container_ids() {
            self.pool.container_mut(container_id).being_instantiated = false;
        }
    }

    /// Destroys finished containers and VMs whose container count dropped to zero.
    fn destroy_finished(&mut self, finished: Vec<u32>) {
        if finished.is_empty() {
            return;
        }
        for container_id in finished {
            if !self.pool.contains_container(container_id) {
                continue;
            }
            let owner_vm = self.pool.container_vm(container_id);
            self.logger
                .borrow_mut()
                .log_info(&self.ctx, format!("container {} finished and is destroyed", container_id));
            self.pool.unplace_container(container_id);
            self.pool.remove_container(container_id);
            if let Some(vm_id) = owner_vm {
                let vm = self.pool.vm(vm_id);
                if vm.containers.is_empty()
                    && vm.containers_migrating_in.is_empty()
                    && !vm.in_migration
                    && !vm.in_waiting
                {
                    self.logger
                        .borrow_mut()
                        .log_info(&self.ctx, format!("vm {} has no containers left and is destroyed", vm_id));
                    self.pool.unplace_vm(vm_id);
                    self.pool.remove_vm(vm_id);
                }
            }
        }
        for host_id in self.pool.host_ids() {
            self.pool.refresh_host_demand(host_id);
        }
    }

    /// Starts the simulated transfer of every planned migration.
    fn execute_plan(&mut self, plan: Vec<MigrationMapEntry>) {
        for entry in plan {
            match entry.workload {
                WorkloadRef::Vm(vm_id) => self.start_vm_migration(vm_id, &entry),
                WorkloadRef::Container(container_id) => self.start_container_migration(container_id, &entry),
            }
        }
    }

    fn start_vm_migration(&mut self, vm_id: u32, entry: &MigrationMapEntry) {
        let source_host = match entry.source {
            Some(host_id) => host_id,
            None => return,
        };
        if !self.pool.begin_vm_migration(vm_id, entry.dest_host) {
            self.logger.borrow_mut().log_warn(
                &self.ctx,
                format!(
                    "not enough resources on host {} to migrate vm {}, migration dropped",
                    entry.dest_host, vm_id
                ),
            );
            return;
        }
        let delay = self.pool.vm(vm_id).migration_time();
        self.logger.borrow_mut().log_info(
            &self.ctx,
            format!(
                "started migration of vm {} from host {} to host {}, delay {:.3}",
                vm_id, source_host, entry.dest_host, delay
            ),
        );
        self.ctx.emit_self(
            VmMigrate {
                vm_id,
                source_host,
                dest_host: entry.dest_host,
            },
            delay,
        );
    }

    fn start_container_migration(&mut self, container_id: u32, entry: &MigrationMapEntry) {
        if entry.requires_new_owner {
            let spec = match &entry.new_owner_spec {
                Some(spec) => spec.clone(),
                None => return,
            };
            let vm_id = self.id_allocator.next();
            let mut vm = Vm::new(vm_id, self.ctx.id(), spec);
            vm.in_waiting = true;
            self.pool.add_vm(vm);
            if !self.pool.place_vm(vm_id, entry.dest_host) {
                self.logger.borrow_mut().log_warn(
                    &self.ctx,
                    format!(
                        "not enough resources on host {} for new vm {}, migration of container {} dropped",
                        entry.dest_host, vm_id, container_id
                    ),
                );
                self.pool.remove_vm(vm_id);
                return;
            }
            if !self.pool.begin_container_migration(container_id, vm_id) {
                self.logger.borrow_mut().log_warn(
                    &self.ctx,
                    format!(
                        "not enough resources on new vm {} for container {}, migration dropped",
                        vm_id, container_id
                    ),
                );
                return;
            }
            self.logger.borrow_mut().log_info(
                &self.ctx,
                format!(
                    "started two-phase migration of container {} to new vm {} on host {}",
                    container_id, vm_id, entry.dest_host
                ),
            );
            let vm_delay = self.sim_config.vm_start_delay;
            self.ctx.emit_self(VmCreate { vm_id }, vm_delay);
            self.ctx.emit_self(
                ContainerMigrate {
                    container_id,
                    source_vm: entry.source,
                    dest_vm: vm_id,
                },
                vm_delay + self.sim_config.container_start_delay,
            );
        } else {
            let dest_vm = match entry.dest_vm {
                Some(vm_id) => vm_id,
                None => return,
            };
            if !self.pool.begin_container_migration(container_id, dest_vm) {
                self.logger.borrow_mut().log_warn(
                    &self.ctx,
                    format!(
                        "not enough resources on vm {} to migrate container {}, migration dropped",
                        dest_vm, container_id
                    ),
                );
                return;
            }
            self.logger.borrow_mut().log_info(
                &self.ctx,
                format!("started migration of container {} to vm {}", container_id, dest_vm),
            );
            self.ctx.emit_self(
                ContainerMigrate {
                    container_id,
                    source_vm: entry.source,
                    dest_vm,
                },
                self.sim_config.container_migration_delay,
            );
        }
    }

    fn on_submit(&mut self, requests: Vec<ContainerRequest>, from: u32) {
        let time = self.ctx.time();
        self.has_workload = true;
        for request in requests {
            let container_id = self.id_allocator.next();
            self.pool
                .add_container(Container::new(container_id, request.owner_id, request.spec, request.workload));
            let destination = self.planner.find_container_destination(time, &mut self.pool, container_id);
            let placed = match destination {
                Some((host_id, Some(vm_id))) => {
                    if self.pool.place_container(container_id, vm_id) {
                        Some((host_id, vm_id))
                    } else {
                        None
                    }
                }
                Some((host_id, None)) => self.create_owner_vm(container_id, host_id).map(|vm_id| (host_id, vm_id)),
                None => None,
            };
            match placed {
                Some((host_id, vm_id)) => {
                    self.pool.refresh_host_demand(host_id);
                    self.logger.borrow_mut().log_info(
                        &self.ctx,
                        format!("placed container {} into vm {} on host {}", container_id, vm_id, host_id),
                    );
                    self.ctx.emit_now(
                        ContainerCreateAck {
                            container_id,
                            vm_id,
                            host_id,
                            succeeded: true,
                        },
                        from,
                    );
                }
                None => {
                    self.logger.borrow_mut().log_warn(
                        &self.ctx,
                        format!("no suitable host for container {}, submission rejected", container_id),
                    );
                    self.pool.remove_container(container_id);
                    self.ctx.emit_now(
                        ContainerCreateAck {
                            container_id,
                            vm_id: 0,
                            host_id: 0,
                            succeeded: false,
                        },
                        from,
                    );
                }
            }
        }
        self.ensure_tick();
    }

    /// Creates a fresh VM sized for the container and places both.
    fn create_owner_vm(&mut self, container_id: u32, host_id: u32) -> Option<u32> {
        let spec = self.pool.container(container_id).spec.clone();
        let vm_spec = VmSpec {
            cores: spec.cores,
            core_mips: spec.core_mips,
            ram: spec.ram,
            bandwidth: spec.bandwidth,
            size: spec.ram,
        };
        let vm_id = self.id_allocator.next();
        self.pool.add_vm(Vm::new(vm_id, self.ctx.id(), vm_spec));
        if !self.pool.place_vm(vm_id, host_id) {
            self.pool.remove_vm(vm_id);
            return None;
        }
        if !self.pool.place_container(container_id, vm_id) {
            self.pool.unplace_vm(vm_id);
            self.pool.remove_vm(vm_id);
            return None;
        }
        self.ctx.emit_self(VmCreate { vm_id }, self.sim_config.vm_start_delay);
        Some(vm_id)
    }

    fn on_vm_created(&mut self, vm_id: u32, from: u32) {
        if !self.pool.contains_vm(vm_id) {
            self.logger
                .borrow_mut()
                .log_warn(&self.ctx, format!("vm create event for unknown vm {}, dropped", vm_id));
            return;
        }
        self.pool.vm_mut(vm_id).being_instantiated = false;
        self.logger
            .borrow_mut()
            .log_debug(&self.ctx, format!("vm {} started", vm_id));
        if from != self.ctx.id() {
            let host_id = self.pool.vm_host(vm_id).unwrap_or(0);
            self.ctx.emit_now(
                VmCreateAck {
                    vm_id,
                    host_id,
                    succeeded: true,
                },
                from,
            );
        }
    }

    fn on_vm_migrated(&mut self, vm_id: u32, source_host: u32, dest_host: u32) {
        if !self.pool.contains_vm(vm_id) || !self.pool.commit_vm_migration(vm_id, source_host, dest_host) {
            self.logger.borrow_mut().log_warn(
                &self.ctx,
                format!(
                    "stale migration commit for vm {} (host {} to {}), dropped",
                    vm_id, source_host, dest_host
                ),
            );
            return;
        }
        self.pool.refresh_host_demand(source_host);
        self.pool.refresh_host_demand(dest_host);
        self.logger.borrow_mut().log_info(
            &self.ctx,
            format!("vm {} migrated from host {} to host {}", vm_id, source_host, dest_host),
        );
    }

    fn on_container_migrated(&mut self, container_id: u32, dest_vm: u32) {
        if !self.pool.contains_container(container_id)
            || !self.pool.contains_vm(dest_vm)
            || !self.pool.commit_container_migration(container_id, dest_vm)
        {
            self.logger.borrow_mut().log_warn(
                &self.ctx,
                format!(
                    "stale migration commit for container {} (to vm {}), dropped",
                    container_id, dest_vm
                ),
            );
            return;
        }
        self.pool.vm_mut(dest_vm).in_waiting = false;
        if let Some(host_id) = self.pool.vm_host(dest_vm) {
            self.pool.refresh_host_demand(host_id);
        }
        self.logger.borrow_mut().log_info(
            &self.ctx,
            format!("container {} migrated to vm {}", container_id, dest_vm),
        );
    }

    fn schedule_next_tick(&mut self, next_event_time: f64) {
        if let Some(event_id) = self.pending_tick.take() {
            self.ctx.cancel_event(event_id);
        }
        let interval = self.sim_config.scheduling_interval;
        let delay = if next_event_time == NO_EVENT {
            interval
        } else {
            interval.max(next_event_time - self.ctx.time())
        };
        self.pending_tick = Some(self.ctx.emit_self(DatacenterTick {}, delay));
    }
}

impl EventHandler for Datacenter {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            DatacenterTick {} => {
                self.on_tick();
            }
            ContainerSubmit { requests } => {
                self.on_submit(requests, event.src);
            }
            VmCreate { vm_id } => {
                self.on_vm_created(vm_id, event.src);
            }
            VmMigrate {
                vm_id,
                source_host,
                dest_host,
            } => {
                self.on_vm_migrated(vm_id, source_host, dest_host);
            }
            ContainerMigrate {
                container_id,
                source_vm: _,
                dest_vm,
            } => {
                self.on_container_migrated(container_id, dest_vm);
            }
        })
    }
}
