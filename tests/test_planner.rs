//! Tests of the migration planner and the end-to-end migration flow.

use dslab_core::simulation::Simulation;

use dslab_caas::core::config::{HostConfig, SimulationConfig};
use dslab_caas::core::container::{Container, ContainerSpec};
use dslab_caas::core::host::Host;
use dslab_caas::core::migration_planner::{MigrationPlanner, WorkloadRef};
use dslab_caas::core::power_model::LinearPowerModel;
use dslab_caas::core::resource_pool::ResourcePool;
use dslab_caas::core::vm::{Vm, VmSpec};
use dslab_caas::core::workload_model::ConstantWorkload;
use dslab_caas::simulation::CloudSimulation;

fn host_config(cores: u32, core_mips: f64) -> HostConfig {
    HostConfig {
        cores,
        core_mips,
        ram: 16384.,
        bandwidth: 4_000_000.,
        storage: 100000.,
        max_power: Some(400.),
        count: None,
    }
}

fn config_with_hosts(hosts: Vec<HostConfig>) -> SimulationConfig {
    let mut config = SimulationConfig::new();
    config.hosts = hosts;
    config
}

/// VM with a 10-second migration transfer time (1000 / (1600000 / 2 / 8000)).
fn vm_spec(cores: u32, core_mips: f64) -> VmSpec {
    VmSpec {
        cores,
        core_mips,
        ram: 1000.,
        bandwidth: 1_600_000.,
        size: 1000.,
    }
}

fn container_spec(cores: u32, core_mips: f64) -> ContainerSpec {
    ContainerSpec {
        cores,
        core_mips,
        ram: 100.,
        bandwidth: 10.,
    }
}

fn pool_host(id: u32) -> Host {
    Host::new(id, 4, 1000., 16384., 4_000_000., 100000., Box::new(LinearPowerModel::new(400.)))
}

/// Places a settled VM with one constant-demand container on the host.
fn settled_vm(pool: &mut ResourcePool, vm_id: u32, host_id: u32, cores: u32, demand: f64) {
    let spec = VmSpec {
        cores,
        core_mips: 1000.,
        ram: 1000.,
        bandwidth: 1_600_000.,
        size: 1000.,
    };
    pool.add_vm(Vm::new(vm_id, 1, spec));
    assert!(pool.place_vm(vm_id, host_id));
    pool.vm_mut(vm_id).being_instantiated = false;
    let container_id = vm_id + 10;
    pool.add_container(Container::new(
        container_id,
        1,
        ContainerSpec {
            cores,
            core_mips: 1000.,
            ram: 100.,
            bandwidth: 10.,
        },
        Box::new(ConstantWorkload::new(demand)),
    ));
    assert!(pool.place_container(container_id, vm_id));
    pool.container_mut(container_id).being_instantiated = false;
}

#[test]
fn overloaded_host_sheds_exactly_one_vm() {
    let sim = Simulation::new(123);
    let config = config_with_hosts(vec![host_config(4, 1000.), host_config(4, 1000.)]);
    let mut cloud = CloudSimulation::new(sim, config);

    // Two VMs demanding 2100 mips each oversubscribe the 4000-mips host.
    let vm_a = cloud.spawn_vm_on(1, vm_spec(2, 1000.)).unwrap();
    let vm_b = cloud.spawn_vm_on(1, vm_spec(2, 1000.)).unwrap();
    for vm in [vm_a, vm_b] {
        cloud
            .spawn_container_on(vm, container_spec(2, 1000.), Box::new(ConstantWorkload::new(2100.)))
            .unwrap();
    }

    // Mid-transfer the VM still resides on the source host.
    cloud.step_for_duration(5.);
    assert_eq!(cloud.vm_location(vm_a), Some(1));
    {
        let datacenter = cloud.datacenter();
        let datacenter = datacenter.borrow();
        assert!(datacenter.pool().vm(vm_a).in_migration);
        assert!(!datacenter.pool().vm(vm_b).in_migration);
    }

    // The 10-second transfer commits and the load evens out.
    cloud.step_for_duration(6.);
    assert_eq!(cloud.vm_location(vm_a), Some(2));
    assert_eq!(cloud.vm_location(vm_b), Some(1));
    assert!((cloud.host_demand_ratio(1) - 0.525).abs() < 1e-9);
    assert!((cloud.host_demand_ratio(2) - 0.525).abs() < 1e-9);

    // Every detector evaluation of the overloaded host was recorded.
    let datacenter = cloud.datacenter();
    let mut datacenter = datacenter.borrow_mut();
    let records = datacenter.planner().detector().detection_log().records(1);
    assert!(!records.is_empty());
    assert_eq!(records[0].threshold, 0.8);
    assert_eq!(records[0].utilization, 1.);
}

#[test]
fn migration_destinations_avoid_overloaded_hosts() {
    let config = SimulationConfig::new();
    let mut planner = MigrationPlanner::new(&config);
    let mut pool = ResourcePool::new();
    for host_id in 1..=3 {
        pool.add_host(pool_host(host_id));
    }
    // Hosts 1 and 2 run at full demand, host 3 is empty.
    for (vm_id, host_id) in [(11, 1), (12, 1), (13, 2), (14, 2)] {
        pool.add_vm(Vm::new(vm_id, 1, vm_spec(2, 1000.)));
        assert!(pool.place_vm(vm_id, host_id));
    }
    for host_id in 1..=3 {
        pool.refresh_host_demand(host_id);
    }

    let before = pool.snapshot();
    let plan = planner.optimize(0., &mut pool);

    // Only one eviction fits: the second one would overload host 3 in turn.
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].workload, WorkloadRef::Vm(11));
    assert_eq!(plan[0].source, Some(1));
    assert_eq!(plan[0].dest_host, 3);
    for entry in &plan {
        assert!(entry.dest_host != 1 && entry.dest_host != 2);
    }
    // Planning is speculative: the live assignment table is unchanged.
    assert_eq!(pool.snapshot(), before);
}

#[test]
fn underutilized_host_is_drained_for_consolidation() {
    let config = SimulationConfig::new();
    let mut planner = MigrationPlanner::new(&config);
    let mut pool = ResourcePool::new();
    pool.add_host(pool_host(1));
    pool.add_host(pool_host(2));
    settled_vm(&mut pool, 11, 1, 2, 2000.);
    settled_vm(&mut pool, 12, 2, 2, 400.);
    pool.refresh_host_demand(1);
    pool.refresh_host_demand(2);

    let plan = planner.optimize(0., &mut pool);
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].workload, WorkloadRef::Vm(12));
    assert_eq!(plan[0].source, Some(2));
    assert_eq!(plan[0].dest_host, 1);
}

#[test]
fn partial_consolidation_is_rolled_back() {
    let config = SimulationConfig::new();
    let mut planner = MigrationPlanner::new(&config);
    let mut pool = ResourcePool::new();
    pool.add_host(pool_host(1));
    pool.add_host(pool_host(2));
    // Host 2 holds two VMs; only one of them would fit next to the VM on host 1.
    settled_vm(&mut pool, 11, 1, 2, 2000.);
    settled_vm(&mut pool, 12, 2, 2, 400.);
    settled_vm(&mut pool, 13, 2, 2, 100.);
    pool.refresh_host_demand(1);
    pool.refresh_host_demand(2);

    let before = pool.snapshot();
    let plan = planner.optimize(0., &mut pool);
    assert!(plan.is_empty());
    assert_eq!(pool.snapshot(), before);
}

#[test]
fn failed_host_never_receives_placements() {
    let config = SimulationConfig::new();
    let mut planner = MigrationPlanner::new(&config);
    let mut pool = ResourcePool::new();
    pool.add_host(pool_host(1));
    pool.add_host(pool_host(2));
    for vm_id in [11, 12] {
        pool.add_vm(Vm::new(vm_id, 1, vm_spec(2, 1000.)));
        assert!(pool.place_vm(vm_id, 1));
    }
    pool.host_mut(2).failed = true;
    pool.refresh_host_demand(1);
    pool.refresh_host_demand(2);

    // Host 1 is overloaded, but the only other host is down.
    let plan = planner.optimize(0., &mut pool);
    assert!(plan.is_empty());
}

#[test]
fn container_migration_to_a_new_vm_is_two_phase() {
    let sim = Simulation::new(123);
    let mut config = config_with_hosts(vec![host_config(4, 1000.), host_config(4, 1000.)]);
    config.planner_mode = "Container".to_string();
    let mut cloud = CloudSimulation::new(sim, config);

    // One VM with two heavy containers saturates the first host.
    let vm = cloud.spawn_vm_on(1, vm_spec(4, 1000.)).unwrap();
    let first = cloud
        .spawn_container_on(vm, container_spec(2, 1000.), Box::new(ConstantWorkload::new(2000.)))
        .unwrap();
    let second = cloud
        .spawn_container_on(vm, container_spec(2, 1000.), Box::new(ConstantWorkload::new(2000.)))
        .unwrap();
    let new_vm = second + 1;

    // The destination VM is created and waiting before the container moves.
    cloud.step_for_duration(0.75);
    assert_eq!(cloud.vm_location(new_vm), Some(2));
    assert_eq!(cloud.container_location(first), Some(vm));
    {
        let datacenter = cloud.datacenter();
        let datacenter = datacenter.borrow();
        assert!(datacenter.pool().vm(new_vm).in_waiting);
    }

    // After the VM start delay (1.0) the VM is up, the container still in flight.
    cloud.step_for_duration(0.5);
    {
        let datacenter = cloud.datacenter();
        let datacenter = datacenter.borrow();
        assert!(!datacenter.pool().vm(new_vm).being_instantiated);
    }
    assert_eq!(cloud.container_location(first), Some(vm));

    // The commit lands only after the container start delay on top (1.5).
    cloud.step_for_duration(0.5);
    assert_eq!(cloud.container_location(first), Some(new_vm));
    assert_eq!(cloud.container_location(second), Some(vm));
    {
        let datacenter = cloud.datacenter();
        let datacenter = datacenter.borrow();
        assert!(!datacenter.pool().vm(new_vm).in_waiting);
    }
    assert_eq!(cloud.host_demand_ratio(1), 0.5);
    assert_eq!(cloud.host_demand_ratio(2), 0.5);
}
