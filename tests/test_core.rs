//! Tests of capacity accounting, workload processing and the submission flow.

use dslab_core::simulation::Simulation;

use dslab_caas::core::capacity_scheduler::{split_capacity, ShareRequest};
use dslab_caas::core::common::WorkloadUid;
use dslab_caas::core::config::{HostConfig, SimulationConfig};
use dslab_caas::core::container::ContainerSpec;
use dslab_caas::core::events::ContainerRequest;
use dslab_caas::core::logger::FileLogger;
use dslab_caas::core::provisioner::{ComputeProvisioner, ResourceProvisioner};
use dslab_caas::core::vm::VmSpec;
use dslab_caas::core::workload_model::{ConstantWorkload, FiniteWorkload};
use dslab_caas::simulation::CloudSimulation;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn host_config(cores: u32, core_mips: f64) -> HostConfig {
    HostConfig {
        cores,
        core_mips,
        ram: 16384.,
        bandwidth: 10000.,
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

fn vm_spec(cores: u32, core_mips: f64) -> VmSpec {
    VmSpec {
        cores,
        core_mips,
        ram: 4096.,
        bandwidth: 1000.,
        size: 4096.,
    }
}

fn container_spec(cores: u32, core_mips: f64) -> ContainerSpec {
    ContainerSpec {
        cores,
        core_mips,
        ram: 1024.,
        bandwidth: 100.,
    }
}

#[test]
fn allocate_deallocate_round_trip_conserves_capacity() {
    let mut ram = ResourceProvisioner::new(4096.);
    let first = WorkloadUid::new(1, 1);
    let second = WorkloadUid::new(1, 2);

    assert!(ram.allocate(first, 1024.));
    assert!(ram.allocate(second, 2048.));
    assert_eq!(ram.available(), 1024.);
    assert_eq!(ram.allocated(), 3072.);

    // A new amount for the same workload replaces the old one.
    assert!(ram.allocate(first, 512.));
    assert_eq!(ram.available(), 1536.);
    assert_eq!(ram.allocated_for(first), 512.);

    // Rejected allocation leaves no trace.
    assert!(!ram.allocate(first, 4096.));
    assert_eq!(ram.available(), 1536.);
    assert_eq!(ram.allocated_for(first), 512.);

    assert_eq!(ram.deallocate(second), 2048.);
    assert_eq!(ram.deallocate(second), 0.);
    assert_eq!(ram.deallocate(first), 512.);
    assert_eq!(ram.available(), ram.capacity());
}

#[test]
fn compute_share_cannot_exceed_core_capacity() {
    let mut cpu = ComputeProvisioner::new(4, 1000.);
    let uid = WorkloadUid::new(1, 1);
    assert!(!cpu.allocate(uid, &[1500.]));
    assert!(cpu.allocate(uid, &[1000., 1000.]));
    assert_eq!(cpu.available(), 2000.);
    // Total fits but a single share is too large.
    assert!(!cpu.is_suitable(WorkloadUid::new(1, 2), &[1001.]));
    assert!(cpu.is_suitable(WorkloadUid::new(1, 2), &[1000., 1000.]));
}

#[test]
fn oversubscribed_capacity_splits_proportionally() {
    let request = |id: u32, requested: f64, in_migration: bool, migrating_in: bool| ShareRequest {
        uid: WorkloadUid::new(1, id),
        entity_id: id,
        requested,
        in_migration,
        migrating_in,
    };
    let shares = split_capacity(1000., &[request(1, 800., false, false), request(2, 1200., false, false)]);
    assert_eq!(shares, vec![400., 600.]);

    // No scaling when the capacity suffices.
    let shares = split_capacity(1000., &[request(1, 300., false, false), request(2, 400., false, false)]);
    assert_eq!(shares, vec![300., 400.]);

    // Migrating-out workloads lose 10%, the incoming half does not.
    let shares = split_capacity(1000., &[request(1, 400., true, false), request(2, 400., true, true)]);
    assert_eq!(shares, vec![360., 400.]);
}

#[test]
fn finite_workload_runs_to_completion_and_frees_entities() {
    init_logger();
    let sim = Simulation::new(123);
    let config = config_with_hosts(vec![host_config(4, 1000.)]);
    let mut cloud = CloudSimulation::new(sim, config);

    let host = 1;
    let vm = cloud.spawn_vm_on(host, vm_spec(2, 1000.)).unwrap();
    let container = cloud
        .spawn_container_on(vm, container_spec(1, 1000.), Box::new(FiniteWorkload::new(1000., 2000.)))
        .unwrap();

    cloud.step_for_duration(1.);
    assert_eq!(cloud.container_location(container), Some(vm));
    assert_eq!(cloud.vm_location(vm), Some(host));

    // 2000 units of work at 1000 mips complete at t = 2.
    cloud.step_for_duration(2.);
    assert_eq!(cloud.container_location(container), None);
    assert_eq!(cloud.vm_location(vm), None);
    assert_eq!(cloud.host_demand_ratio(host), 0.);
}

#[test]
fn submitted_container_gets_a_fresh_vm() {
    init_logger();
    let sim = Simulation::new(123);
    let config = config_with_hosts(vec![host_config(4, 1000.), host_config(4, 1000.)]);
    let mut cloud = CloudSimulation::new(sim, config);

    cloud.submit_containers(vec![ContainerRequest {
        owner_id: 1,
        spec: container_spec(1, 1000.),
        workload: Box::new(ConstantWorkload::new(500.)),
    }]);
    cloud.step_for_duration(2.);

    // Ids: hosts 1-2, container 3, its owner VM 4. Equal hosts tie-break
    // by list order, so the first host wins.
    let container = 3;
    let vm = 4;
    assert_eq!(cloud.container_location(container), Some(vm));
    assert_eq!(cloud.vm_location(vm), Some(1));
    assert!((cloud.host_demand_ratio(1) - 0.125).abs() < 1e-9);
    assert_eq!(cloud.host_demand_ratio(2), 0.);
}

#[test]
fn unplaceable_submission_is_rejected() {
    let sim = Simulation::new(123);
    let config = config_with_hosts(vec![host_config(1, 500.)]);
    let mut cloud = CloudSimulation::new(sim, config);

    // A 1000-mips share cannot fit on a 500-mips core.
    cloud.submit_containers(vec![ContainerRequest {
        owner_id: 1,
        spec: container_spec(1, 1000.),
        workload: Box::new(ConstantWorkload::new(500.)),
    }]);
    cloud.step_for_duration(2.);

    let container = 2;
    assert_eq!(cloud.container_location(container), None);
    let datacenter = cloud.datacenter();
    assert!(!datacenter.borrow().pool().contains_container(container));
}

#[test]
fn host_energy_is_metered_over_time() {
    init_logger();
    let sim = Simulation::new(123);
    let config = config_with_hosts(vec![host_config(4, 1000.)]);
    let mut cloud = CloudSimulation::new(sim, config);

    let host = 1;
    let vm = cloud.spawn_vm_on(host, vm_spec(2, 1000.)).unwrap();
    cloud
        .spawn_container_on(vm, container_spec(1, 1000.), Box::new(ConstantWorkload::new(500.)))
        .unwrap();
    cloud.step_for_duration(2.5);

    // t=0: the instantiating VM is served at its rated 2000 mips, load 0.5,
    // power 160 + 0.5 * 240 = 280 W. From t=1 the container demand of 500
    // gives load 0.125 and 190 W. Energy by t=2 is 280 + 190 = 470.
    assert!((cloud.host_energy_consumed(host) - 470.).abs() < 1e-6);
}

#[test]
fn demand_above_rated_capacity_is_split_proportionally() {
    init_logger();
    let sim = Simulation::new(123);
    let config = config_with_hosts(vec![host_config(4, 1000.)]);
    let mut cloud = CloudSimulation::new(sim, config);

    let vm_a = cloud.spawn_vm_on(1, vm_spec(2, 1000.)).unwrap();
    let vm_b = cloud.spawn_vm_on(1, vm_spec(2, 1000.)).unwrap();
    let mut containers = Vec::new();
    for vm in [vm_a, vm_b] {
        containers.push(
            cloud
                .spawn_container_on(vm, container_spec(2, 1000.), Box::new(ConstantWorkload::new(2100.)))
                .unwrap(),
        );
    }
    cloud.step_for_duration(1.5);

    // Two VMs demanding 2100 mips each oversubscribe the 4000-mips host:
    // the demand ratio exceeds 1 and the shares are scaled down to 2000.
    assert!((cloud.host_demand_ratio(1) - 1.05).abs() < 1e-9);
    let datacenter = cloud.datacenter();
    let datacenter = datacenter.borrow();
    for container in containers {
        assert!((datacenter.pool().container(container).allocated_mips - 2000.).abs() < 1e-9);
    }
}

#[test]
fn file_logger_saves_messages_and_state_audit() {
    let sim = Simulation::new(123);
    let config = config_with_hosts(vec![host_config(4, 1000.)]);
    let mut cloud = CloudSimulation::with_logger(sim, config, Box::new(FileLogger::new()));

    let vm = cloud.spawn_vm_on(1, vm_spec(2, 1000.)).unwrap();
    cloud
        .spawn_container_on(vm, container_spec(1, 1000.), Box::new(FiniteWorkload::new(1000., 2000.)))
        .unwrap();
    let survivor = cloud
        .spawn_container_on(vm, container_spec(1, 1000.), Box::new(ConstantWorkload::new(500.)))
        .unwrap();
    cloud.step_for_duration(2.5);

    let log_path = std::env::temp_dir().join("dslab_caas_test_log.csv");
    cloud.save_log(log_path.to_str().unwrap()).unwrap();
    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.starts_with("timestamp,component,level,message"));
    assert!(log.contains("finished and is destroyed"));

    let state_path = std::env::temp_dir().join("dslab_caas_test_state.csv");
    cloud.save_state_log(state_path.to_str().unwrap()).unwrap();
    let state = std::fs::read_to_string(&state_path).unwrap();
    assert!(state.starts_with("entity,id,time,allocated,requested,flag"));
    assert!(state.contains("host,1,"));
    assert!(state.contains(&format!("vm,{},", vm)));
    assert!(state.contains(&format!("container,{},", survivor)));
}

#[test]
fn config_is_loaded_from_yaml_with_defaults() {
    let config = SimulationConfig::from_file("tests/test-configs/two_hosts.yaml");
    assert_eq!(config.scheduling_interval, 2.);
    assert_eq!(config.overload_detector, "Mad[safety_factor=2.5,fallback_threshold=0.7]");
    assert_eq!(config.placement, "FirstFit");
    // Absent parameters fall back to their defaults.
    assert_eq!(config.vm_start_delay, 1.);
    assert_eq!(config.planner_mode, "Vm");
    assert_eq!(config.number_of_hosts(), 2);

    let sim = Simulation::new(123);
    let cloud = CloudSimulation::new(sim, config);
    assert_eq!(cloud.host_demand_ratio(1), 0.);
    assert_eq!(cloud.host_demand_ratio(2), 0.);
}

#[test]
#[should_panic(expected = "Scheduling interval must be positive")]
fn invalid_config_parameter_is_fatal() {
    SimulationConfig::from_file("tests/test-configs/bad_interval.yaml");
}
