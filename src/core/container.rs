//! Representation of a container, the leaf workload unit.

use serde::Serialize;

use crate::core::common::WorkloadUid;
use crate::core::utilization::{StateLog, UtilizationHistory};
use crate::core::workload_model::WorkloadModel;

/// Resource requirements of a container.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContainerSpec {
    pub cores: u32,
    pub core_mips: f64,
    pub ram: f64,
    pub bandwidth: f64,
}

impl ContainerSpec {
    pub fn total_mips(&self) -> f64 {
        self.cores as f64 * self.core_mips
    }
}

/// Leaf workload unit running inside a VM.
///
/// The actual job queue lives behind the boxed [`WorkloadModel`]; the container
/// only relays allocated capacity to it and tracks lifecycle flags.
pub struct Container {
    pub id: u32,
    pub owner_id: u32,
    pub spec: ContainerSpec,
    pub workload: Box<dyn WorkloadModel>,
    /// True until the first processing tick after creation.
    pub being_instantiated: bool,
    pub in_migration: bool,
    /// Compute capacity allocated by the VM on the last processing pass.
    pub allocated_mips: f64,
    pub util_history: UtilizationHistory,
    pub state_log: StateLog,
}

impl Container {
    pub fn new(id: u32, owner_id: u32, spec: ContainerSpec, workload: Box<dyn WorkloadModel>) -> Self {
        Self {
            id,
            owner_id,
            spec,
            workload,
            being_instantiated: true,
            in_migration: false,
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

    /// Compute capacity currently requested by the container: its rated maximum
    /// while being instantiated, the raw workload demand afterwards. The demand
    /// may exceed the rated maximum; the capacity scheduler resolves the
    /// oversubscription by proportional scaling.
    pub fn requested_mips(&self) -> f64 {
        if self.being_instantiated {
            self.total_mips()
        } else {
            self.workload.requested_mips()
        }
    }

    pub fn is_finished(&self) -> bool {
        self.workload.is_finished()
    }
}
