//! Standard simulation events.
//!
//! All payloads are plain keyed records passed in-process through the event
//! kernel; there is no wire format.

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;

use crate::core::container::ContainerSpec;
use crate::core::workload_model::WorkloadModel;

/// The recurring datacenter control-loop tick.
#[derive(Clone, Serialize)]
pub struct DatacenterTick {}

/// Request to run one container, carried by [`ContainerSubmit`].
#[derive(Clone)]
pub struct ContainerRequest {
    pub owner_id: u32,
    pub spec: ContainerSpec,
    pub workload: Box<dyn WorkloadModel>,
}

impl Serialize for ContainerRequest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ContainerRequest", 2)?;
        state.serialize_field("owner_id", &self.owner_id)?;
        state.serialize_field("spec", &self.spec)?;
        state.end()
    }
}

/// Submission of a batch of containers for placement.
#[derive(Clone, Serialize)]
pub struct ContainerSubmit {
    pub requests: Vec<ContainerRequest>,
}

/// Placement outcome reported back to the submitter.
#[derive(Clone, Serialize)]
pub struct ContainerCreateAck {
    pub container_id: u32,
    pub vm_id: u32,
    pub host_id: u32,
    pub succeeded: bool,
}

/// Start-up completion of a VM created for a pending container migration.
#[derive(Clone, Serialize)]
pub struct VmCreate {
    pub vm_id: u32,
}

#[derive(Clone, Serialize)]
pub struct VmCreateAck {
    pub vm_id: u32,
    pub host_id: u32,
    pub succeeded: bool,
}

/// Commit of an in-flight VM migration after the simulated transfer delay.
#[derive(Clone, Serialize)]
pub struct VmMigrate {
    pub vm_id: u32,
    pub source_host: u32,
    pub dest_host: u32,
}

/// Commit of an in-flight container migration.
#[derive(Clone, Serialize)]
pub struct ContainerMigrate {
    pub container_id: u32,
    pub source_vm: Option<u32>,
    pub dest_vm: u32,
}
