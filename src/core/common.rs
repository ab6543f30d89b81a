//! Common types shared across the simulation core.

use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Sentinel time value returned when no future event is predicted.
pub const NO_EVENT: f64 = f64::MAX;

/// Identity of a workload (VM or container) as seen by capacity ledgers.
///
/// Two workloads with the same owner and entity id are considered the same workload,
/// so this pair is used as the allocation map key and equality surrogate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct WorkloadUid {
    pub owner: u32,
    pub id: u32,
}

impl WorkloadUid {
    pub fn new(owner: u32, id: u32) -> Self {
        Self { owner, id }
    }
}

impl Display for WorkloadUid {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}-{}", self.owner, self.id)
    }
}

/// Result of a capacity check performed before an allocation attempt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AllocationVerdict {
    Success,
    NotEnoughStorage,
    NotEnoughRam,
    NotEnoughBandwidth,
    NotEnoughCpu,
    ShareExceedsCoreCapacity,
    HostNotFound,
}

/// Allocator of entity ids, reset at simulation start.
///
/// All entities (hosts, VMs, containers) draw from a single id space,
/// so an id unambiguously names one entity. Ids start at 1; id 0 is used
/// as the "no entity" placeholder in rejection acks.
#[derive(Debug)]
pub struct IdAllocator {
    next_id: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    pub fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allocator_starts_at_one() {
        assert_eq!(IdAllocator::default().next(), 1);
        assert_eq!(IdAllocator::new().next(), 1);
    }
}
