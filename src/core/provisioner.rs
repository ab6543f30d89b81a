//! Capacity ledgers for the resources of one host or VM.

use std::collections::BTreeMap;

use crate::core::common::WorkloadUid;

/// Ledger for one divisible resource kind (RAM or bandwidth) on one owner.
///
/// Tracks total capacity and per-workload allocations keyed by workload UID.
/// `allocate` and `deallocate` must be called in matched pairs per workload;
/// `deallocate` of an unknown UID is a no-op, so releasing twice is safe.
#[derive(Clone, Debug)]
pub struct ResourceProvisioner {
    capacity: f64,
    available: f64,
    allocations: BTreeMap<WorkloadUid, f64>,
}

impl ResourceProvisioner {
    pub fn new(capacity: f64) -> Self {
        Self {
            capacity,
            available: capacity,
            allocations: BTreeMap::new(),
        }
    }

    /// Records the allocation if the remaining capacity allows it.
    /// Returns `false` without side effects otherwise.
    /// An existing allocation for the same workload is replaced, not added up.
    pub fn allocate(&mut self, uid: WorkloadUid, amount: f64) -> bool {
        let prev = self.allocations.get(&uid).copied().unwrap_or(0.);
        if amount > self.available + prev {
            return false;
        }
        self.available += prev;
        self.available -= amount;
        self.allocations.insert(uid, amount);
        true
    }

    /// Releases the workload's allocation and returns the released amount.
    pub fn deallocate(&mut self, uid: WorkloadUid) -> f64 {
        match self.allocations.remove(&uid) {
            Some(amount) => {
                self.available += amount;
                amount
            }
            None => 0.,
        }
    }

    /// Non-mutating variant of the `allocate` check, used for speculative placement tests.
    pub fn is_suitable(&self, uid: WorkloadUid, amount: f64) -> bool {
        let prev = self.allocations.get(&uid).copied().unwrap_or(0.);
        amount <= self.available + prev
    }

    pub fn allocated_for(&self, uid: WorkloadUid) -> f64 {
        self.allocations.get(&uid).copied().unwrap_or(0.)
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn available(&self) -> f64 {
        self.available
    }

    pub fn allocated(&self) -> f64 {
        self.capacity - self.available
    }
}

/// Ledger for compute capacity, which is split into per-core shares.
///
/// In addition to the total capacity check, rejects any allocation where a
/// single per-core share exceeds the rated capacity of one processing element.
#[derive(Clone, Debug)]
pub struct ComputeProvisioner {
    cores: u32,
    core_capacity: f64,
    available: f64,
    allocations: BTreeMap<WorkloadUid, Vec<f64>>,
}

impl ComputeProvisioner {
    pub fn new(cores: u32, core_capacity: f64) -> Self {
        Self {
            cores,
            core_capacity,
            available: cores as f64 * core_capacity,
            allocations: BTreeMap::new(),
        }
    }

    pub fn allocate(&mut self, uid: WorkloadUid, shares: &[f64]) -> bool {
        if !self.is_suitable(uid, shares) {
            return false;
        }
        let prev: f64 = self.allocated_for(uid);
        self.available += prev;
        self.available -= shares.iter().sum::<f64>();
        self.allocations.insert(uid, shares.to_vec());
        true
    }

    pub fn deallocate(&mut self, uid: WorkloadUid) -> f64 {
        match self.allocations.remove(&uid) {
            Some(shares) => {
                let total: f64 = shares.iter().sum();
                self.available += total;
                total
            }
            None => 0.,
        }
    }

    pub fn is_suitable(&self, uid: WorkloadUid, shares: &[f64]) -> bool {
        if shares.iter().any(|s| *s > self.core_capacity) {
            return false;
        }
        let prev = self.allocated_for(uid);
        shares.iter().sum::<f64>() <= self.available + prev
    }

    pub fn allocated_for(&self, uid: WorkloadUid) -> f64 {
        self.allocations.get(&uid).map(|s| s.iter().sum()).unwrap_or(0.)
    }

    pub fn cores(&self) -> u32 {
        self.cores
    }

    pub fn core_capacity(&self) -> f64 {
        self.core_capacity
    }

    pub fn capacity(&self) -> f64 {
        self.cores as f64 * self.core_capacity
    }

    pub fn available(&self) -> f64 {
        self.available
    }

    pub fn allocated(&self) -> f64 {
        self.capacity() - self.available
    }
}
