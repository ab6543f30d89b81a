//! Time-shared splitting of compute capacity among child workloads.

use crate::core::common::WorkloadUid;

/// Fraction of the allocated share withheld from a workload that is migrating out.
pub const MIGRATION_PENALTY: f64 = 0.1;

/// One child's compute demand as seen by the capacity scheduler.
#[derive(Clone, Debug)]
pub struct ShareRequest {
    pub uid: WorkloadUid,
    /// Entity id of the child workload.
    pub entity_id: u32,
    /// Requested compute capacity (rated maximum while the child is being instantiated).
    pub requested: f64,
    pub in_migration: bool,
    /// Set for the incoming half of a migration. Incoming workloads come from the
    /// owner's migrating-in index, never from the main child list, so a migrating
    /// workload can never be counted twice on one owner.
    pub migrating_in: bool,
}

/// Splits the owner's total compute capacity among children in proportion to
/// their requests, allowing time-shared oversubscription.
///
/// Workloads migrating out receive a fixed 10% penalty on the allocated share;
/// the incoming half of a migration is exempt. Returns allocated shares in the
/// order of `requests`.
pub fn split_capacity(total_capacity: f64, requests: &[ShareRequest]) -> Vec<f64> {
    let total_requested: f64 = requests.iter().map(|r| r.requested).sum();
    let scale = if total_requested > total_capacity && total_requested > 0. {
        total_capacity / total_requested
    } else {
        1.
    };
    requests
        .iter()
        .map(|r| {
            let mut share = r.requested * scale;
            if r.in_migration && !r.migrating_in {
                share *= 1. - MIGRATION_PENALTY;
            }
            share
        })
        .collect()
}
