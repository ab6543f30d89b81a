//! Policies selecting which workload to evict from an overloaded host.

use dyn_clone::{clone_trait_object, DynClone};

use crate::core::common::WorkloadUid;
use crate::core::config::parse_config_value;

/// A workload (VM or container) eligible for eviction.
#[derive(Clone, Debug)]
pub struct MigrationCandidate {
    pub uid: WorkloadUid,
    pub entity_id: u32,
    /// RAM footprint, proportional to migration transfer time.
    pub ram: f64,
    pub requested_mips: f64,
}

/// Picks one workload to evict from a non-empty candidate list.
pub trait SelectionPolicy: DynClone {
    /// Returns the index of the chosen candidate, or `None` if the list is empty.
    fn select(&self, candidates: &[MigrationCandidate]) -> Option<usize>;
}

clone_trait_object!(SelectionPolicy);

/// Evicts the workload with the smallest RAM footprint, i.e. the one whose
/// migration finishes fastest.
#[derive(Clone, Default)]
pub struct MinimumMigrationTime;

impl SelectionPolicy for MinimumMigrationTime {
    fn select(&self, candidates: &[MigrationCandidate]) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (idx, candidate) in candidates.iter().enumerate() {
            match best {
                Some(best_idx) if candidates[best_idx].ram <= candidate.ram => {}
                _ => best = Some(idx),
            }
        }
        best
    }
}

/// Evicts the workload with the highest compute demand, freeing the most
/// capacity per migration.
#[derive(Clone, Default)]
pub struct MaximumDemand;

impl SelectionPolicy for MaximumDemand {
    fn select(&self, candidates: &[MigrationCandidate]) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (idx, candidate) in candidates.iter().enumerate() {
            match best {
                Some(best_idx) if candidates[best_idx].requested_mips >= candidate.requested_mips => {}
                _ => best = Some(idx),
            }
        }
        best
    }
}

/// Creates the selection policy described by a config string.
pub fn selection_policy_resolver(config_str: &str) -> Box<dyn SelectionPolicy> {
    let (name, _) = parse_config_value(config_str);
    match name.as_str() {
        "MinimumMigrationTime" => Box::new(MinimumMigrationTime),
        "MaximumDemand" => Box::new(MaximumDemand),
        _ => panic!("Can't resolve selection policy: {}", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u32, ram: f64, mips: f64) -> MigrationCandidate {
        MigrationCandidate {
            uid: WorkloadUid::new(1, id),
            entity_id: id,
            ram,
            requested_mips: mips,
        }
    }

    #[test]
    fn minimum_migration_time_picks_least_ram() {
        let candidates = vec![candidate(1, 512., 100.), candidate(2, 128., 900.), candidate(3, 256., 50.)];
        assert_eq!(MinimumMigrationTime.select(&candidates), Some(1));
    }

    #[test]
    fn maximum_demand_picks_highest_mips() {
        let candidates = vec![candidate(1, 512., 100.), candidate(2, 128., 900.), candidate(3, 256., 50.)];
        assert_eq!(MaximumDemand.select(&candidates), Some(1));
    }

    #[test]
    fn ties_break_by_list_order() {
        let candidates = vec![candidate(7, 256., 100.), candidate(8, 256., 100.)];
        assert_eq!(MinimumMigrationTime.select(&candidates), Some(0));
        assert_eq!(MaximumDemand.select(&candidates), Some(0));
    }

    #[test]
    fn empty_list_yields_none() {
        assert_eq!(MinimumMigrationTime.select(&[]), None);
    }
}
