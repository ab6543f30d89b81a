//! Algorithms selecting a destination host for a workload.

use dyn_clone::{clone_trait_object, DynClone};

use crate::core::config::parse_config_value;

/// Per-host facts gathered for one placement decision.
///
/// `suitable` and `would_overload` are precomputed by the caller because they
/// require speculative capacity probes against the resource pool.
#[derive(Clone, Debug)]
pub struct HostCandidate {
    pub host_id: u32,
    /// Whether all resource ledgers of the host can admit the workload.
    pub suitable: bool,
    /// Whether admitting the workload would push the host past its threshold.
    pub would_overload: bool,
    /// Estimated power draw increase from admitting the workload.
    pub power_increase: f64,
    /// Compute capacity already allocated on the host.
    pub allocated_cpu: f64,
}

impl HostCandidate {
    fn admissible(&self) -> bool {
        self.suitable && !self.would_overload
    }
}

/// Picks the destination host among candidates that can admit the workload.
pub trait PlacementAlgorithm: DynClone {
    fn select_host(&self, candidates: &[HostCandidate]) -> Option<u32>;
}

clone_trait_object!(PlacementAlgorithm);

/// Takes the first admissible host in list order.
#[derive(Clone, Default)]
pub struct FirstFit;

impl PlacementAlgorithm for FirstFit {
    fn select_host(&self, candidates: &[HostCandidate]) -> Option<u32> {
        candidates.iter().find(|c| c.admissible()).map(|c| c.host_id)
    }
}

/// Takes the admissible host with the most compute already allocated,
/// packing workloads densely.
#[derive(Clone, Default)]
pub struct BestFit;

impl PlacementAlgorithm for BestFit {
    fn select_host(&self, candidates: &[HostCandidate]) -> Option<u32> {
        let mut best: Option<&HostCandidate> = None;
        for candidate in candidates.iter().filter(|c| c.admissible()) {
            match best {
                Some(current) if current.allocated_cpu >= candidate.allocated_cpu => {}
                _ => best = Some(candidate),
            }
        }
        best.map(|c| c.host_id)
    }
}

/// Takes the admissible host whose power draw grows the least.
#[derive(Clone, Default)]
pub struct PowerAware;

impl PlacementAlgorithm for PowerAware {
    fn select_host(&self, candidates: &[HostCandidate]) -> Option<u32> {
        let mut best: Option<&HostCandidate> = None;
        for candidate in candidates.iter().filter(|c| c.admissible()) {
            match best {
                Some(current) if current.power_increase <= candidate.power_increase => {}
                _ => best = Some(candidate),
            }
        }
        best.map(|c| c.host_id)
    }
}

/// Creates the placement algorithm described by a config string.
pub fn placement_algorithm_resolver(config_str: &str) -> Box<dyn PlacementAlgorithm> {
    let (name, _) = parse_config_value(config_str);
    match name.as_str() {
        "FirstFit" => Box::new(FirstFit),
        "BestFit" => Box::new(BestFit),
        "PowerAware" => Box::new(PowerAware),
        _ => panic!("Can't resolve placement algorithm: {}", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(host_id: u32, suitable: bool, would_overload: bool, power: f64, cpu: f64) -> HostCandidate {
        HostCandidate {
            host_id,
            suitable,
            would_overload,
            power_increase: power,
            allocated_cpu: cpu,
        }
    }

    #[test]
    fn first_fit_skips_unsuitable_and_overloading() {
        let candidates = vec![
            candidate(1, false, false, 1., 0.),
            candidate(2, true, true, 1., 0.),
            candidate(3, true, false, 1., 0.),
            candidate(4, true, false, 1., 0.),
        ];
        assert_eq!(FirstFit.select_host(&candidates), Some(3));
    }

    #[test]
    fn best_fit_prefers_packed_host() {
        let candidates = vec![
            candidate(1, true, false, 1., 1000.),
            candidate(2, true, false, 1., 3000.),
            candidate(3, true, false, 1., 2000.),
        ];
        assert_eq!(BestFit.select_host(&candidates), Some(2));
    }

    #[test]
    fn power_aware_prefers_cheapest_host_and_breaks_ties_by_order() {
        let candidates = vec![
            candidate(1, true, false, 30., 0.),
            candidate(2, true, false, 10., 0.),
            candidate(3, true, false, 10., 0.),
        ];
        assert_eq!(PowerAware.select_host(&candidates), Some(2));
    }

    #[test]
    fn no_admissible_host_yields_none() {
        let candidates = vec![candidate(1, false, false, 1., 0.), candidate(2, true, true, 1., 0.)];
        assert_eq!(PowerAware.select_host(&candidates), None);
    }
}
