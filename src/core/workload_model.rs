//! Container CPU workload models.
//!
//! A workload model stands in for the CPU-share scheduler that owns the actual
//! job queue of a container. The simulation core consumes it through this
//! narrow interface only: it reports the currently requested compute capacity
//! and, given the capacity actually allocated, predicts when the workload
//! completes.

use dyn_clone::{clone_trait_object, DynClone};

use crate::core::common::NO_EVENT;

pub trait WorkloadModel: DynClone {
    /// Advances the workload to `time`, accounting the compute capacity allocated
    /// since the previous call, and stores the allocation used from now on.
    ///
    /// Returns the predicted completion time or [`NO_EVENT`].
    fn update_processing(&mut self, time: f64, allocated_mips: f64) -> f64;

    /// Compute capacity currently requested by the workload.
    fn requested_mips(&self) -> f64;

    fn is_finished(&self) -> bool;
}

clone_trait_object!(WorkloadModel);

/// Workload with constant compute demand that never completes.
#[derive(Clone)]
pub struct ConstantWorkload {
    demand: f64,
}

impl ConstantWorkload {
    pub fn new(demand: f64) -> Self {
        Self { demand }
    }
}

impl WorkloadModel for ConstantWorkload {
    fn update_processing(&mut self, _time: f64, _allocated_mips: f64) -> f64 {
        NO_EVENT
    }

    fn requested_mips(&self) -> f64 {
        self.demand
    }

    fn is_finished(&self) -> bool {
        false
    }
}

/// Workload with a fixed total amount of compute work.
///
/// Demands `demand` capacity until `total_work` is processed, then reports completion.
#[derive(Clone)]
pub struct FiniteWorkload {
    demand: f64,
    remaining_work: f64,
    prev_time: f64,
    prev_allocated: f64,
    finished: bool,
}

impl FiniteWorkload {
    pub fn new(demand: f64, total_work: f64) -> Self {
        Self {
            demand,
            remaining_work: total_work,
            prev_time: 0.,
            prev_allocated: 0.,
            finished: false,
        }
    }
}

impl WorkloadModel for FiniteWorkload {
    fn update_processing(&mut self, time: f64, allocated_mips: f64) -> f64 {
        if self.finished {
            return NO_EVENT;
        }
        self.remaining_work -= self.prev_allocated * (time - self.prev_time);
        self.prev_time = time;
        self.prev_allocated = allocated_mips;
        if self.remaining_work <= 1e-9 {
            self.remaining_work = 0.;
            self.finished = true;
            return time;
        }
        if allocated_mips > 0. {
            time + self.remaining_work / allocated_mips
        } else {
            NO_EVENT
        }
    }

    fn requested_mips(&self) -> f64 {
        if self.finished {
            0.
        } else {
            self.demand
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}
