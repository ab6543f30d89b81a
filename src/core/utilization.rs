//! Bounded utilization history and append-only state logs.

use std::collections::VecDeque;

use serde::Serialize;

/// Default number of samples kept by [`UtilizationHistory`].
pub const HISTORY_LENGTH: usize = 30;

/// Bounded ring buffer of per-tick CPU utilization fractions.
///
/// The most recent sample is at position 0; when the buffer is full
/// the oldest sample is dropped.
#[derive(Clone, Debug, Default)]
pub struct UtilizationHistory {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl UtilizationHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_LENGTH)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, value: f64) {
        self.samples.push_front(value);
        self.samples.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns up to `n` most recent samples, most recent first.
    pub fn recent(&self, n: usize) -> Vec<f64> {
        self.samples.iter().take(n).copied().collect()
    }

    /// Number of consecutive non-zero samples counting from the most recent one.
    pub fn leading_nonzero(&self) -> usize {
        self.samples.iter().take_while(|v| **v > 0.).count()
    }
}

/// One record of the observable per-entity state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateLogEntry {
    pub time: f64,
    pub allocated: f64,
    pub requested: f64,
    /// `active` for hosts, `in_migration` for workloads.
    pub flag: bool,
}

/// Append-only log of entity state used for audit.
///
/// A new entry at an already-logged timestamp replaces the last entry
/// instead of duplicating it.
#[derive(Clone, Debug, Default)]
pub struct StateLog {
    entries: Vec<StateLogEntry>,
}

impl StateLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: StateLogEntry) {
        if let Some(last) = self.entries.last_mut() {
            if last.time == entry.time {
                *last = entry;
                return;
            }
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[StateLogEntry] {
        &self.entries
    }
}
