//! Per-cycle selection of the registers to read.

use crate::register_map::{AddressMap, RegisterDescriptor};

/// Position of a poll cycle in the low-priority cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleState {
    pub cycle_index: u64,
    pub include_low_priority: bool,
}

/// Decides which registers take part in a poll cycle.
///
/// Registers whose topic class equals the low-priority marker are only read
/// on every `cadence`-th cycle; all others are read every cycle.
#[derive(Debug, Clone)]
pub struct CycleScheduler {
    cadence: u64,
    low_priority_class: String,
}

impl CycleScheduler {
    /// Create a scheduler. A cadence of zero is treated as one.
    pub fn new(cadence: u64, low_priority_class: impl Into<String>) -> Self {
        Self {
            cadence: cadence.max(1),
            low_priority_class: low_priority_class.into(),
        }
    }

    pub fn cadence(&self) -> u64 {
        self.cadence
    }

    /// Cadence position for a cycle index.
    pub fn state(&self, cycle_index: u64) -> CycleState {
        CycleState {
            cycle_index,
            include_low_priority: cycle_index % self.cadence == 0,
        }
    }

    /// Whether a register is read on the slower cadence.
    pub fn is_low_priority(&self, register: &RegisterDescriptor) -> bool {
        register.topic_class == self.low_priority_class
    }

    /// Registers participating in the given cycle, in ascending address order.
    pub fn select<'a>(&self, map: &'a AddressMap, cycle_index: u64) -> Vec<&'a RegisterDescriptor> {
        let state = self.state(cycle_index);
        map.iter()
            .filter(|r| state.include_low_priority || !self.is_low_priority(r))
            .collect()
    }
}
