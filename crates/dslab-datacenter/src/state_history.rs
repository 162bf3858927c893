//! Bounded logs of host and VM state over time.

use std::collections::VecDeque;

use serde::Serialize;

/// Host state sample.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HostStateHistoryEntry {
    pub time: f64,
    pub allocated_mips: f64,
    pub requested_mips: f64,
    pub active: bool,
}

/// VM state sample.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VmStateHistoryEntry {
    pub time: f64,
    pub allocated_mips: f64,
    pub requested_mips: f64,
    pub in_migration: bool,
}

/// Entry with a timestamp, so that samples taken at the same instant can be merged.
pub trait Timestamped {
    fn time(&self) -> f64;
}

impl Timestamped for HostStateHistoryEntry {
    fn time(&self) -> f64 {
        self.time
    }
}

impl Timestamped for VmStateHistoryEntry {
    fn time(&self) -> f64 {
        self.time
    }
}

/// Time-ordered log of samples with an optional bound on its length.
///
/// A disabled history ignores all samples. When the bound is reached the oldest sample is dropped.
/// A sample with the same time as the last one replaces it.
#[derive(Clone, Debug)]
pub struct StateHistory<T> {
    entries: VecDeque<T>,
    enabled: bool,
    limit: usize,
}

impl<T: Timestamped> StateHistory<T> {
    pub fn new(enabled: bool, limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            enabled,
            limit,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn add(&mut self, entry: T) {
        if !self.enabled || self.limit == 0 {
            return;
        }
        if let Some(last) = self.entries.back_mut() {
            if last.time() == entry.time() {
                *last = entry;
                return;
            }
        }
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> &VecDeque<T> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(time: f64, active: bool) -> HostStateHistoryEntry {
        HostStateHistoryEntry {
            time,
            allocated_mips: 0.,
            requested_mips: 0.,
            active,
        }
    }

    #[test]
    fn test_bounded_and_merged() {
        let mut history = StateHistory::new(true, 3);
        history.add(entry(1., true));
        history.add(entry(2., true));
        history.add(entry(2., false));
        assert_eq!(history.len(), 2);
        assert!(!history.entries()[1].active);
        history.add(entry(3., true));
        history.add(entry(4., true));
        assert_eq!(history.len(), 3);
        assert_eq!(history.entries()[0].time, 2.);
    }

    #[test]
    fn test_disabled() {
        let mut history = StateHistory::<HostStateHistoryEntry>::disabled();
        history.add(entry(1., true));
        assert!(history.is_empty());
    }
}
