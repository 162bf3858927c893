//! Result of checking whether a host can accommodate a VM.

use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Per-resource fit of a VM on a host.
///
/// Each flag tells whether the host has enough of the corresponding resource. Flags that were not evaluated
/// (because of lazy evaluation) stay `false`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Suitability {
    pub for_storage: bool,
    pub for_ram: bool,
    pub for_bw: bool,
    pub for_pes: bool,
}

impl Suitability {
    /// Suitability with all flags set.
    pub fn full() -> Self {
        Self {
            for_storage: true,
            for_ram: true,
            for_bw: true,
            for_pes: true,
        }
    }

    /// Suitability with no flag set, e.g. when there is no host to evaluate.
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns `true` if the VM fits the host in every resource dimension.
    pub fn fully(&self) -> bool {
        self.for_storage && self.for_ram && self.for_bw && self.for_pes
    }

    /// Returns names of the resources that are not sufficient.
    pub fn missing_resources(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.for_storage {
            missing.push("storage");
        }
        if !self.for_ram {
            missing.push("ram");
        }
        if !self.for_bw {
            missing.push("bw");
        }
        if !self.for_pes {
            missing.push("pes");
        }
        missing
    }
}

impl Display for Suitability {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.fully() {
            write!(f, "suitable")
        } else {
            write!(f, "lack of {}", self.missing_resources().join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Suitability::full().to_string(), "suitable");
        let s = Suitability {
            for_storage: true,
            for_ram: false,
            for_bw: true,
            for_pes: false,
        };
        assert!(!s.fully());
        assert_eq!(s.to_string(), "lack of ram, pes");
    }
}
