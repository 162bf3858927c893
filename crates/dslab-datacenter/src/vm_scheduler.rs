//! Sharing of host PEs between VMs.

use std::collections::HashMap;

use dyn_clone::{clone_trait_object, DynClone};

use crate::config::parse_config_value;
use crate::error::{DatacenterError, Result};
use crate::pe::{PeList, PeStatus};
use crate::vm::Vm;

/// Trait for implementation of VM schedulers which decide how host PEs are shared between VMs.
///
/// The scheduler does not own the PEs, the host passes its PE list to every call.
pub trait VmScheduler: DynClone {
    /// Checks whether the requested MIPS of all VM PEs can be allocated right now.
    fn is_suitable_for_vm(&self, pes: &PeList, vm: &Vm) -> bool;

    /// Allocates the MIPS share (one value per VM PE) on host PEs. Returns `false` and changes nothing on failure.
    fn allocate_pes_for_vm(&mut self, pes: &mut PeList, vm_id: u32, mips_share: &[u64]) -> bool;

    /// Releases all MIPS allocated to the VM.
    fn deallocate_pes_from_vm(&mut self, pes: &mut PeList, vm_id: u32);

    /// Returns the MIPS share currently allocated to the VM (empty if there is none).
    fn allocated_mips(&self, vm_id: u32) -> Vec<u64>;

    /// Returns the MIPS still available on working PEs.
    fn total_available_mips(&self, pes: &PeList) -> u64;
}

clone_trait_object!(VmScheduler);

#[derive(Clone, Default)]
struct PeMapping {
    shares: HashMap<u32, Vec<u64>>,
    pe_indices: HashMap<u32, Vec<usize>>,
}

impl PeMapping {
    /// Maps each virtual PE to a host PE greedily, returns per-PE totals in the order of PE indices.
    ///
    /// With `exclusive` set every virtual PE needs its own PE which is not used by other VMs.
    fn map_vpes(pes: &PeList, vm_id: u32, requested: &[u64], exclusive: bool) -> Option<Vec<(usize, u64)>> {
        if requested.is_empty() {
            return None;
        }
        let mut totals: Vec<u64> = vec![0; pes.len()];
        for &mips in requested {
            let found = (0..pes.len()).find(|&i| {
                let pe = pes.get(i);
                if !pe.is_working() {
                    return false;
                }
                let provisioner = pe.provisioner();
                let owned = provisioner.allocated_resource_for_vm(vm_id);
                if exclusive {
                    let taken_by_other = provisioner.allocated() > owned;
                    totals[i] == 0 && !taken_by_other && mips <= pe.capacity()
                } else {
                    totals[i] + mips <= provisioner.available() + owned
                }
            });
            match found {
                Some(i) => totals[i] += mips,
                None => return None,
            }
        }
        Some(
            totals
                .into_iter()
                .enumerate()
                .filter(|(_, total)| *total > 0)
                .collect(),
        )
    }

    fn allocate(&mut self, pes: &mut PeList, vm_id: u32, mips_share: &[u64], exclusive: bool) -> bool {
        let mapping = match Self::map_vpes(pes, vm_id, mips_share, exclusive) {
            Some(mapping) => mapping,
            None => return false,
        };
        self.deallocate(pes, vm_id);
        let mut indices = Vec::with_capacity(mapping.len());
        for (index, total) in mapping {
            pes.get_mut(index).provisioner_mut().allocate_resource_for_vm(vm_id, total);
            pes.refresh_status(index);
            indices.push(index);
        }
        self.shares.insert(vm_id, mips_share.to_vec());
        self.pe_indices.insert(vm_id, indices);
        true
    }

    fn deallocate(&mut self, pes: &mut PeList, vm_id: u32) {
        self.shares.remove(&vm_id);
        if let Some(indices) = self.pe_indices.remove(&vm_id) {
            for index in indices {
                pes.get_mut(index).provisioner_mut().deallocate_resource_for_vm(vm_id);
                pes.refresh_status(index);
            }
        }
    }

    fn allocated_mips(&self, vm_id: u32) -> Vec<u64> {
        self.shares.get(&vm_id).cloned().unwrap_or_default()
    }
}

fn available_mips(pes: &PeList) -> u64 {
    pes.iter()
        .filter(|pe| pe.is_working())
        .map(|pe| pe.provisioner().available())
        .sum()
}

/// Each VM PE gets a dedicated host PE, so PEs are never shared between VMs.
#[derive(Clone, Default)]
pub struct VmSchedulerSpaceShared {
    mapping: PeMapping,
}

impl VmSchedulerSpaceShared {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VmScheduler for VmSchedulerSpaceShared {
    fn is_suitable_for_vm(&self, pes: &PeList, vm: &Vm) -> bool {
        PeMapping::map_vpes(pes, vm.id, &vm.requested_mips_share(), true).is_some()
    }

    fn allocate_pes_for_vm(&mut self, pes: &mut PeList, vm_id: u32, mips_share: &[u64]) -> bool {
        self.mapping.allocate(pes, vm_id, mips_share, true)
    }

    fn deallocate_pes_from_vm(&mut self, pes: &mut PeList, vm_id: u32) {
        self.mapping.deallocate(pes, vm_id);
    }

    fn allocated_mips(&self, vm_id: u32) -> Vec<u64> {
        self.mapping.allocated_mips(vm_id)
    }

    fn total_available_mips(&self, pes: &PeList) -> u64 {
        // only free PEs can be given to new VMs
        pes.iter()
            .filter(|pe| pe.status() == PeStatus::Free)
            .map(|pe| pe.capacity())
            .sum()
    }
}

/// VM PEs are packed onto host PEs by remaining MIPS, so one host PE may serve several VMs.
#[derive(Clone, Default)]
pub struct VmSchedulerTimeShared {
    mapping: PeMapping,
}

impl VmSchedulerTimeShared {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VmScheduler for VmSchedulerTimeShared {
    fn is_suitable_for_vm(&self, pes: &PeList, vm: &Vm) -> bool {
        PeMapping::map_vpes(pes, vm.id, &vm.requested_mips_share(), false).is_some()
    }

    fn allocate_pes_for_vm(&mut self, pes: &mut PeList, vm_id: u32, mips_share: &[u64]) -> bool {
        self.mapping.allocate(pes, vm_id, mips_share, false)
    }

    fn deallocate_pes_from_vm(&mut self, pes: &mut PeList, vm_id: u32) {
        self.mapping.deallocate(pes, vm_id);
    }

    fn allocated_mips(&self, vm_id: u32) -> Vec<u64> {
        self.mapping.allocated_mips(vm_id)
    }

    fn total_available_mips(&self, pes: &PeList) -> u64 {
        available_mips(pes)
    }
}

pub fn vm_scheduler_resolver(config_str: &str) -> Result<Box<dyn VmScheduler>> {
    let (name, _) = parse_config_value(config_str);
    match name.as_str() {
        "SpaceShared" => Ok(Box::new(VmSchedulerSpaceShared::new())),
        "TimeShared" => Ok(Box::new(VmSchedulerTimeShared::new())),
        _ => Err(DatacenterError::InvalidArgument(format!(
            "can't resolve vm scheduler: {}",
            config_str
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::Pe;

    #[test]
    fn test_space_shared_uses_dedicated_pes() {
        let mut pes = PeList::new(Pe::uniform(2, 1000).unwrap());
        let mut scheduler = VmSchedulerSpaceShared::new();
        assert!(scheduler.allocate_pes_for_vm(&mut pes, 1, &[500]));
        assert_eq!(pes.busy_count(), 1);
        assert!(scheduler.allocate_pes_for_vm(&mut pes, 2, &[500]));
        // half of each PE is idle, but both are taken
        assert!(!scheduler.allocate_pes_for_vm(&mut pes, 3, &[500]));
        assert_eq!(scheduler.total_available_mips(&pes), 0);
        scheduler.deallocate_pes_from_vm(&mut pes, 1);
        assert_eq!(pes.free_count(), 1);
        assert!(scheduler.allocated_mips(1).is_empty());
        assert_eq!(scheduler.allocated_mips(2), vec![500]);
    }

    #[test]
    fn test_time_shared_packs_pes() {
        let mut pes = PeList::new(Pe::uniform(2, 1000).unwrap());
        let mut scheduler = VmSchedulerTimeShared::new();
        assert!(scheduler.allocate_pes_for_vm(&mut pes, 1, &[500, 500]));
        assert_eq!(pes.get(0).provisioner().allocated_resource_for_vm(1), 1000);
        assert_eq!(pes.busy_count(), 1);
        assert!(scheduler.allocate_pes_for_vm(&mut pes, 2, &[600]));
        assert!(!scheduler.allocate_pes_for_vm(&mut pes, 3, &[600]));
        assert_eq!(scheduler.total_available_mips(&pes), 400);
        // reallocation may reuse the VM's own share
        assert!(scheduler.allocate_pes_for_vm(&mut pes, 2, &[1000]));
        assert_eq!(scheduler.total_available_mips(&pes), 0);
        assert_eq!(pes.allocated_mips(), 2000);
    }

    #[test]
    fn test_failed_pes_are_skipped() {
        let mut pes = PeList::new(Pe::uniform(2, 1000).unwrap());
        pes.set_status(0, PeStatus::Failed);
        let mut scheduler = VmSchedulerTimeShared::new();
        assert_eq!(scheduler.total_available_mips(&pes), 1000);
        assert!(scheduler.allocate_pes_for_vm(&mut pes, 1, &[1000]));
        assert!(!scheduler.allocate_pes_for_vm(&mut pes, 2, &[1]));
        assert_eq!(pes.failed_count(), 1);
        assert_eq!(pes.busy_count(), 1);
    }
}
