//! Processing elements (CPU cores) of a host.

use serde::Serialize;

use crate::error::{DatacenterError, Result};
use crate::resource::ResourceProvisioner;

/// Status of processing element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PeStatus {
    Free,
    Busy,
    Failed,
}

/// Processing element (PE), a single CPU core with capacity expressed in MIPS.
///
/// The capacity is shared between VMs by means of a MIPS provisioner.
#[derive(Clone, Debug)]
pub struct Pe {
    id: u32,
    status: PeStatus,
    provisioner: ResourceProvisioner,
}

impl Pe {
    /// Creates free PE with specified capacity, fails on zero capacity.
    pub fn new(id: u32, mips: u64) -> Result<Self> {
        if mips == 0 {
            return Err(DatacenterError::InvalidArgument(format!("pe {} has zero capacity", id)));
        }
        Ok(Self {
            id,
            status: PeStatus::Free,
            provisioner: ResourceProvisioner::new(mips),
        })
    }

    /// Creates `count` identical PEs with sequential ids starting from 0.
    pub fn uniform(count: u32, mips: u64) -> Result<Vec<Pe>> {
        (0..count).map(|id| Pe::new(id, mips)).collect()
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> u64 {
        self.provisioner.capacity()
    }

    pub fn status(&self) -> PeStatus {
        self.status
    }

    pub fn is_working(&self) -> bool {
        self.status != PeStatus::Failed
    }

    pub fn provisioner(&self) -> &ResourceProvisioner {
        &self.provisioner
    }

    pub fn provisioner_mut(&mut self) -> &mut ResourceProvisioner {
        &mut self.provisioner
    }
}

/// Fixed set of PEs owned by a host.
///
/// Keeps the number of free, busy and failed PEs up to date on every status change,
/// so that counting them never requires a scan of the list.
#[derive(Clone, Debug)]
pub struct PeList {
    pes: Vec<Pe>,
    free: usize,
    busy: usize,
    failed: usize,
}

impl PeList {
    pub fn new(pes: Vec<Pe>) -> Self {
        let mut list = Self {
            pes,
            free: 0,
            busy: 0,
            failed: 0,
        };
        for i in 0..list.pes.len() {
            let status = list.pes[i].status;
            *list.counter_mut(status) += 1;
        }
        list
    }

    fn counter_mut(&mut self, status: PeStatus) -> &mut usize {
        match status {
            PeStatus::Free => &mut self.free,
            PeStatus::Busy => &mut self.busy,
            PeStatus::Failed => &mut self.failed,
        }
    }

    /// Changes status of the PE at the specified index. Returns `false` if the status was not changed.
    pub fn set_status(&mut self, index: usize, status: PeStatus) -> bool {
        let old = self.pes[index].status;
        if old == status {
            return false;
        }
        *self.counter_mut(old) -= 1;
        *self.counter_mut(status) += 1;
        self.pes[index].status = status;
        true
    }

    /// Sets the same status for all PEs.
    pub fn set_status_all(&mut self, status: PeStatus) {
        for i in 0..self.pes.len() {
            self.set_status(i, status);
        }
    }

    /// Marks the PE busy or free depending on whether it has some MIPS allocated. Failed PEs are left as is.
    pub fn refresh_status(&mut self, index: usize) {
        if self.pes[index].status == PeStatus::Failed {
            return;
        }
        let status = if self.pes[index].provisioner.allocated() > 0 {
            PeStatus::Busy
        } else {
            PeStatus::Free
        };
        self.set_status(index, status);
    }

    pub fn get(&self, index: usize) -> &Pe {
        &self.pes[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Pe {
        &mut self.pes[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pe> {
        self.pes.iter()
    }

    pub fn len(&self) -> usize {
        self.pes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pes.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.free
    }

    pub fn busy_count(&self) -> usize {
        self.busy
    }

    pub fn failed_count(&self) -> usize {
        self.failed
    }

    pub fn working_count(&self) -> usize {
        self.pes.len() - self.failed
    }

    /// Total MIPS capacity of all working PEs.
    pub fn total_mips(&self) -> u64 {
        self.pes.iter().filter(|pe| pe.is_working()).map(|pe| pe.capacity()).sum()
    }

    /// MIPS capacity of the most powerful working PE.
    pub fn max_pe_mips(&self) -> u64 {
        self.pes
            .iter()
            .filter(|pe| pe.is_working())
            .map(|pe| pe.capacity())
            .max()
            .unwrap_or(0)
    }

    /// Total MIPS allocated on all PEs.
    pub fn allocated_mips(&self) -> u64 {
        self.pes.iter().map(|pe| pe.provisioner.allocated()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_counters(list: &PeList) {
        assert_eq!(list.free_count() + list.busy_count() + list.failed_count(), list.len());
        let free = list.iter().filter(|pe| pe.status() == PeStatus::Free).count();
        let busy = list.iter().filter(|pe| pe.status() == PeStatus::Busy).count();
        assert_eq!(list.free_count(), free);
        assert_eq!(list.busy_count(), busy);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(Pe::new(0, 0).is_err());
        assert!(Pe::uniform(4, 0).is_err());
    }

    #[test]
    fn test_counters_follow_status_changes() {
        let mut list = PeList::new(Pe::uniform(8, 1000).unwrap());
        assert_eq!(list.free_count(), 8);
        let statuses = [PeStatus::Busy, PeStatus::Failed, PeStatus::Free];
        for i in 0..40 {
            list.set_status(i * 7 % 8, statuses[i % 3]);
            check_counters(&list);
        }
        list.set_status_all(PeStatus::Failed);
        assert_eq!(list.failed_count(), 8);
        assert_eq!(list.working_count(), 0);
        assert_eq!(list.total_mips(), 0);
        check_counters(&list);
    }

    #[test]
    fn test_refresh_status() {
        let mut list = PeList::new(Pe::uniform(2, 1000).unwrap());
        assert!(list.get_mut(0).provisioner_mut().allocate_resource_for_vm(1, 500));
        list.refresh_status(0);
        list.refresh_status(1);
        assert_eq!(list.get(0).status(), PeStatus::Busy);
        assert_eq!(list.get(1).status(), PeStatus::Free);
        list.set_status(1, PeStatus::Failed);
        list.refresh_status(1);
        assert_eq!(list.get(1).status(), PeStatus::Failed);
        assert_eq!(list.allocated_mips(), 500);
        assert_eq!(list.max_pe_mips(), 1000);
        check_counters(&list);
    }
}
