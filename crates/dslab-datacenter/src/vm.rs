//! Virtual machine model.

use dslab_core::Id;

use crate::cloudlet_scheduler::{CloudletScheduler, CloudletSchedulerSimple};
use crate::config::ResourceDefaults;
use crate::error::{DatacenterError, Result};
use crate::state_history::{StateHistory, VmStateHistoryEntry};

/// Represents virtual machine, a tenant which requests PEs, RAM, bandwidth and storage from some host.
///
/// The VM refers to its host only by id. It is placed on at most one host at a time, `host() == None`
/// means that the VM is not placed anywhere.
#[derive(Clone)]
pub struct Vm {
    pub id: u32,
    pub pes: u32,
    /// MIPS requested for each PE
    pub mips: u64,
    pub ram: u64,
    pub bw: u64,
    pub storage: u64,
    /// Component receiving acknowledgements for this VM.
    pub broker: Option<Id>,
    host: Option<u32>,
    in_migration: bool,
    created: bool,
    failed: bool,
    start_time: f64,
    stop_time: f64,
    current_mips_share: Vec<u64>,
    cloudlet_scheduler: Box<dyn CloudletScheduler>,
    state_history: StateHistory<VmStateHistoryEntry>,
}

impl Vm {
    /// Creates VM with RAM, bandwidth and storage taken from the defaults.
    pub fn new(id: u32, pes: u32, mips: u64, defaults: &ResourceDefaults) -> Result<Self> {
        if pes == 0 || mips == 0 {
            return Err(DatacenterError::InvalidArgument(format!(
                "vm {} must request positive pes and mips, got {} x {}",
                id, pes, mips
            )));
        }
        Ok(Self {
            id,
            pes,
            mips,
            ram: defaults.vm_ram,
            bw: defaults.vm_bw,
            storage: defaults.vm_storage,
            broker: None,
            host: None,
            in_migration: false,
            created: false,
            failed: false,
            start_time: -1.,
            stop_time: -1.,
            current_mips_share: Vec::new(),
            cloudlet_scheduler: Box::new(CloudletSchedulerSimple::time_shared()),
            state_history: StateHistory::disabled(),
        })
    }

    pub fn with_ram(mut self, ram: u64) -> Result<Self> {
        self.ram = positive(self.id, "ram", ram)?;
        Ok(self)
    }

    pub fn with_bw(mut self, bw: u64) -> Result<Self> {
        self.bw = positive(self.id, "bw", bw)?;
        Ok(self)
    }

    pub fn with_storage(mut self, storage: u64) -> Result<Self> {
        self.storage = positive(self.id, "storage", storage)?;
        Ok(self)
    }

    pub fn with_broker(mut self, broker: Id) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_cloudlet_scheduler(mut self, scheduler: Box<dyn CloudletScheduler>) -> Self {
        self.cloudlet_scheduler = scheduler;
        self
    }

    pub fn with_state_history(mut self, enabled: bool, limit: usize) -> Self {
        self.state_history = StateHistory::new(enabled, limit);
        self
    }

    /// Returns id of the host where the VM is placed.
    pub fn host(&self) -> Option<u32> {
        self.host
    }

    pub(crate) fn set_host(&mut self, host: Option<u32>) {
        self.host = host;
    }

    pub fn is_placed(&self) -> bool {
        self.host.is_some()
    }

    pub fn is_in_migration(&self) -> bool {
        self.in_migration
    }

    pub(crate) fn set_in_migration(&mut self, in_migration: bool) {
        self.in_migration = in_migration;
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub(crate) fn set_created(&mut self, created: bool, time: f64) {
        if created && self.start_time < 0. {
            self.start_time = time;
        }
        if !created && self.created {
            self.stop_time = time;
        }
        self.created = created;
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn set_failed(&mut self, failed: bool) {
        self.failed = failed;
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn stop_time(&self) -> f64 {
        self.stop_time
    }

    /// Requested MIPS for each VM PE.
    pub fn requested_mips_share(&self) -> Vec<u64> {
        vec![self.mips; self.pes as usize]
    }

    pub fn total_requested_mips(&self) -> u64 {
        self.mips * self.pes as u64
    }

    /// MIPS share received in the last processing update.
    pub fn current_mips_share(&self) -> &[u64] {
        &self.current_mips_share
    }

    pub fn cloudlet_scheduler(&self) -> &dyn CloudletScheduler {
        self.cloudlet_scheduler.as_ref()
    }

    pub fn cloudlet_scheduler_mut(&mut self) -> &mut dyn CloudletScheduler {
        self.cloudlet_scheduler.as_mut()
    }

    pub fn state_history(&self) -> &StateHistory<VmStateHistoryEntry> {
        &self.state_history
    }

    /// Updates processing of VM cloudlets using the MIPS share allocated by the host.
    ///
    /// Returns the delay until the next cloudlet completion or `f64::INFINITY` if nothing is running.
    pub fn update_processing(&mut self, time: f64, mips_share: &[u64]) -> f64 {
        let delay = self.cloudlet_scheduler.update_processing(time, mips_share);
        self.current_mips_share = mips_share.to_vec();
        let requested_mips = if self.cloudlet_scheduler.running_count() > 0 {
            self.total_requested_mips() as f64
        } else {
            0.
        };
        self.state_history.add(VmStateHistoryEntry {
            time,
            allocated_mips: mips_share.iter().sum::<u64>() as f64,
            requested_mips,
            in_migration: self.in_migration,
        });
        delay
    }
}

fn positive(vm_id: u32, name: &str, value: u64) -> Result<u64> {
    if value == 0 {
        return Err(DatacenterError::InvalidArgument(format!(
            "vm {} must request positive {}",
            vm_id, name
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudlet::Cloudlet;

    #[test]
    fn test_defaults_and_validation() {
        let defaults = ResourceDefaults::default();
        let vm = Vm::new(1, 2, 1000, &defaults).unwrap();
        assert_eq!(vm.ram, 512);
        assert_eq!(vm.bw, 1000);
        assert_eq!(vm.storage, 10000);
        assert_eq!(vm.requested_mips_share(), vec![1000, 1000]);
        assert!(!vm.is_placed());
        assert!(Vm::new(2, 0, 1000, &defaults).is_err());
        assert!(Vm::new(3, 1, 1000, &defaults).unwrap().with_ram(0).is_err());
    }

    #[test]
    fn test_update_processing_records_history() {
        let mut vm = Vm::new(1, 1, 1000, &ResourceDefaults::default())
            .unwrap()
            .with_state_history(true, 10);
        vm.cloudlet_scheduler_mut().submit(Cloudlet::new(0, 1, 5000, 1), 0.);
        assert_eq!(vm.update_processing(0., &[1000]), 5.);
        assert_eq!(vm.update_processing(5., &[1000]), f64::INFINITY);
        assert_eq!(vm.cloudlet_scheduler_mut().take_finished().len(), 1);
        let history = vm.state_history().entries();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].requested_mips, 1000.);
        assert_eq!(history[1].requested_mips, 0.);
    }
}
