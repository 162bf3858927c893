//! Physical host: resource allocation for VMs and power state.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::ResourceDefaults;
use crate::error::{DatacenterError, Result};
use crate::listener::{HostEventInfo, HostUpdatesVmsProcessingEventInfo, Listeners};
use crate::pe::{Pe, PeList, PeStatus};
use crate::power::{LinearPowerModel, PowerModel, PowerState};
use crate::resource::{ResourceLedger, ResourceProvisioner};
use crate::state_history::{HostStateHistoryEntry, StateHistory};
use crate::suitability::Suitability;
use crate::vm::Vm;
use crate::vm_scheduler::{VmScheduler, VmSchedulerTimeShared};

/// Outcome of a power state change request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PowerTransition {
    /// Host is already in the requested state or in the middle of a transition.
    NoOp,
    /// State was changed synchronously.
    Completed,
    /// Host entered a transitional state, the change must be completed after the delay.
    Scheduled(f64),
}

/// Result of updating the processing of host VMs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProcessingUpdate {
    /// Minimal delay until the next expected event among host VMs.
    pub next_event_delay: f64,
    /// Power off request issued because the host stayed idle for too long.
    pub idle_shutdown: PowerTransition,
}

/// Represents physical host with a fixed set of PEs, RAM, bandwidth and storage shared between VMs.
pub struct Host {
    pub id: u32,
    name: String,
    pes: PeList,
    ram: ResourceProvisioner,
    bw: ResourceProvisioner,
    storage: ResourceLedger,
    vm_scheduler: Box<dyn VmScheduler>,
    power_model: Box<dyn PowerModel>,

    vms: Vec<u32>,
    vms_migrating_in: BTreeSet<u32>,
    vms_migrating_out: BTreeSet<u32>,

    power_state: PowerState,
    failed: bool,
    started: bool,
    active_on_startup: bool,
    lazy_suitability_evaluation: bool,

    first_start_time: f64,
    start_time: f64,
    shutdown_time: f64,
    total_up_time: f64,
    last_busy_time: f64,
    idle_shutdown_deadline: f64,

    state_history: StateHistory<HostStateHistoryEntry>,
    startup_listeners: Listeners<HostEventInfo>,
    shutdown_listeners: Listeners<HostEventInfo>,
    update_processing_listeners: Listeners<HostUpdatesVmsProcessingEventInfo>,
}

impl Host {
    /// Creates inactive host with the specified PEs, RAM, bandwidth and storage are taken from the defaults.
    pub fn new(id: u32, pes: Vec<Pe>, defaults: &ResourceDefaults) -> Result<Self> {
        if pes.is_empty() {
            return Err(DatacenterError::InvalidArgument(format!("host {} has no PEs", id)));
        }
        Ok(Self {
            id,
            name: format!("host{}", id),
            pes: PeList::new(pes),
            ram: ResourceProvisioner::new(defaults.host_ram),
            bw: ResourceProvisioner::new(defaults.host_bw),
            storage: ResourceLedger::new(defaults.host_storage),
            vm_scheduler: Box::new(VmSchedulerTimeShared::new()),
            power_model: Box::new(LinearPowerModel::new(200., 100.)),
            vms: Vec::new(),
            vms_migrating_in: BTreeSet::new(),
            vms_migrating_out: BTreeSet::new(),
            power_state: PowerState::Inactive,
            failed: false,
            started: false,
            active_on_startup: true,
            lazy_suitability_evaluation: true,
            first_start_time: -1.,
            start_time: -1.,
            shutdown_time: -1.,
            total_up_time: 0.,
            last_busy_time: 0.,
            idle_shutdown_deadline: -1.,
            state_history: StateHistory::disabled(),
            startup_listeners: Listeners::new(),
            shutdown_listeners: Listeners::new(),
            update_processing_listeners: Listeners::new(),
        })
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_ram(mut self, ram: u64) -> Result<Self> {
        self.ram = ResourceProvisioner::new(self.positive("ram", ram)?);
        Ok(self)
    }

    pub fn with_bw(mut self, bw: u64) -> Result<Self> {
        self.bw = ResourceProvisioner::new(self.positive("bw", bw)?);
        Ok(self)
    }

    pub fn with_storage(mut self, storage: u64) -> Result<Self> {
        self.storage = ResourceLedger::new(self.positive("storage", storage)?);
        Ok(self)
    }

    pub fn with_vm_scheduler(mut self, vm_scheduler: Box<dyn VmScheduler>) -> Self {
        self.vm_scheduler = vm_scheduler;
        self
    }

    pub fn with_power_model(mut self, power_model: Box<dyn PowerModel>) -> Self {
        self.power_model = power_model;
        self
    }

    /// Sets idle time after which an empty host powers itself off, negative value disables the shutdown.
    pub fn with_idle_shutdown_deadline(mut self, deadline: f64) -> Self {
        self.idle_shutdown_deadline = deadline;
        self
    }

    pub fn with_state_history(mut self, enabled: bool, limit: usize) -> Self {
        self.state_history = StateHistory::new(enabled, limit);
        self
    }

    pub fn with_lazy_suitability_evaluation(mut self, lazy: bool) -> Self {
        self.lazy_suitability_evaluation = lazy;
        self
    }

    pub fn with_active_on_startup(mut self, active: bool) -> Self {
        self.active_on_startup = active;
        self
    }

    fn positive(&self, name: &str, value: u64) -> Result<u64> {
        if value == 0 {
            return Err(DatacenterError::InvalidArgument(format!(
                "host {} must have positive {}",
                self.id, name
            )));
        }
        Ok(value)
    }

    /// Replaces VM scheduler, which is only allowed before the host is started.
    pub fn set_vm_scheduler(&mut self, vm_scheduler: Box<dyn VmScheduler>) -> Result<()> {
        if self.started {
            return Err(DatacenterError::InvalidState(format!(
                "can't change vm scheduler of host {} after it was started",
                self.id
            )));
        }
        self.vm_scheduler = vm_scheduler;
        Ok(())
    }

    pub(crate) fn mark_started(&mut self) {
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active_on_startup(&self) -> bool {
        self.active_on_startup
    }

    // Resources ///////////////////////////////////////////////////////////////////////////////////////////////////

    pub fn pes(&self) -> &PeList {
        &self.pes
    }

    pub fn free_pes_count(&self) -> usize {
        self.pes.free_count()
    }

    pub fn busy_pes_count(&self) -> usize {
        self.pes.busy_count()
    }

    pub fn failed_pes_count(&self) -> usize {
        self.pes.failed_count()
    }

    pub fn ram(&self) -> &ResourceProvisioner {
        &self.ram
    }

    pub fn bw(&self) -> &ResourceProvisioner {
        &self.bw
    }

    pub fn storage(&self) -> &ResourceLedger {
        &self.storage
    }

    /// Changes RAM capacity, fails if the new capacity is below the allocated amount.
    pub fn set_ram_capacity(&mut self, capacity: u64) -> bool {
        self.ram.set_capacity(capacity)
    }

    /// Changes bandwidth capacity, fails if the new capacity is below the allocated amount.
    pub fn set_bw_capacity(&mut self, capacity: u64) -> bool {
        self.bw.set_capacity(capacity)
    }

    pub fn total_mips(&self) -> u64 {
        self.pes.total_mips()
    }

    pub fn total_available_mips(&self) -> u64 {
        self.vm_scheduler.total_available_mips(&self.pes)
    }

    pub fn allocated_mips_for_vm(&self, vm_id: u32) -> Vec<u64> {
        self.vm_scheduler.allocated_mips(vm_id)
    }

    /// Ratio of MIPS allocated to VMs to the total MIPS of working PEs.
    pub fn cpu_utilization(&self) -> f64 {
        let total = self.pes.total_mips();
        if total == 0 {
            return 0.;
        }
        (self.pes.allocated_mips() as f64 / total as f64).min(1.)
    }

    /// Current power consumption, zero while the host is inactive.
    pub fn power_consumption(&self) -> f64 {
        if self.power_state == PowerState::Inactive {
            return 0.;
        }
        self.power_model.get_power(self.cpu_utilization())
    }

    // VMs /////////////////////////////////////////////////////////////////////////////////////////////////////////

    /// Ids of VMs placed on this host, in placement order.
    pub fn vms(&self) -> &[u32] {
        &self.vms
    }

    pub fn has_vm(&self, vm_id: u32) -> bool {
        self.vms.contains(&vm_id)
    }

    pub fn vms_migrating_in(&self) -> &BTreeSet<u32> {
        &self.vms_migrating_in
    }

    pub fn vms_migrating_out(&self) -> &BTreeSet<u32> {
        &self.vms_migrating_out
    }

    pub fn is_suitable_for_vm(&self, vm: &Vm) -> bool {
        self.get_suitability_for(vm).fully()
    }

    pub fn get_suitability_for(&self, vm: &Vm) -> Suitability {
        self.evaluate_suitability(vm, self.lazy_suitability_evaluation)
    }

    /// Checks storage, RAM, bandwidth and PEs in this order. A failed host is not suitable for anything.
    ///
    /// In lazy mode the evaluation stops on the first missing resource, leaving the remaining flags unset.
    pub fn evaluate_suitability(&self, vm: &Vm, lazy: bool) -> Suitability {
        let mut suitability = Suitability::none();
        if self.failed {
            return suitability;
        }
        suitability.for_storage = self.storage.is_amount_available(vm.storage);
        if lazy && !suitability.for_storage {
            return suitability;
        }
        suitability.for_ram = self.ram.is_suitable_for_vm(vm.id, vm.ram);
        if lazy && !suitability.for_ram {
            return suitability;
        }
        suitability.for_bw = self.bw.is_suitable_for_vm(vm.id, vm.bw);
        if lazy && !suitability.for_bw {
            return suitability;
        }
        suitability.for_pes = self.vm_scheduler.is_suitable_for_vm(&self.pes, vm);
        suitability
    }

    /// Allocates RAM, bandwidth, storage and PEs (in this order) if the VM fully fits.
    fn allocate_resources_for_vm(&mut self, vm: &mut Vm, in_migration: bool) -> Suitability {
        let suitability = self.get_suitability_for(vm);
        if !suitability.fully() {
            return suitability;
        }
        vm.set_in_migration(in_migration);
        self.ram.allocate_resource_for_vm(vm.id, vm.ram);
        self.bw.allocate_resource_for_vm(vm.id, vm.bw);
        self.storage.allocate(vm.storage);
        self.vm_scheduler
            .allocate_pes_for_vm(&mut self.pes, vm.id, &vm.requested_mips_share());
        suitability
    }

    fn deallocate_resources_for_vm(&mut self, vm: &Vm) {
        // RAM is always positive, so its allocation tells whether storage was taken too
        if self.ram.deallocate_resource_for_vm(vm.id) > 0 {
            self.storage.deallocate(vm.storage);
        }
        self.bw.deallocate_resource_for_vm(vm.id);
        self.vm_scheduler.deallocate_pes_from_vm(&mut self.pes, vm.id);
    }

    /// Places VM on this host if it fully fits, registering it in the list of host VMs.
    pub fn create_vm(&mut self, vm: &mut Vm, time: f64) -> Suitability {
        let suitability = self.allocate_resources_for_vm(vm, false);
        if suitability.fully() {
            self.vms.push(vm.id);
            vm.set_host(Some(self.id));
            vm.set_created(true, time);
            vm.set_failed(false);
            self.last_busy_time = time;
        }
        suitability
    }

    /// Allocates resources for VM without registering it, used for trial placements.
    pub fn create_temporary_vm(&mut self, vm: &mut Vm) -> Suitability {
        self.allocate_resources_for_vm(vm, false)
    }

    /// Releases resources allocated by [`create_temporary_vm`](Self::create_temporary_vm).
    pub fn destroy_temporary_vm(&mut self, vm: &Vm) {
        if !self.has_vm(vm.id) && !self.vms_migrating_in.contains(&vm.id) {
            self.deallocate_resources_for_vm(vm);
        }
    }

    /// Releases VM resources and removes it from the host.
    pub fn destroy_vm(&mut self, vm: &mut Vm, time: f64) {
        if !self.has_vm(vm.id) {
            return;
        }
        self.deallocate_resources_for_vm(vm);
        self.vms.retain(|id| *id != vm.id);
        self.vms_migrating_out.remove(&vm.id);
        if vm.host() == Some(self.id) {
            vm.set_host(None);
        }
        vm.set_created(false, time);
        self.last_busy_time = time;
    }

    /// Reserves resources for VM which is going to migrate to this host.
    ///
    /// Fails if the VM is already migrating in or does not fit the host.
    pub fn add_migrating_in_vm(&mut self, vm: &mut Vm) -> Suitability {
        if self.vms_migrating_in.contains(&vm.id) || self.has_vm(vm.id) {
            return Suitability::none();
        }
        self.vms_migrating_in.insert(vm.id);
        let suitability = self.allocate_resources_for_vm(vm, true);
        if !suitability.fully() {
            self.vms_migrating_in.remove(&vm.id);
        }
        suitability
    }

    /// Releases resources reserved for migrating in VM.
    pub fn remove_migrating_in_vm(&mut self, vm: &mut Vm) {
        if !self.vms_migrating_in.remove(&vm.id) {
            return;
        }
        self.deallocate_resources_for_vm(vm);
        vm.set_in_migration(false);
    }

    pub fn add_migrating_out_vm(&mut self, vm_id: u32) {
        self.vms_migrating_out.insert(vm_id);
    }

    pub fn remove_migrating_out_vm(&mut self, vm_id: u32) {
        self.vms_migrating_out.remove(&vm_id);
    }

    /// Allocates again the resources reserved for migrating in VMs, e.g. after they were released on failure.
    pub fn reallocate_migrating_in_vms(&mut self, vms: &mut BTreeMap<u32, Vm>) {
        let migrating_in: Vec<u32> = self.vms_migrating_in.iter().copied().collect();
        for vm_id in migrating_in {
            if let Some(vm) = vms.get_mut(&vm_id) {
                if self.ram.has_allocation_for(vm_id) {
                    continue;
                }
                let suitability = self.allocate_resources_for_vm(vm, true);
                if !suitability.fully() {
                    self.vms_migrating_in.remove(&vm_id);
                    vm.set_in_migration(false);
                }
            }
        }
    }

    // Power state /////////////////////////////////////////////////////////////////////////////////////////////////

    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.power_state, PowerState::Active | PowerState::Deactivating)
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn power_model(&self) -> &dyn PowerModel {
        self.power_model.as_ref()
    }

    /// Requests power on or power off.
    ///
    /// Redundant requests and requests made in the middle of a transition are ignored.
    /// A zero startup or shutdown delay changes the state right away, otherwise the caller must complete
    /// the transition with [`process_activation`](Self::process_activation) after the returned delay.
    pub fn set_active(&mut self, activate: bool, time: f64) -> Result<PowerTransition> {
        if activate && self.failed {
            return Err(DatacenterError::InvalidState(format!(
                "can't power on failed host {}",
                self.id
            )));
        }
        if self.power_state.is_transitional() {
            return Ok(PowerTransition::NoOp);
        }
        if activate == self.is_active() {
            return Ok(PowerTransition::NoOp);
        }
        let delay = if activate {
            self.power_model.startup_delay()
        } else {
            self.power_model.shutdown_delay()
        };
        if delay <= 0. {
            self.process_activation(activate, time);
            return Ok(PowerTransition::Completed);
        }
        self.power_state = if activate {
            PowerState::Activating
        } else {
            PowerState::Deactivating
        };
        Ok(PowerTransition::Scheduled(delay))
    }

    /// Completes the power state transition. Returns `false` if the transition was abandoned.
    pub fn process_activation(&mut self, activate: bool, time: f64) -> bool {
        let info = HostEventInfo { time, host_id: self.id };
        if activate {
            if self.failed {
                // failed while powering on
                self.power_state = PowerState::Inactive;
                return false;
            }
            self.power_state = PowerState::Active;
            self.start_time = time;
            if self.first_start_time < 0. {
                self.first_start_time = time;
            }
            self.last_busy_time = time;
            self.add_state_history_entry(time);
            self.startup_listeners.notify(&info);
        } else {
            if self.start_time >= 0. {
                self.total_up_time += time - self.start_time;
            }
            self.power_state = PowerState::Inactive;
            self.shutdown_time = time;
            self.add_state_history_entry(time);
            self.shutdown_listeners.notify(&info);
        }
        true
    }

    /// Marks the host failed or recovered, cascading the status to all PEs.
    ///
    /// Failing the host also powers it off.
    pub fn set_failed(&mut self, failed: bool, time: f64) -> PowerTransition {
        self.failed = failed;
        let status = if failed { PeStatus::Failed } else { PeStatus::Free };
        self.pes.set_status_all(status);
        if !failed {
            for i in 0..self.pes.len() {
                self.pes.refresh_status(i);
            }
            return PowerTransition::NoOp;
        }
        // deactivation of failed host is allowed
        self.set_active(false, time).unwrap_or(PowerTransition::NoOp)
    }

    pub fn first_start_time(&self) -> f64 {
        self.first_start_time
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn shutdown_time(&self) -> f64 {
        self.shutdown_time
    }

    /// Total time the host was powered on, including the current period if the host is active.
    pub fn total_up_time(&self, time: f64) -> f64 {
        if self.is_active() && self.start_time >= 0. {
            self.total_up_time + time - self.start_time
        } else {
            self.total_up_time
        }
    }

    pub fn last_busy_time(&self) -> f64 {
        self.last_busy_time
    }

    pub fn idle_shutdown_deadline(&self) -> f64 {
        self.idle_shutdown_deadline
    }

    fn is_idle(&self) -> bool {
        self.power_state == PowerState::Active && self.vms.is_empty() && self.vms_migrating_in.is_empty()
    }

    /// Returns the time left until the idle shutdown deadline expires, if the host is idle and the shutdown is enabled.
    pub fn idle_shutdown_delay(&self, time: f64) -> Option<f64> {
        if self.idle_shutdown_deadline < 0. || !self.is_idle() {
            return None;
        }
        Some((self.last_busy_time + self.idle_shutdown_deadline - time).max(0.))
    }

    // Processing //////////////////////////////////////////////////////////////////////////////////////////////////

    /// Updates processing of all placed VMs using the MIPS shares allocated to them.
    ///
    /// An idle host whose idle time exceeds the deadline requests its own power off.
    pub fn update_processing(&mut self, time: f64, vms: &mut BTreeMap<u32, Vm>) -> ProcessingUpdate {
        let mut next_event_delay = f64::INFINITY;
        let mut requested_mips = 0.;
        for vm_id in self.vms.iter() {
            if let Some(vm) = vms.get_mut(vm_id) {
                let share = self.vm_scheduler.allocated_mips(*vm_id);
                let delay = vm.update_processing(time, &share);
                next_event_delay = next_event_delay.min(delay);
                if vm.cloudlet_scheduler().running_count() > 0 {
                    requested_mips += vm.total_requested_mips() as f64;
                }
            }
        }
        if !self.vms.is_empty() {
            self.last_busy_time = time;
        }
        self.state_history.add(HostStateHistoryEntry {
            time,
            allocated_mips: self.pes.allocated_mips() as f64,
            requested_mips,
            active: self.is_active(),
        });
        self.update_processing_listeners.notify(&HostUpdatesVmsProcessingEventInfo {
            time,
            host_id: self.id,
            next_event_delay,
        });

        let mut idle_shutdown = PowerTransition::NoOp;
        if self.idle_shutdown_deadline >= 0. && self.is_idle() && time - self.last_busy_time > self.idle_shutdown_deadline
        {
            idle_shutdown = self.set_active(false, time).unwrap_or(PowerTransition::NoOp);
        }
        ProcessingUpdate {
            next_event_delay,
            idle_shutdown,
        }
    }

    fn add_state_history_entry(&mut self, time: f64) {
        self.state_history.add(HostStateHistoryEntry {
            time,
            allocated_mips: self.pes.allocated_mips() as f64,
            requested_mips: 0.,
            active: self.is_active(),
        });
    }

    pub fn state_history(&self) -> &StateHistory<HostStateHistoryEntry> {
        &self.state_history
    }

    // Listeners ///////////////////////////////////////////////////////////////////////////////////////////////////

    pub fn on_startup<F>(&mut self, listener: F)
    where
        F: FnMut(&HostEventInfo) + 'static,
    {
        self.startup_listeners.add(listener);
    }

    pub fn on_shutdown<F>(&mut self, listener: F)
    where
        F: FnMut(&HostEventInfo) + 'static,
    {
        self.shutdown_listeners.add(listener);
    }

    pub fn on_update_processing<F>(&mut self, listener: F)
    where
        F: FnMut(&HostUpdatesVmsProcessingEventInfo) + 'static,
    {
        self.update_processing_listeners.add(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        Host::new(0, Pe::uniform(2, 1000).unwrap(), &ResourceDefaults::default())
            .unwrap()
            .with_ram(2048)
            .unwrap()
    }

    fn vm(id: u32) -> Vm {
        Vm::new(id, 1, 1000, &ResourceDefaults::default()).unwrap()
    }

    #[test]
    fn test_empty_pe_list_is_rejected() {
        assert!(Host::new(0, Vec::new(), &ResourceDefaults::default()).is_err());
        assert!(host().with_bw(0).is_err());
    }

    #[test]
    fn test_temporary_vm_is_not_registered() {
        let mut host = host();
        let mut vm = vm(1);
        assert!(host.create_temporary_vm(&mut vm).fully());
        assert!(host.vms().is_empty());
        assert_eq!(host.ram().allocated(), 512);
        assert_eq!(host.busy_pes_count(), 1);
        host.destroy_temporary_vm(&vm);
        assert_eq!(host.ram().allocated(), 0);
        assert_eq!(host.storage().allocated(), 0);
        assert_eq!(host.free_pes_count(), 2);
    }

    #[test]
    fn test_migrating_in_reservation() {
        let mut host = host();
        let mut vm = vm(1);
        assert!(host.add_migrating_in_vm(&mut vm).fully());
        assert!(vm.is_in_migration());
        assert!(!host.add_migrating_in_vm(&mut vm).fully());
        assert_eq!(host.bw().allocated(), 1000);
        host.remove_migrating_in_vm(&mut vm);
        assert!(!vm.is_in_migration());
        assert_eq!(host.bw().allocated(), 0);
        assert!(host.vms_migrating_in().is_empty());
    }

    #[test]
    fn test_reservations_are_restored() {
        let mut host = host();
        let mut vms = BTreeMap::new();
        vms.insert(1, vm(1));
        vms.insert(2, vm(2));
        for vm in vms.values_mut() {
            assert!(host.add_migrating_in_vm(vm).fully());
        }
        // rollback of trial placements releases everything
        host.deallocate_resources_for_vm(&vms[&1]);
        host.deallocate_resources_for_vm(&vms[&2]);
        host.set_ram_capacity(512);

        host.reallocate_migrating_in_vms(&mut vms);
        assert_eq!(host.ram().allocated(), 512);
        assert_eq!(host.vms_migrating_in().len(), 1);
        assert!(host.vms_migrating_in().contains(&1));
        assert!(vms[&1].is_in_migration());
        assert!(!vms[&2].is_in_migration());
    }

    #[test]
    fn test_power_transitions_with_delays() {
        let mut host = host().with_power_model(Box::new(
            LinearPowerModel::new(200., 100.)
                .with_startup_delay(10.)
                .with_shutdown_delay(5.),
        ));
        assert_eq!(host.set_active(true, 0.).unwrap(), PowerTransition::Scheduled(10.));
        assert_eq!(host.power_state(), PowerState::Activating);
        assert_eq!(host.set_active(false, 1.).unwrap(), PowerTransition::NoOp);
        assert!(host.process_activation(true, 10.));
        assert!(host.is_active());
        assert_eq!(host.power_consumption(), 100.);
        assert_eq!(host.set_active(false, 20.).unwrap(), PowerTransition::Scheduled(5.));
        assert!(host.is_active());
        host.process_activation(false, 25.);
        assert_eq!(host.total_up_time(30.), 15.);
        assert_eq!(host.power_consumption(), 0.);
    }

    #[test]
    fn test_idle_shutdown() {
        let mut host = host().with_idle_shutdown_deadline(5.);
        let mut vms = BTreeMap::new();
        host.set_active(true, 0.).unwrap();
        assert_eq!(host.idle_shutdown_delay(2.), Some(3.));
        assert_eq!(host.update_processing(5., &mut vms).idle_shutdown, PowerTransition::NoOp);
        assert_eq!(host.update_processing(5.1, &mut vms).idle_shutdown, PowerTransition::Completed);
        assert_eq!(host.power_state(), PowerState::Inactive);
        assert_eq!(host.idle_shutdown_delay(6.), None);
    }

    #[test]
    fn test_vm_scheduler_is_immutable_after_start() {
        let mut host = host();
        assert!(host.set_vm_scheduler(Box::new(VmSchedulerTimeShared::new())).is_ok());
        host.mark_started();
        assert!(matches!(
            host.set_vm_scheduler(Box::new(VmSchedulerTimeShared::new())),
            Err(DatacenterError::InvalidState(_))
        ));
    }
}
