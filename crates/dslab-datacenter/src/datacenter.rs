//! Datacenter component: event processing, periodic updates and VM migrations.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;

use dslab_core::event::EventId;
use dslab_core::{cast, log_debug, log_error, log_info, log_trace, log_warn};
use dslab_core::{Event, EventHandler, Id, SimulationContext};

use crate::allocation_policy::{allocation_policy_resolver, VmAllocationPolicy};
use crate::cloudlet::{Cloudlet, CloudletStatus};
use crate::config::{
    validate_bandwidth_percent, validate_host_search_retry_delay, validate_scheduling_interval, DatacenterConfig,
    HostSpec, ResourceDefaults,
};
use crate::error::{DatacenterError, Result};
use crate::events::cloudlet::{
    CloudletCancel, CloudletPause, CloudletResume, CloudletReturn, CloudletSubmit, CloudletSubmitAck,
};
use crate::events::host::{HostAddRequest, HostPowerOff, HostPowerOn, HostPowerTransition, HostRemoveRequest};
use crate::events::migration::{VmMigrationAck, VmMigrationFinish, VmMigrationRequest};
use crate::events::processing::UpdateProcessing;
use crate::events::vm::{VmCreateAck, VmCreateRequest, VmDestroyAck, VmDestroyRequest, VmFailed};
use crate::host::{Host, PowerTransition};
use crate::listener::{HostEventInfo, Listeners, VmMigrationEventInfo};
use crate::pe::Pe;
use crate::power::{power_model_resolver, PowerState};
use crate::suitability::Suitability;
use crate::vm::Vm;
use crate::vm_scheduler::vm_scheduler_resolver;

/// Updates happening before this time always pass the re-entrance guard.
const BOOTSTRAP_TIME: f64 = 0.111;

/// Returns the delay until the next processing update.
///
/// With positive scheduling interval the update is snapped to the next multiple of the interval counted from the
/// current integer time, unless the next event happens earlier.
pub fn processing_update_delay(clock: f64, scheduling_interval: f64, next_event_delay: f64) -> f64 {
    if scheduling_interval <= 0. {
        return next_event_delay;
    }
    let time = clock.floor();
    let rem = time % scheduling_interval;
    let delay = if rem == 0. {
        scheduling_interval
    } else {
        scheduling_interval - rem
    };
    next_event_delay.min(delay)
}

/// Returns the time needed to transfer VM RAM (MB) over the given fraction of host bandwidth (Mbit/s).
pub fn migration_delay(vm_ram: u64, target_bw: u64, bandwidth_percent: f64) -> f64 {
    vm_ram as f64 / (target_bw as f64 * bandwidth_percent / 8.)
}

/// Top level simulation entity owning the hosts and the registry of VMs.
///
/// Processes VM, host and cloudlet events, keeps VM processing up to date by means of periodic
/// [`UpdateProcessing`] events and drives VM migrations.
pub struct Datacenter {
    hosts: IndexMap<u32, Host>,
    vms: BTreeMap<u32, Vm>,
    allocation_policy: Box<dyn VmAllocationPolicy>,
    resource_defaults: ResourceDefaults,

    scheduling_interval: f64,
    min_time_between_events: f64,
    bandwidth_percent_for_migration: f64,
    host_search_retry_delay: f64,
    migrations_enabled: bool,
    idle_shutdown_deadline: f64,
    lazy_suitability_evaluation: bool,
    state_history_enabled: bool,
    state_history_limit: usize,

    last_process_time: f64,
    last_under_or_overloaded_detection: f64,
    next_update: Option<(EventId, f64)>,
    pending_host_removals: HashMap<u32, Vec<EventId>>,
    cloudlet_vms: HashMap<u64, u32>,
    next_host_id: u32,
    started: bool,

    host_available_listeners: Listeners<HostEventInfo>,
    migration_finish_listeners: Listeners<VmMigrationEventInfo>,

    ctx: SimulationContext,
}

impl Datacenter {
    pub fn new(ctx: SimulationContext, config: &DatacenterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            hosts: IndexMap::new(),
            vms: BTreeMap::new(),
            allocation_policy: allocation_policy_resolver(&config.allocation_policy)?,
            resource_defaults: config.resource_defaults.clone(),
            scheduling_interval: config.scheduling_interval,
            min_time_between_events: config.min_time_between_events,
            bandwidth_percent_for_migration: config.bandwidth_percent_for_migration,
            host_search_retry_delay: config.host_search_retry_delay,
            migrations_enabled: config.vm_migrations_enabled,
            idle_shutdown_deadline: config.idle_shutdown_deadline,
            lazy_suitability_evaluation: config.lazy_suitability_evaluation,
            state_history_enabled: config.state_history_enabled,
            state_history_limit: config.state_history_limit,
            last_process_time: 0.,
            last_under_or_overloaded_detection: f64::NEG_INFINITY,
            next_update: None,
            pending_host_removals: HashMap::new(),
            cloudlet_vms: HashMap::new(),
            next_host_id: 0,
            started: false,
            host_available_listeners: Listeners::new(),
            migration_finish_listeners: Listeners::new(),
            ctx,
        })
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    pub fn set_allocation_policy(&mut self, allocation_policy: Box<dyn VmAllocationPolicy>) {
        self.allocation_policy = allocation_policy;
    }

    pub fn resource_defaults(&self) -> &ResourceDefaults {
        &self.resource_defaults
    }

    // Settings ////////////////////////////////////////////////////////////////////////////////////////////////////

    pub fn scheduling_interval(&self) -> f64 {
        self.scheduling_interval
    }

    pub fn set_scheduling_interval(&mut self, interval: f64) -> Result<()> {
        validate_scheduling_interval(interval)?;
        self.scheduling_interval = interval;
        Ok(())
    }

    pub fn bandwidth_percent_for_migration(&self) -> f64 {
        self.bandwidth_percent_for_migration
    }

    pub fn set_bandwidth_percent_for_migration(&mut self, percent: f64) -> Result<()> {
        validate_bandwidth_percent(percent)?;
        self.bandwidth_percent_for_migration = percent;
        Ok(())
    }

    pub fn host_search_retry_delay(&self) -> f64 {
        self.host_search_retry_delay
    }

    pub fn set_host_search_retry_delay(&mut self, delay: f64) -> Result<()> {
        validate_host_search_retry_delay(delay)?;
        self.host_search_retry_delay = delay;
        Ok(())
    }

    pub fn is_migrations_enabled(&self) -> bool {
        self.migrations_enabled
    }

    pub fn enable_migrations(&mut self) {
        self.migrations_enabled = true;
    }

    pub fn disable_migrations(&mut self) {
        self.migrations_enabled = false;
    }

    pub fn last_process_time(&self) -> f64 {
        self.last_process_time
    }

    pub fn last_under_or_overloaded_detection(&self) -> f64 {
        self.last_under_or_overloaded_detection
    }

    // Hosts ///////////////////////////////////////////////////////////////////////////////////////////////////////

    /// Builds host from its spec using the datacenter defaults.
    pub fn build_host(&self, id: u32, spec: &HostSpec) -> Result<Host> {
        let mut host = Host::new(id, Pe::uniform(spec.pes, spec.pe_mips)?, &self.resource_defaults)?
            .with_name(&spec.name)
            .with_vm_scheduler(vm_scheduler_resolver(&spec.vm_scheduler)?)
            .with_power_model(power_model_resolver(&spec.power_model)?)
            .with_idle_shutdown_deadline(self.idle_shutdown_deadline)
            .with_lazy_suitability_evaluation(self.lazy_suitability_evaluation)
            .with_state_history(self.state_history_enabled, self.state_history_limit)
            .with_active_on_startup(spec.active_on_startup);
        if let Some(ram) = spec.ram {
            host = host.with_ram(ram)?;
        }
        if let Some(bw) = spec.bw {
            host = host.with_bw(bw)?;
        }
        if let Some(storage) = spec.storage {
            host = host.with_storage(storage)?;
        }
        Ok(host)
    }

    /// Adds host to the datacenter. A host added after the start is attached right away.
    pub fn add_host(&mut self, host: Host) -> Result<u32> {
        let host_id = host.id;
        if self.hosts.contains_key(&host_id) {
            return Err(DatacenterError::InvalidArgument(format!("host {} already exists", host_id)));
        }
        self.next_host_id = self.next_host_id.max(host_id + 1);
        self.hosts.insert(host_id, host);
        if self.started {
            self.attach_host(host_id);
            let info = HostEventInfo {
                time: self.ctx.time(),
                host_id,
            };
            self.host_available_listeners.notify(&info);
        }
        Ok(host_id)
    }

    /// Builds host from spec with the next free id and adds it.
    pub fn add_host_from_spec(&mut self, spec: &HostSpec) -> Result<u32> {
        let host = self.build_host(self.next_host_id, spec)?;
        self.add_host(host)
    }

    fn attach_host(&mut self, host_id: u32) {
        let active_on_startup = match self.hosts.get_mut(&host_id) {
            Some(host) => {
                host.mark_started();
                host.is_active_on_startup()
            }
            None => return,
        };
        if active_on_startup {
            if let Err(e) = self.power_on_host(host_id) {
                log_error!(self.ctx, "can't power on host {}: {}", host_id, e);
            }
        }
    }

    pub fn host(&self, host_id: u32) -> Option<&Host> {
        self.hosts.get(&host_id)
    }

    pub fn host_mut(&mut self, host_id: u32) -> Option<&mut Host> {
        self.hosts.get_mut(&host_id)
    }

    pub fn hosts(&self) -> &IndexMap<u32, Host> {
        &self.hosts
    }

    pub fn active_hosts_count(&self) -> usize {
        self.hosts.values().filter(|host| host.is_active()).count()
    }

    /// Total power consumption of all hosts.
    pub fn power_consumption(&self) -> f64 {
        self.hosts.values().map(|host| host.power_consumption()).sum()
    }

    // VMs /////////////////////////////////////////////////////////////////////////////////////////////////////////

    /// Registers VM so that it can be created by [`VmCreateRequest`].
    pub fn add_vm(&mut self, vm: Vm) -> Result<u32> {
        let vm_id = vm.id;
        if self.vms.contains_key(&vm_id) {
            return Err(DatacenterError::InvalidArgument(format!("vm {} already exists", vm_id)));
        }
        let vm = if self.state_history_enabled && !vm.state_history().is_enabled() {
            vm.with_state_history(true, self.state_history_limit)
        } else {
            vm
        };
        self.vms.insert(vm_id, vm);
        Ok(vm_id)
    }

    pub fn vm(&self, vm_id: u32) -> Option<&Vm> {
        self.vms.get(&vm_id)
    }

    pub fn vm_mut(&mut self, vm_id: u32) -> Option<&mut Vm> {
        self.vms.get_mut(&vm_id)
    }

    pub fn vms(&self) -> &BTreeMap<u32, Vm> {
        &self.vms
    }

    // Listeners ///////////////////////////////////////////////////////////////////////////////////////////////////

    pub fn on_host_available<F>(&mut self, listener: F)
    where
        F: FnMut(&HostEventInfo) + 'static,
    {
        self.host_available_listeners.add(listener);
    }

    pub fn on_vm_migration_finish<F>(&mut self, listener: F)
    where
        F: FnMut(&VmMigrationEventInfo) + 'static,
    {
        self.migration_finish_listeners.add(listener);
    }

    // Startup /////////////////////////////////////////////////////////////////////////////////////////////////////

    /// Powers on hosts marked as active on startup and schedules the first processing update.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let host_ids: Vec<u32> = self.hosts.keys().copied().collect();
        for host_id in host_ids {
            self.attach_host(host_id);
        }
        log_info!(self.ctx, "datacenter started with {} hosts", self.hosts.len());
        self.ctx.emit_self_now(UpdateProcessing {});
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    // Processing //////////////////////////////////////////////////////////////////////////////////////////////////

    fn on_update_processing(&mut self, event_id: EventId) {
        if matches!(self.next_update, Some((id, _)) if id == event_id) {
            self.next_update = None;
        }
        self.update_cloudlet_processing();
    }

    /// Updates processing of all hosts and schedules the next update.
    ///
    /// Does nothing if the previous update happened less than `min_time_between_events` ago.
    pub fn update_cloudlet_processing(&mut self) {
        let time = self.ctx.time();
        if !(time < BOOTSTRAP_TIME || time >= self.last_process_time + self.min_time_between_events) {
            log_trace!(self.ctx, "processing update skipped, last one was at {:.3}", self.last_process_time);
            return;
        }
        let next_event_delay = self.update_hosts_processing();
        self.last_process_time = time;
        self.check_migrations();
        self.schedule_next_update(next_event_delay);
    }

    /// Updates processing of all hosts, returns the minimal delay until the next event on them.
    fn update_hosts_processing(&mut self) -> f64 {
        let time = self.ctx.time();
        let mut next_event_delay = f64::INFINITY;
        let mut shutdowns = Vec::new();
        for host in self.hosts.values_mut() {
            let update = host.update_processing(time, &mut self.vms);
            next_event_delay = next_event_delay.min(update.next_event_delay);
            if update.idle_shutdown != PowerTransition::NoOp {
                shutdowns.push((host.id, update.idle_shutdown));
            }
            if let Some(delay) = host.idle_shutdown_delay(time) {
                next_event_delay = next_event_delay.min(delay + self.min_time_between_events);
            }
        }
        for (host_id, transition) in shutdowns {
            log_info!(self.ctx, "host {} stayed idle for too long and is powering off", host_id);
            self.handle_power_transition(host_id, false, transition);
        }
        self.return_finished_cloudlets();
        next_event_delay
    }

    /// Schedules processing update after the specified delay, keeping at most one pending update.
    fn schedule_next_update(&mut self, next_event_delay: f64) {
        if !next_event_delay.is_finite() {
            return;
        }
        let time = self.ctx.time();
        let delay = processing_update_delay(time, self.scheduling_interval, next_event_delay)
            .max(self.min_time_between_events);
        let update_time = time + delay;
        if let Some((event_id, pending_time)) = self.next_update {
            if pending_time <= update_time {
                return;
            }
            self.ctx.cancel_event(event_id);
        }
        let event_id = self.ctx.emit_self(UpdateProcessing {}, delay);
        self.next_update = Some((event_id, update_time));
    }

    fn schedule_idle_check(&mut self, host_id: u32) {
        let time = self.ctx.time();
        if let Some(delay) = self.hosts.get(&host_id).and_then(|host| host.idle_shutdown_delay(time)) {
            self.schedule_next_update(delay + self.min_time_between_events);
        }
    }

    fn check_migrations(&mut self) {
        let time = self.ctx.time();
        if !self.is_time_to_search_for_suitable_hosts(time) {
            return;
        }
        self.last_under_or_overloaded_detection = time;
        let migrations = self.allocation_policy.optimized_allocation_map(&self.vms, &self.hosts);
        if !migrations.is_empty() {
            log_debug!(self.ctx, "allocation policy requested {} migrations", migrations.len());
        }
        for (vm_id, host_id) in migrations {
            self.request_vm_migration(vm_id, Some(host_id));
        }
    }

    fn is_time_to_search_for_suitable_hosts(&self, time: f64) -> bool {
        self.migrations_enabled
            && self.allocation_policy.is_vm_migration_supported()
            && time - self.last_under_or_overloaded_detection >= self.host_search_retry_delay
    }

    // VM lifecycle ////////////////////////////////////////////////////////////////////////////////////////////////

    fn on_vm_create(&mut self, vm_id: u32, ack: bool, src: Id) {
        let time = self.ctx.time();
        let vm = match self.vms.get_mut(&vm_id) {
            Some(vm) => vm,
            None => {
                log_warn!(self.ctx, "vm {} is not registered in datacenter", vm_id);
                return;
            }
        };
        if vm.broker.is_none() {
            vm.broker = Some(src);
        }
        let broker = vm.broker.unwrap_or(src);
        let mut next_event_delay = f64::INFINITY;
        let suitability = if vm.is_placed() {
            log_warn!(self.ctx, "vm {} is already placed on host {:?}", vm_id, vm.host());
            Suitability::full()
        } else {
            let suitability = self.allocation_policy.allocate_host_for_vm(vm, &mut self.hosts, time);
            if let Some(host) = vm.host().and_then(|host_id| self.hosts.get(&host_id)) {
                let share = host.allocated_mips_for_vm(vm_id);
                next_event_delay = vm.update_processing(time, &share);
            }
            suitability
        };
        let host_id = vm.host();

        if suitability.fully() {
            log_debug!(self.ctx, "vm {} created on host {:?}", vm_id, host_id);
            if let Some(host_id) = host_id {
                self.power_on_if_inactive(host_id);
            }
            self.schedule_next_update(next_event_delay);
        } else {
            log_warn!(self.ctx, "failed to create vm {}: {}", vm_id, suitability);
        }
        if ack {
            self.ctx.emit(
                VmCreateAck {
                    vm_id,
                    host_id,
                    suitability,
                },
                broker,
                self.min_time_between_events,
            );
        }
    }

    /// Destroys VM, its unfinished cloudlets are returned to brokers as canceled.
    pub fn destroy_vm(&mut self, vm_id: u32) -> Result<()> {
        let time = self.ctx.time();
        let vm = self.vms.get_mut(&vm_id).ok_or(DatacenterError::VmNotFound(vm_id))?;
        let host_id = vm.host();
        let mut cloudlets = vm
            .cloudlet_scheduler_mut()
            .take_unfinished(CloudletStatus::Canceled, time);
        cloudlets.extend(vm.cloudlet_scheduler_mut().take_finished());
        self.allocation_policy.deallocate_host_for_vm(vm, &mut self.hosts, time);
        log_debug!(self.ctx, "vm {} destroyed on host {:?}", vm_id, host_id);
        for cloudlet in cloudlets {
            self.return_cloudlet(cloudlet);
        }
        if let Some(host_id) = host_id {
            self.schedule_idle_check(host_id);
        }
        Ok(())
    }

    fn on_vm_destroy(&mut self, vm_id: u32, ack: bool, src: Id) {
        if let Err(e) = self.destroy_vm(vm_id) {
            log_warn!(self.ctx, "can't destroy vm: {}", e);
            return;
        }
        if ack {
            let broker = self.vms.get(&vm_id).and_then(|vm| vm.broker).unwrap_or(src);
            self.ctx.emit_now(VmDestroyAck { vm_id }, broker);
        }
    }

    // Migrations //////////////////////////////////////////////////////////////////////////////////////////////////

    /// Starts migration of VM to the target host or to the host selected by the allocation policy.
    ///
    /// The target reserves VM resources right away, the migration completes after the time needed
    /// to transfer VM RAM. Returns `false` if the migration was not started.
    pub fn request_vm_migration(&mut self, vm_id: u32, target_host: Option<u32>) -> bool {
        let vm = match self.vms.get(&vm_id) {
            Some(vm) => vm,
            None => {
                log_warn!(self.ctx, "can't migrate unknown vm {}", vm_id);
                return false;
            }
        };
        let source_host = match vm.host() {
            Some(host_id) => host_id,
            None => {
                log_warn!(self.ctx, "can't migrate vm {} which is not placed", vm_id);
                return false;
            }
        };
        // the flag is dropped when the target fails, while the finish event is still pending
        let migrating_out = self
            .hosts
            .get(&source_host)
            .map_or(false, |host| host.vms_migrating_out().contains(&vm_id));
        if vm.is_in_migration() || migrating_out {
            log_warn!(self.ctx, "vm {} is already migrating", vm_id);
            return false;
        }
        let target_host = match target_host.or_else(|| self.allocation_policy.find_host_for_vm(vm, &self.hosts)) {
            Some(host_id) => host_id,
            None => {
                log_warn!(self.ctx, "no suitable host found to migrate vm {}", vm_id);
                return false;
            }
        };
        if target_host == source_host {
            log_warn!(self.ctx, "vm {} is already placed on host {}", vm_id, target_host);
            return false;
        }
        let target_bw = match self.hosts.get(&target_host) {
            Some(host) if host.power_state() == PowerState::Deactivating => {
                log_warn!(self.ctx, "can't migrate vm {} to host {} which is powering off", vm_id, target_host);
                return false;
            }
            Some(host) => host.bw().capacity(),
            None => {
                log_warn!(self.ctx, "can't migrate vm {} to unknown host {}", vm_id, target_host);
                return false;
            }
        };
        let delay = migration_delay(vm.ram, target_bw, self.bandwidth_percent_for_migration);

        let suitability = match (self.vms.get_mut(&vm_id), self.hosts.get_mut(&target_host)) {
            (Some(vm), Some(target)) => target.add_migrating_in_vm(vm),
            _ => Suitability::none(),
        };
        if !suitability.fully() {
            log_warn!(
                self.ctx,
                "vm {} can't be migrated to host {}: {}",
                vm_id,
                target_host,
                suitability
            );
            return false;
        }
        if let Some(source) = self.hosts.get_mut(&source_host) {
            source.add_migrating_out_vm(vm_id);
        }
        log_info!(
            self.ctx,
            "migration of vm {} from host {} to host {} started, it will take {:.3}s",
            vm_id,
            source_host,
            target_host,
            delay
        );
        self.ctx.emit_self(
            VmMigrationFinish {
                vm_id,
                target_host,
                ack: true,
            },
            delay,
        );
        true
    }

    fn finish_vm_migration(&mut self, vm_id: u32, target_host: u32, ack: bool) {
        let time = self.ctx.time();
        let mut next_event_delay = self.update_hosts_processing();

        let vm = match self.vms.get_mut(&vm_id) {
            Some(vm) => vm,
            None => return,
        };
        let source_host = vm.host();
        if let Some(source) = source_host.and_then(|host_id| self.hosts.get_mut(&host_id)) {
            source.remove_migrating_out_vm(vm_id);
        }
        self.allocation_policy.deallocate_host_for_vm(vm, &mut self.hosts, time);
        if let Some(target) = self.hosts.get_mut(&target_host) {
            target.remove_migrating_in_vm(vm);
        }
        let target_powering_off = self
            .hosts
            .get(&target_host)
            .map_or(false, |host| host.power_state() == PowerState::Deactivating);
        // VM destroyed or failed during the migration stays where it is
        let suitability = if source_host.is_some() && !target_powering_off {
            self.allocation_policy
                .allocate_host_for_vm_on(vm, target_host, &mut self.hosts, time)
        } else {
            Suitability::none()
        };
        let broker = vm.broker;

        let mut failed_cloudlets = Vec::new();
        if suitability.fully() {
            if let Some(target) = self.hosts.get(&target_host) {
                let share = target.allocated_mips_for_vm(vm_id);
                next_event_delay = next_event_delay.min(vm.update_processing(time, &share));
            }
            log_info!(
                self.ctx,
                "vm {} migrated from host {:?} to host {}",
                vm_id,
                source_host,
                target_host
            );
        } else if source_host.is_some() {
            failed_cloudlets = vm.cloudlet_scheduler_mut().take_unfinished(CloudletStatus::Failed, time);
            log_error!(
                self.ctx,
                "allocation of vm {} on target host {} failed due to {}, vm is left unplaced",
                vm_id,
                target_host,
                suitability
            );
        } else {
            log_warn!(self.ctx, "vm {} was removed before its migration finished", vm_id);
        }

        for cloudlet in failed_cloudlets {
            self.return_cloudlet(cloudlet);
        }
        if suitability.fully() {
            self.power_on_if_inactive(target_host);
        }
        let info = VmMigrationEventInfo {
            time,
            vm_id,
            source_host,
            target_host,
            suitability,
        };
        self.migration_finish_listeners.notify(&info);
        if ack {
            if let Some(broker) = broker {
                self.ctx.emit_now(
                    VmMigrationAck {
                        vm_id,
                        source_host,
                        target_host,
                        success: suitability.fully(),
                    },
                    broker,
                );
            }
        }
        if let Some(source_host) = source_host {
            self.schedule_idle_check(source_host);
        }
        self.schedule_next_update(next_event_delay);
    }

    // Host power //////////////////////////////////////////////////////////////////////////////////////////////////

    pub fn power_on_host(&mut self, host_id: u32) -> Result<()> {
        self.set_host_active(host_id, true)
    }

    pub fn power_off_host(&mut self, host_id: u32) -> Result<()> {
        self.set_host_active(host_id, false)
    }

    /// Powers on host which has just received a VM.
    fn power_on_if_inactive(&mut self, host_id: u32) {
        let inactive = self.hosts.get(&host_id).map_or(false, |host| !host.is_active());
        if inactive {
            if let Err(e) = self.power_on_host(host_id) {
                log_error!(self.ctx, "can't power on host {}: {}", host_id, e);
            }
        }
    }

    fn set_host_active(&mut self, host_id: u32, activate: bool) -> Result<()> {
        let time = self.ctx.time();
        let host = self
            .hosts
            .get_mut(&host_id)
            .ok_or(DatacenterError::HostNotFound(host_id))?;
        if !activate && !host.vms().is_empty() {
            log_warn!(
                self.ctx,
                "host {} is powered off with {} vms on it",
                host_id,
                host.vms().len()
            );
        }
        let transition = host.set_active(activate, time)?;
        self.handle_power_transition(host_id, activate, transition);
        Ok(())
    }

    fn handle_power_transition(&mut self, host_id: u32, activate: bool, transition: PowerTransition) {
        let state = if activate { "on" } else { "off" };
        match transition {
            PowerTransition::NoOp => {}
            PowerTransition::Completed => {
                log_debug!(self.ctx, "host {} powered {}", host_id, state);
                if activate {
                    self.schedule_idle_check(host_id);
                }
            }
            PowerTransition::Scheduled(delay) => {
                log_debug!(self.ctx, "host {} is powering {}, it will take {:.3}s", host_id, state, delay);
                self.ctx.emit_self(HostPowerTransition { host_id, activate }, delay);
            }
        }
    }

    fn on_power_transition(&mut self, host_id: u32, activate: bool) {
        let time = self.ctx.time();
        let completed = match self.hosts.get_mut(&host_id) {
            Some(host) => host.process_activation(activate, time),
            None => return,
        };
        if !completed {
            log_warn!(self.ctx, "host {} failed while powering on", host_id);
            return;
        }
        let state = if activate { "on" } else { "off" };
        log_debug!(self.ctx, "host {} powered {}", host_id, state);
        if activate {
            self.schedule_idle_check(host_id);
        }
    }

    // Host add/remove and failures ////////////////////////////////////////////////////////////////////////////////

    fn on_host_add(&mut self, spec: HostSpec, host_id: Option<u32>) {
        let host_id = host_id.unwrap_or(self.next_host_id);
        let result = match self.build_host(host_id, &spec) {
            Ok(host) => self.add_host(host),
            Err(e) => Err(e),
        };
        match result {
            Ok(host_id) => log_info!(self.ctx, "host {} ({}) added", host_id, spec.name),
            Err(e) => log_error!(self.ctx, "can't add host {}: {}", spec.name, e),
        }
    }

    /// Schedules removal of host after the delay.
    ///
    /// When one of several removals scheduled for the same host is processed, the others are cancelled.
    pub fn schedule_host_removal(&mut self, host_id: u32, delay: f64) -> EventId {
        let event_id = self.ctx.emit_self(HostRemoveRequest { host_id }, delay);
        self.pending_host_removals.entry(host_id).or_default().push(event_id);
        event_id
    }

    fn on_host_remove(&mut self, host_id: u32, event_id: EventId) {
        if let Some(event_ids) = self.pending_host_removals.remove(&host_id) {
            for id in event_ids.into_iter().filter(|id| *id != event_id) {
                self.ctx.cancel_event(id);
            }
        }
        if !self.hosts.contains_key(&host_id) {
            log_warn!(self.ctx, "host {} not found, removal ignored", host_id);
            return;
        }
        log_info!(self.ctx, "removing host {}", host_id);
        if let Err(e) = self.fail_host(host_id) {
            log_error!(self.ctx, "can't remove host {}: {}", host_id, e);
        }
    }

    /// Makes host fail: its VMs are destroyed and marked failed, reservations for migrating in VMs are dropped
    /// and the host is powered off.
    pub fn fail_host(&mut self, host_id: u32) -> Result<()> {
        let time = self.ctx.time();
        let host = self
            .hosts
            .get_mut(&host_id)
            .ok_or(DatacenterError::HostNotFound(host_id))?;
        let vm_ids = host.vms().to_vec();
        let migrating_in: Vec<u32> = host.vms_migrating_in().iter().copied().collect();

        let mut cloudlets = Vec::new();
        let mut failed_vms = Vec::new();
        for vm_id in vm_ids {
            if let Some(vm) = self.vms.get_mut(&vm_id) {
                cloudlets.extend(vm.cloudlet_scheduler_mut().take_unfinished(CloudletStatus::Failed, time));
                cloudlets.extend(vm.cloudlet_scheduler_mut().take_finished());
                host.destroy_vm(vm, time);
                vm.set_in_migration(false);
                vm.set_failed(true);
                failed_vms.push((vm_id, vm.broker));
            }
        }
        for vm_id in migrating_in {
            if let Some(vm) = self.vms.get_mut(&vm_id) {
                host.remove_migrating_in_vm(vm);
            }
        }
        let transition = host.set_failed(true, time);
        log_warn!(
            self.ctx,
            "host {} failed, {} vms destroyed",
            host_id,
            failed_vms.len()
        );
        self.handle_power_transition(host_id, false, transition);

        for cloudlet in cloudlets {
            self.return_cloudlet(cloudlet);
        }
        for (vm_id, broker) in failed_vms {
            if let Some(broker) = broker {
                self.ctx.emit_now(VmFailed { vm_id, host_id }, broker);
            }
        }
        Ok(())
    }

    /// Clears the failed status of host so that it can be powered on again.
    pub fn recover_host(&mut self, host_id: u32) -> Result<()> {
        let time = self.ctx.time();
        let host = self
            .hosts
            .get_mut(&host_id)
            .ok_or(DatacenterError::HostNotFound(host_id))?;
        host.set_failed(false, time);
        log_info!(self.ctx, "host {} recovered", host_id);
        Ok(())
    }

    // Cloudlets ///////////////////////////////////////////////////////////////////////////////////////////////////

    fn on_cloudlet_submit(&mut self, mut cloudlet: Cloudlet, ack: bool, src: Id) {
        let time = self.ctx.time();
        if cloudlet.broker.is_none() {
            cloudlet.broker = Some(src);
        }
        let cloudlet_id = cloudlet.id;
        let vm_id = cloudlet.vm_id;
        let broker = cloudlet.broker.unwrap_or(src);

        let placed = self.vms.get(&vm_id).map_or(false, |vm| vm.is_placed());
        let accepted = if placed {
            let mut delay = f64::INFINITY;
            if let Some(vm) = self.vms.get_mut(&vm_id) {
                delay = vm.cloudlet_scheduler_mut().submit(cloudlet, time);
            }
            self.cloudlet_vms.insert(cloudlet_id, vm_id);
            log_debug!(self.ctx, "cloudlet {} submitted to vm {}", cloudlet_id, vm_id);
            self.schedule_next_update(delay);
            true
        } else {
            log_warn!(
                self.ctx,
                "cloudlet {} rejected: vm {} is not running",
                cloudlet_id,
                vm_id
            );
            cloudlet.status = CloudletStatus::Failed;
            cloudlet.finish_time = time;
            self.return_cloudlet(cloudlet);
            false
        };
        if ack {
            self.ctx.emit_now(
                CloudletSubmitAck {
                    cloudlet_id,
                    vm_id,
                    accepted,
                },
                broker,
            );
        }
    }

    fn cloudlet_vm(&mut self, cloudlet_id: u64) -> Option<&mut Vm> {
        let vm_id = *self.cloudlet_vms.get(&cloudlet_id)?;
        self.vms.get_mut(&vm_id)
    }

    pub fn cancel_cloudlet(&mut self, cloudlet_id: u64) -> bool {
        let time = self.ctx.time();
        let cloudlet = self
            .cloudlet_vm(cloudlet_id)
            .and_then(|vm| vm.cloudlet_scheduler_mut().cancel(cloudlet_id, time));
        match cloudlet {
            Some(cloudlet) => {
                log_debug!(self.ctx, "cloudlet {} canceled", cloudlet_id);
                self.return_cloudlet(cloudlet);
                self.schedule_next_update(self.min_time_between_events);
                true
            }
            None => {
                log_warn!(self.ctx, "can't cancel cloudlet {}", cloudlet_id);
                false
            }
        }
    }

    pub fn pause_cloudlet(&mut self, cloudlet_id: u64) -> bool {
        let time = self.ctx.time();
        let paused = self
            .cloudlet_vm(cloudlet_id)
            .map_or(false, |vm| vm.cloudlet_scheduler_mut().pause(cloudlet_id, time));
        if paused {
            log_debug!(self.ctx, "cloudlet {} paused", cloudlet_id);
            self.schedule_next_update(self.min_time_between_events);
        } else {
            log_warn!(self.ctx, "can't pause cloudlet {}", cloudlet_id);
        }
        paused
    }

    pub fn resume_cloudlet(&mut self, cloudlet_id: u64) -> bool {
        let time = self.ctx.time();
        let delay = self
            .cloudlet_vm(cloudlet_id)
            .and_then(|vm| vm.cloudlet_scheduler_mut().resume(cloudlet_id, time));
        match delay {
            Some(delay) => {
                log_debug!(self.ctx, "cloudlet {} resumed", cloudlet_id);
                self.schedule_next_update(delay);
                true
            }
            None => {
                log_warn!(self.ctx, "can't resume cloudlet {}", cloudlet_id);
                false
            }
        }
    }

    fn return_finished_cloudlets(&mut self) {
        let mut finished = Vec::new();
        for vm in self.vms.values_mut() {
            finished.extend(vm.cloudlet_scheduler_mut().take_finished());
        }
        for cloudlet in finished {
            self.return_cloudlet(cloudlet);
        }
    }

    fn return_cloudlet(&mut self, cloudlet: Cloudlet) {
        self.cloudlet_vms.remove(&cloudlet.id);
        log_debug!(
            self.ctx,
            "cloudlet {} on vm {} returned with status {}",
            cloudlet.id,
            cloudlet.vm_id,
            cloudlet.status
        );
        match cloudlet.broker {
            Some(broker) => {
                self.ctx.emit_now(CloudletReturn { cloudlet }, broker);
            }
            None => log_warn!(self.ctx, "cloudlet {} has no broker to return to", cloudlet.id),
        }
    }
}

impl EventHandler for Datacenter {
    fn on(&mut self, event: Event) {
        let event_id = event.id;
        cast!(match event.data {
            VmCreateRequest { vm_id, ack } => {
                self.on_vm_create(vm_id, ack, event.src);
            }
            VmDestroyRequest { vm_id, ack } => {
                self.on_vm_destroy(vm_id, ack, event.src);
            }
            VmMigrationRequest { vm_id, target_host } => {
                self.request_vm_migration(vm_id, target_host);
            }
            VmMigrationFinish {
                vm_id,
                target_host,
                ack,
            } => {
                self.finish_vm_migration(vm_id, target_host, ack);
            }
            UpdateProcessing {} => {
                self.on_update_processing(event_id);
            }
            HostAddRequest { spec, host_id } => {
                self.on_host_add(spec, host_id);
            }
            HostRemoveRequest { host_id } => {
                self.on_host_remove(host_id, event_id);
            }
            HostPowerOn { host_id } => {
                if let Err(e) = self.power_on_host(host_id) {
                    log_error!(self.ctx, "can't power on host {}: {}", host_id, e);
                }
            }
            HostPowerOff { host_id } => {
                if let Err(e) = self.power_off_host(host_id) {
                    log_error!(self.ctx, "can't power off host {}: {}", host_id, e);
                }
            }
            HostPowerTransition { host_id, activate } => {
                self.on_power_transition(host_id, activate);
            }
            CloudletSubmit { cloudlet, ack } => {
                self.on_cloudlet_submit(cloudlet, ack, event.src);
            }
            CloudletCancel { cloudlet_id } => {
                self.cancel_cloudlet(cloudlet_id);
            }
            CloudletPause { cloudlet_id } => {
                self.pause_cloudlet(cloudlet_id);
            }
            CloudletResume { cloudlet_id } => {
                self.resume_cloudlet(cloudlet_id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_delay_is_quantized() {
        assert_eq!(processing_update_delay(23., 10., 50.), 7.);
        // counted from the clock, not from its floor, so the update lands at 30.6
        assert_eq!(processing_update_delay(23.6, 10., 50.), 7.);
        assert_eq!(processing_update_delay(23., 10., 2.), 2.);
        assert_eq!(processing_update_delay(30., 10., 50.), 10.);
        assert_eq!(processing_update_delay(23., 0., 50.), 50.);
    }

    #[test]
    fn test_migration_delay() {
        assert_eq!(migration_delay(1000, 10000, 0.5), 1000. / (10000. * 0.5 / 8.));
        assert_eq!(migration_delay(1000, 10000, 0.5), 1.6);
        assert_eq!(migration_delay(2048, 1000, 1.), 16.384);
    }
}
