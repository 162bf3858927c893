//! Broker submitting VMs and cloudlets on behalf of a datacenter customer.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use dslab_core::{cast, log_debug, log_info, log_warn};
use dslab_core::{Event, EventHandler, Id, SimulationContext};

use crate::cloudlet::Cloudlet;
use crate::datacenter::Datacenter;
use crate::error::Result;
use crate::events::cloudlet::{CloudletReturn, CloudletSubmit, CloudletSubmitAck};
use crate::events::migration::{VmMigrationAck, VmMigrationRequest};
use crate::events::vm::{VmCreateAck, VmCreateRequest, VmDestroyAck, VmDestroyRequest, VmFailed};
use crate::vm::Vm;

/// Simple broker which requests VM creation in a single datacenter.
///
/// VM creation which failed due to lack of resources is retried every `vm_allocation_retry_period` seconds
/// until `vm_allocation_timeout` seconds pass since the first submission.
pub struct SimpleBroker {
    pub id: Id,
    datacenter: Rc<RefCell<Datacenter>>,
    datacenter_id: Id,
    vm_allocation_retry_period: f64,
    vm_allocation_timeout: f64,
    vm_exec_list: BTreeMap<u32, u32>,
    vm_waiting_list: BTreeSet<u32>,
    vm_first_submission: HashMap<u32, f64>,
    vms_failed_creation: Vec<u32>,
    vms_destroyed: Vec<u32>,
    vms_failed: Vec<u32>,
    migration_acks: Vec<VmMigrationAck>,
    returned_cloudlets: Vec<Cloudlet>,
    ctx: SimulationContext,
}

impl SimpleBroker {
    pub fn new(
        datacenter: Rc<RefCell<Datacenter>>,
        vm_allocation_retry_period: f64,
        vm_allocation_timeout: f64,
        ctx: SimulationContext,
    ) -> Self {
        let datacenter_id = datacenter.borrow().id();
        Self {
            id: ctx.id(),
            datacenter,
            datacenter_id,
            vm_allocation_retry_period,
            vm_allocation_timeout,
            vm_exec_list: BTreeMap::new(),
            vm_waiting_list: BTreeSet::new(),
            vm_first_submission: HashMap::new(),
            vms_failed_creation: Vec::new(),
            vms_destroyed: Vec::new(),
            vms_failed: Vec::new(),
            migration_acks: Vec::new(),
            returned_cloudlets: Vec::new(),
            ctx,
        }
    }

    /// Registers VM in the datacenter and requests its creation after the delay.
    pub fn submit_vm(&mut self, vm: Vm, delay: f64) -> Result<u32> {
        let vm = vm.with_broker(self.id);
        let vm_id = self.datacenter.borrow_mut().add_vm(vm)?;
        self.vm_first_submission.insert(vm_id, self.ctx.time() + delay);
        self.request_vm_creation(vm_id, delay);
        Ok(vm_id)
    }

    fn request_vm_creation(&mut self, vm_id: u32, delay: f64) {
        self.vm_waiting_list.insert(vm_id);
        self.ctx
            .emit(VmCreateRequest { vm_id, ack: true }, self.datacenter_id, delay);
    }

    pub fn submit_cloudlet(&mut self, mut cloudlet: Cloudlet, delay: f64) {
        cloudlet.broker = Some(self.id);
        self.ctx
            .emit(CloudletSubmit { cloudlet, ack: true }, self.datacenter_id, delay);
    }

    pub fn destroy_vm(&mut self, vm_id: u32, delay: f64) {
        self.ctx
            .emit(VmDestroyRequest { vm_id, ack: true }, self.datacenter_id, delay);
    }

    pub fn migrate_vm(&mut self, vm_id: u32, target_host: Option<u32>, delay: f64) {
        self.ctx
            .emit(VmMigrationRequest { vm_id, target_host }, self.datacenter_id, delay);
    }

    fn on_vm_create_ack(&mut self, ack: VmCreateAck) {
        let vm_id = ack.vm_id;
        if let (Some(host_id), true) = (ack.host_id, ack.suitability.fully()) {
            log_info!(self.ctx, "vm {} is running on host {}", vm_id, host_id);
            self.vm_waiting_list.remove(&vm_id);
            self.vm_exec_list.insert(vm_id, host_id);
            return;
        }
        let time = self.ctx.time();
        let first_submission = self.vm_first_submission.get(&vm_id).copied().unwrap_or(time);
        let retry_time = time + self.vm_allocation_retry_period;
        if self.vm_allocation_retry_period > 0. && retry_time - first_submission <= self.vm_allocation_timeout {
            log_debug!(
                self.ctx,
                "vm {} creation failed ({}), retrying in {:.3}s",
                vm_id,
                ack.suitability,
                self.vm_allocation_retry_period
            );
            self.request_vm_creation(vm_id, self.vm_allocation_retry_period);
        } else {
            log_warn!(self.ctx, "vm {} creation failed after {:.3}s", vm_id, time - first_submission);
            self.vm_waiting_list.remove(&vm_id);
            self.vms_failed_creation.push(vm_id);
        }
    }

    fn on_migration_ack(&mut self, ack: VmMigrationAck) {
        if ack.success {
            self.vm_exec_list.insert(ack.vm_id, ack.target_host);
        } else if ack.source_host.is_some() {
            log_warn!(self.ctx, "vm {} was lost during migration", ack.vm_id);
            self.vm_exec_list.remove(&ack.vm_id);
        }
        self.migration_acks.push(ack);
    }

    /// Running VMs with their hosts.
    pub fn vm_exec_list(&self) -> &BTreeMap<u32, u32> {
        &self.vm_exec_list
    }

    pub fn vm_waiting_list(&self) -> &BTreeSet<u32> {
        &self.vm_waiting_list
    }

    pub fn vms_failed_creation(&self) -> &[u32] {
        &self.vms_failed_creation
    }

    pub fn vms_destroyed(&self) -> &[u32] {
        &self.vms_destroyed
    }

    pub fn vms_failed(&self) -> &[u32] {
        &self.vms_failed
    }

    pub fn migration_acks(&self) -> &[VmMigrationAck] {
        &self.migration_acks
    }

    /// Cloudlets returned by the datacenter, whatever their final status is.
    pub fn returned_cloudlets(&self) -> &[Cloudlet] {
        &self.returned_cloudlets
    }
}

impl EventHandler for SimpleBroker {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            VmCreateAck {
                vm_id,
                host_id,
                suitability,
            } => {
                self.on_vm_create_ack(VmCreateAck {
                    vm_id,
                    host_id,
                    suitability,
                });
            }
            VmDestroyAck { vm_id } => {
                self.vm_exec_list.remove(&vm_id);
                self.vms_destroyed.push(vm_id);
            }
            VmFailed { vm_id, host_id } => {
                log_warn!(self.ctx, "vm {} failed together with host {}", vm_id, host_id);
                self.vm_exec_list.remove(&vm_id);
                self.vms_failed.push(vm_id);
            }
            VmMigrationAck {
                vm_id,
                source_host,
                target_host,
                success,
            } => {
                self.on_migration_ack(VmMigrationAck {
                    vm_id,
                    source_host,
                    target_host,
                    success,
                });
            }
            CloudletSubmitAck {
                cloudlet_id,
                vm_id,
                accepted,
            } => {
                if !accepted {
                    log_warn!(self.ctx, "cloudlet {} was rejected by vm {}", cloudlet_id, vm_id);
                }
            }
            CloudletReturn { cloudlet } => {
                log_debug!(
                    self.ctx,
                    "cloudlet {} returned with status {}",
                    cloudlet.id,
                    cloudlet.status
                );
                self.returned_cloudlets.push(cloudlet);
            }
        })
    }
}
