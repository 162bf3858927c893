use std::cell::RefCell;
use std::rc::Rc;

use sugars::{rc, refcell};

use dslab_core::event::EventId;
use dslab_core::{Id, Simulation, SimulationContext};

use crate::broker::SimpleBroker;
use crate::cloudlet::Cloudlet;
use crate::config::{DatacenterConfig, HostSpec};
use crate::datacenter::Datacenter;
use crate::error::{DatacenterError, Result};
use crate::events::cloudlet::{CloudletCancel, CloudletPause, CloudletResume};
use crate::events::host::{HostAddRequest, HostPowerOff, HostPowerOn};
use crate::vm::Vm;

/// Entry point for building and running datacenter simulations.
///
/// Creates the datacenter with hosts described in the config and a default broker, then allows
/// to submit VMs and cloudlets and to manage hosts while the simulation runs.
pub struct DatacenterSimulation {
    datacenter: Rc<RefCell<Datacenter>>,
    datacenter_id: Id,
    broker: Rc<RefCell<SimpleBroker>>,
    broker_id: Id,
    sim: Simulation,
    ctx: SimulationContext,
    config: DatacenterConfig,
}

impl DatacenterSimulation {
    pub fn new(mut sim: Simulation, config: DatacenterConfig) -> Result<Self> {
        let datacenter = rc!(refcell!(Datacenter::new(sim.create_context("datacenter"), &config)?));
        let datacenter_id = sim.add_handler("datacenter", datacenter.clone());
        for spec in config.host_specs() {
            datacenter.borrow_mut().add_host_from_spec(&spec)?;
        }

        let broker = rc!(refcell!(SimpleBroker::new(
            datacenter.clone(),
            config.vm_allocation_retry_period,
            config.vm_allocation_timeout,
            sim.create_context("broker"),
        )));
        let broker_id = sim.add_handler("broker", broker.clone());
        let ctx = sim.create_context("simulation");
        datacenter.borrow_mut().start();

        Ok(Self {
            datacenter,
            datacenter_id,
            broker,
            broker_id,
            sim,
            ctx,
            config,
        })
    }

    /// Creates simulation from YAML config file.
    pub fn from_config_file(sim: Simulation, file_name: &str) -> Result<Self> {
        Self::new(sim, DatacenterConfig::from_file(file_name)?)
    }

    /// Adds another broker working with the same datacenter.
    pub fn add_broker(&mut self, name: &str) -> Rc<RefCell<SimpleBroker>> {
        let broker = rc!(refcell!(SimpleBroker::new(
            self.datacenter.clone(),
            self.config.vm_allocation_retry_period,
            self.config.vm_allocation_timeout,
            self.sim.create_context(name),
        )));
        self.sim.add_handler(name, broker.clone());
        broker
    }

    /// Builds VM with resource defaults from the config.
    pub fn build_vm(&self, id: u32, pes: u32, mips: u64) -> Result<Vm> {
        Vm::new(id, pes, mips, &self.config.resource_defaults)
    }

    pub fn spawn_vm_now(&mut self, vm: Vm) -> Result<u32> {
        self.broker.borrow_mut().submit_vm(vm, 0.)
    }

    pub fn spawn_vm_with_delay(&mut self, vm: Vm, delay: f64) -> Result<u32> {
        self.broker.borrow_mut().submit_vm(vm, delay)
    }

    pub fn submit_cloudlet(&mut self, cloudlet: Cloudlet, delay: f64) {
        self.broker.borrow_mut().submit_cloudlet(cloudlet, delay);
    }

    pub fn cancel_cloudlet(&mut self, cloudlet_id: u64, delay: f64) {
        self.ctx.emit(CloudletCancel { cloudlet_id }, self.datacenter_id, delay);
    }

    pub fn pause_cloudlet(&mut self, cloudlet_id: u64, delay: f64) {
        self.ctx.emit(CloudletPause { cloudlet_id }, self.datacenter_id, delay);
    }

    pub fn resume_cloudlet(&mut self, cloudlet_id: u64, delay: f64) {
        self.ctx.emit(CloudletResume { cloudlet_id }, self.datacenter_id, delay);
    }

    pub fn destroy_vm(&mut self, vm_id: u32, delay: f64) {
        self.broker.borrow_mut().destroy_vm(vm_id, delay);
    }

    /// Requests VM migration, the target is selected by the allocation policy if not specified.
    pub fn migrate_vm(&mut self, vm_id: u32, target_host: Option<u32>, delay: f64) {
        self.broker.borrow_mut().migrate_vm(vm_id, target_host, delay);
    }

    pub fn power_on_host(&mut self, host_id: u32, delay: f64) {
        self.ctx.emit(HostPowerOn { host_id }, self.datacenter_id, delay);
    }

    pub fn power_off_host(&mut self, host_id: u32, delay: f64) {
        self.ctx.emit(HostPowerOff { host_id }, self.datacenter_id, delay);
    }

    /// Adds host to the running datacenter after the delay.
    pub fn add_host_with_delay(&mut self, spec: HostSpec, host_id: Option<u32>, delay: f64) {
        self.ctx
            .emit(HostAddRequest { spec, host_id }, self.datacenter_id, delay);
    }

    /// Removes host from the datacenter after the delay, simulating its failure.
    pub fn remove_host_with_delay(&mut self, host_id: u32, delay: f64) -> Result<EventId> {
        let mut datacenter = self.datacenter.borrow_mut();
        if datacenter.host(host_id).is_none() {
            return Err(DatacenterError::HostNotFound(host_id));
        }
        Ok(datacenter.schedule_host_removal(host_id, delay))
    }

    pub fn datacenter(&self) -> Rc<RefCell<Datacenter>> {
        self.datacenter.clone()
    }

    pub fn datacenter_id(&self) -> Id {
        self.datacenter_id
    }

    pub fn broker(&self) -> Rc<RefCell<SimpleBroker>> {
        self.broker.clone()
    }

    pub fn broker_id(&self) -> Id {
        self.broker_id
    }

    pub fn config(&self) -> &DatacenterConfig {
        &self.config
    }

    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    pub fn step(&mut self) -> bool {
        self.sim.step()
    }

    pub fn steps(&mut self, step_count: u64) -> bool {
        self.sim.steps(step_count)
    }

    pub fn step_for_duration(&mut self, time: f64) {
        self.sim.step_for_duration(time);
    }

    pub fn step_until_no_events(&mut self) {
        self.sim.step_until_no_events();
    }

    pub fn event_count(&self) -> u64 {
        self.sim.event_count()
    }

    pub fn current_time(&self) -> f64 {
        self.sim.time()
    }
}
