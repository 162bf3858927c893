use std::cell::RefCell;
use std::rc::Rc;

use dslab_core::simulation::Simulation;

use dslab_datacenter::cloudlet::{Cloudlet, CloudletStatus};
use dslab_datacenter::config::{DatacenterConfig, HostConfig, HostSpec};
use dslab_datacenter::datacenter::migration_delay;
use dslab_datacenter::listener::VmMigrationEventInfo;
use dslab_datacenter::power::PowerState;
use dslab_datacenter::simulation::DatacenterSimulation;

fn build_simulation(hosts: Vec<HostSpec>) -> (DatacenterSimulation, Rc<RefCell<Vec<VmMigrationEventInfo>>>) {
    let mut config = DatacenterConfig::new();
    config.hosts = hosts.into_iter().map(HostConfig::from).collect();
    let sim = DatacenterSimulation::new(Simulation::new(123), config).unwrap();
    let migrations = Rc::new(RefCell::new(Vec::new()));
    let migrations_clone = migrations.clone();
    sim.datacenter()
        .borrow_mut()
        .on_vm_migration_finish(move |info| migrations_clone.borrow_mut().push(info.clone()));
    (sim, migrations)
}

#[test]
fn test_migration_delay_formula() {
    // 1000 MB of RAM over half of 10000 Mbit/s
    assert_eq!(migration_delay(1000, 10000, 0.5), 1000. / (10000. * 0.5 / 8.));
    assert_eq!(migration_delay(1000, 10000, 1.), 0.8);
}

#[test]
// VM with 1000 MB of RAM migrates over half of 10000 Mbit/s, which takes 1.6 seconds.
fn test_migration_round_trip() {
    let (mut sim, migrations) = build_simulation(vec![HostSpec::new(4, 1000), HostSpec::new(4, 1000)]);
    let vm = sim.build_vm(0, 1, 1000).unwrap().with_ram(1000).unwrap();
    sim.spawn_vm_now(vm).unwrap();
    sim.submit_cloudlet(Cloudlet::new(0, 0, 10000, 1), 0.);
    sim.migrate_vm(0, Some(1), 2.);

    sim.step_for_duration(3.);
    {
        let datacenter = sim.datacenter();
        let datacenter = datacenter.borrow();
        let vm = datacenter.vm(0).unwrap();
        assert!(vm.is_in_migration());
        assert_eq!(vm.host(), Some(0));
        assert!(datacenter.host(0).unwrap().vms_migrating_out().contains(&0));
        assert!(datacenter.host(1).unwrap().vms_migrating_in().contains(&0));
        // the target reserves resources for the whole migration
        assert_eq!(datacenter.host(1).unwrap().ram().allocated(), 1000);
        assert_eq!(datacenter.host(1).unwrap().busy_pes_count(), 1);
    }

    sim.step_until_no_events();
    let migrations = migrations.borrow();
    assert_eq!(migrations.len(), 1);
    assert!(migrations[0].succeeded());
    assert_eq!(migrations[0].vm_id, 0);
    assert_eq!(migrations[0].source_host, Some(0));
    assert_eq!(migrations[0].target_host, 1);
    assert!((migrations[0].time - 3.6).abs() < 1e-9);

    let datacenter = sim.datacenter();
    let datacenter = datacenter.borrow();
    let vm = datacenter.vm(0).unwrap();
    assert_eq!(vm.host(), Some(1));
    assert!(!vm.is_in_migration());
    let source = datacenter.host(0).unwrap();
    assert!(source.vms().is_empty());
    assert!(source.vms_migrating_out().is_empty());
    assert_eq!(source.ram().allocated(), 0);
    assert_eq!(source.free_pes_count(), 4);
    let target = datacenter.host(1).unwrap();
    assert_eq!(target.vms(), &[0]);
    assert!(target.vms_migrating_in().is_empty());
    assert_eq!(target.ram().allocated(), 1000);

    let broker = sim.broker();
    let broker = broker.borrow();
    assert_eq!(broker.vm_exec_list().get(&0), Some(&1));
    assert_eq!(broker.migration_acks().len(), 1);
    assert!(broker.migration_acks()[0].success);
    // the cloudlet keeps running during and after the migration
    let cloudlets = broker.returned_cloudlets();
    assert_eq!(cloudlets.len(), 1);
    assert_eq!(cloudlets[0].status, CloudletStatus::Success);
    assert!((cloudlets[0].finish_time - 10.).abs() < 1e-6);
}

#[test]
fn test_migration_target_selected_by_policy() {
    let (mut sim, migrations) = build_simulation(vec![
        HostSpec::new(4, 1000),
        HostSpec::new(1, 1000),
        HostSpec::new(4, 1000),
    ]);
    let vm = sim.build_vm(0, 2, 1000).unwrap();
    sim.spawn_vm_now(vm).unwrap();
    sim.migrate_vm(0, None, 1.);
    sim.step_until_no_events();

    // the current host is skipped and the second host is too small
    let migrations = migrations.borrow();
    assert_eq!(migrations.len(), 1);
    assert_eq!(migrations[0].target_host, 2);
    assert_eq!(sim.datacenter().borrow().vm(0).unwrap().host(), Some(2));
}

#[test]
fn test_migration_to_unsuitable_host_is_not_started() {
    let (mut sim, migrations) = build_simulation(vec![HostSpec::new(4, 1000), HostSpec::new(1, 1000)]);
    let vm = sim.build_vm(0, 2, 1000).unwrap();
    sim.spawn_vm_now(vm).unwrap();
    sim.migrate_vm(0, Some(1), 1.);
    sim.migrate_vm(0, Some(0), 2.);
    sim.step_until_no_events();

    assert!(migrations.borrow().is_empty());
    let datacenter = sim.datacenter();
    let datacenter = datacenter.borrow();
    let vm = datacenter.vm(0).unwrap();
    assert_eq!(vm.host(), Some(0));
    assert!(!vm.is_in_migration());
    assert!(datacenter.host(0).unwrap().vms_migrating_out().is_empty());
    assert!(datacenter.host(1).unwrap().vms_migrating_in().is_empty());
    assert_eq!(datacenter.host(1).unwrap().ram().allocated(), 0);
    assert!(sim.broker().borrow().migration_acks().is_empty());
}

#[test]
// The target host fails while the VM RAM is being transferred, so the VM ends up unplaced.
fn test_migration_fails_when_target_fails() {
    let (mut sim, migrations) = build_simulation(vec![HostSpec::new(4, 1000), HostSpec::new(4, 1000)]);
    let vm = sim.build_vm(0, 1, 1000).unwrap().with_ram(1000).unwrap();
    sim.spawn_vm_now(vm).unwrap();
    sim.submit_cloudlet(Cloudlet::new(0, 0, 100000, 1), 0.);
    sim.migrate_vm(0, Some(1), 1.);
    sim.remove_host_with_delay(1, 2.).unwrap();
    sim.step_until_no_events();

    let migrations = migrations.borrow();
    assert_eq!(migrations.len(), 1);
    assert!(!migrations[0].succeeded());
    assert!(!migrations[0].suitability.fully());
    assert!((migrations[0].time - 2.6).abs() < 1e-9);

    let datacenter = sim.datacenter();
    let datacenter = datacenter.borrow();
    let vm = datacenter.vm(0).unwrap();
    assert_eq!(vm.host(), None);
    assert!(!vm.is_in_migration());
    assert!(!vm.is_failed());
    assert!(datacenter.host(0).unwrap().vms().is_empty());
    assert_eq!(datacenter.host(0).unwrap().ram().allocated(), 0);
    assert!(datacenter.host(1).unwrap().vms_migrating_in().is_empty());
    assert_eq!(datacenter.host(1).unwrap().ram().allocated(), 0);

    let broker = sim.broker();
    let broker = broker.borrow();
    assert!(broker.vm_exec_list().is_empty());
    assert!(!broker.migration_acks()[0].success);
    let cloudlets = broker.returned_cloudlets();
    assert_eq!(cloudlets.len(), 1);
    assert_eq!(cloudlets[0].status, CloudletStatus::Failed);
}

#[test]
// The source host fails during the migration, the target reservation is released.
fn test_migration_of_vm_lost_with_source_host() {
    let (mut sim, migrations) = build_simulation(vec![HostSpec::new(4, 1000), HostSpec::new(4, 1000)]);
    let vm = sim.build_vm(0, 1, 1000).unwrap().with_ram(1000).unwrap();
    sim.spawn_vm_now(vm).unwrap();
    sim.migrate_vm(0, Some(1), 1.);
    sim.remove_host_with_delay(0, 2.).unwrap();
    sim.step_until_no_events();

    let migrations = migrations.borrow();
    assert_eq!(migrations.len(), 1);
    assert!(!migrations[0].succeeded());
    assert_eq!(migrations[0].source_host, None);

    let datacenter = sim.datacenter();
    let datacenter = datacenter.borrow();
    let vm = datacenter.vm(0).unwrap();
    assert!(vm.is_failed());
    assert_eq!(vm.host(), None);
    let target = datacenter.host(1).unwrap();
    assert!(target.vms().is_empty());
    assert!(target.vms_migrating_in().is_empty());
    assert_eq!(target.ram().allocated(), 0);
    assert_eq!(sim.broker().borrow().vms_failed(), &[0]);
}

#[test]
// Target host stays powered off until the migrated VM arrives on it.
fn test_migration_powers_on_inactive_target() {
    let (mut sim, migrations) = build_simulation(vec![
        HostSpec::new(4, 1000),
        HostSpec::new(4, 1000).with_active_on_startup(false),
    ]);
    let vm = sim.build_vm(0, 1, 1000).unwrap();
    sim.spawn_vm_now(vm).unwrap();
    sim.submit_cloudlet(Cloudlet::new(0, 0, 5000, 1), 0.);
    sim.migrate_vm(0, Some(1), 1.);

    sim.step_for_duration(1.5);
    assert!(!sim.datacenter().borrow().host(1).unwrap().is_active());
    sim.step_until_no_events();

    assert_eq!(migrations.borrow().len(), 1);
    assert!(migrations.borrow()[0].succeeded());
    let datacenter = sim.datacenter();
    let datacenter = datacenter.borrow();
    let target = datacenter.host(1).unwrap();
    assert_eq!(target.vms(), &[0]);
    assert_eq!(target.power_state(), PowerState::Active);
    assert!(target.power_consumption() > 0.);
    let broker = sim.broker();
    let broker = broker.borrow();
    assert_eq!(broker.returned_cloudlets()[0].status, CloudletStatus::Success);
}

#[test]
// Host which is powering off receives neither migrations nor new VMs until the shutdown completes.
fn test_powering_off_host_is_not_a_target() {
    let (mut sim, migrations) = build_simulation(vec![
        HostSpec::new(4, 1000),
        HostSpec::new(4, 1000).with_power_model("Linear[max=200,idle=100,shutdown=10]"),
    ]);
    let vm = sim.build_vm(0, 1, 1000).unwrap();
    sim.spawn_vm_now(vm).unwrap();
    sim.power_off_host(1, 0.5);
    sim.migrate_vm(0, Some(1), 1.);
    sim.migrate_vm(0, None, 2.);
    // fits only on the second host
    let big_vm = sim.build_vm(1, 4, 1000).unwrap();
    sim.spawn_vm_with_delay(big_vm, 3.).unwrap();

    sim.step_for_duration(5.);
    {
        let datacenter = sim.datacenter();
        let datacenter = datacenter.borrow();
        assert_eq!(datacenter.host(1).unwrap().power_state(), PowerState::Deactivating);
        assert!(datacenter.host(1).unwrap().vms_migrating_in().is_empty());
        assert!(!datacenter.vm(1).unwrap().is_placed());
    }
    sim.step_until_no_events();

    assert!(migrations.borrow().is_empty());
    let datacenter = sim.datacenter();
    let datacenter = datacenter.borrow();
    assert_eq!(datacenter.vm(0).unwrap().host(), Some(0));
    let big_vm = datacenter.vm(1).unwrap();
    assert_eq!(big_vm.host(), Some(1));
    assert!(big_vm.start_time() > 10.5);
    assert_eq!(datacenter.host(1).unwrap().power_state(), PowerState::Active);
}

#[test]
// The target fails during the migration, the VM can't be migrated elsewhere until the pending migration finishes.
fn test_second_migration_waits_for_pending_one() {
    let (mut sim, migrations) = build_simulation(vec![
        HostSpec::new(4, 1000),
        HostSpec::new(4, 1000),
        HostSpec::new(4, 1000),
    ]);
    let vm = sim.build_vm(0, 1, 1000).unwrap().with_ram(1000).unwrap();
    sim.spawn_vm_now(vm).unwrap();
    sim.submit_cloudlet(Cloudlet::new(0, 0, 100000, 1), 0.);
    sim.migrate_vm(0, Some(1), 1.);
    sim.remove_host_with_delay(1, 1.5).unwrap();
    sim.migrate_vm(0, Some(2), 2.);

    sim.step_for_duration(2.2);
    {
        let datacenter = sim.datacenter();
        let datacenter = datacenter.borrow();
        assert!(datacenter.host(0).unwrap().vms_migrating_out().contains(&0));
        assert!(datacenter.host(2).unwrap().vms_migrating_in().is_empty());
        assert_eq!(datacenter.host(2).unwrap().ram().allocated(), 0);
    }
    sim.step_until_no_events();

    let migrations = migrations.borrow();
    assert_eq!(migrations.len(), 1);
    assert_eq!(migrations[0].target_host, 1);
    assert!(!migrations[0].succeeded());
    let datacenter = sim.datacenter();
    let datacenter = datacenter.borrow();
    assert_eq!(datacenter.vm(0).unwrap().host(), None);
    let untouched = datacenter.host(2).unwrap();
    assert!(untouched.vms().is_empty());
    assert!(untouched.vms_migrating_in().is_empty());
    assert_eq!(untouched.ram().allocated(), 0);
    assert_eq!(sim.broker().borrow().migration_acks().len(), 1);
}
