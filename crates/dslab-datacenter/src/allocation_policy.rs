//! VM allocation policies.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::config::parse_config_value;
use crate::error::{DatacenterError, Result};
use crate::host::Host;
use crate::power::PowerState;
use crate::suitability::Suitability;
use crate::vm::Vm;

/// Trait for implementation of VM allocation policies.
///
/// The policy is defined by [`find_host_for_vm`](Self::find_host_for_vm), which returns an ID of host selected
/// for VM placement or `None` if there is no suitable host. The host where the VM is currently placed is never
/// returned, so the same method is used to find migration targets.
///
/// Policies which support VM consolidation also provide a map of migrations to perform.
pub trait VmAllocationPolicy {
    fn find_host_for_vm(&self, vm: &Vm, hosts: &IndexMap<u32, Host>) -> Option<u32>;

    /// Places VM on the host selected by the policy.
    fn allocate_host_for_vm(&mut self, vm: &mut Vm, hosts: &mut IndexMap<u32, Host>, time: f64) -> Suitability {
        match self.find_host_for_vm(vm, hosts) {
            Some(host_id) => self.allocate_host_for_vm_on(vm, host_id, hosts, time),
            None => Suitability::none(),
        }
    }

    /// Places VM on the specified host.
    fn allocate_host_for_vm_on(
        &mut self,
        vm: &mut Vm,
        host_id: u32,
        hosts: &mut IndexMap<u32, Host>,
        time: f64,
    ) -> Suitability {
        match hosts.get_mut(&host_id) {
            Some(host) => host.create_vm(vm, time),
            None => Suitability::none(),
        }
    }

    /// Removes VM from its host.
    fn deallocate_host_for_vm(&mut self, vm: &mut Vm, hosts: &mut IndexMap<u32, Host>, time: f64) {
        if let Some(host) = vm.host().and_then(|host_id| hosts.get_mut(&host_id)) {
            host.destroy_vm(vm, time);
        }
    }

    /// Returns VM migrations (VM id to target host id) which improve the current placement.
    fn optimized_allocation_map(&mut self, _vms: &BTreeMap<u32, Vm>, _hosts: &IndexMap<u32, Host>) -> Vec<(u32, u32)> {
        Vec::new()
    }

    fn is_vm_migration_supported(&self) -> bool {
        false
    }
}

pub fn allocation_policy_resolver(config_str: &str) -> Result<Box<dyn VmAllocationPolicy>> {
    let (policy_name, _) = parse_config_value(config_str);
    match policy_name.as_str() {
        "FirstFit" => Ok(Box::new(FirstFit::new())),
        "BestFit" => Ok(Box::new(BestFit::new())),
        "WorstFit" => Ok(Box::new(WorstFit::new())),
        _ => Err(DatacenterError::InvalidArgument(format!(
            "can't resolve allocation policy: {}",
            config_str
        ))),
    }
}

fn candidate_hosts<'a>(vm: &'a Vm, hosts: &'a IndexMap<u32, Host>) -> impl Iterator<Item = &'a Host> + 'a {
    hosts
        .values()
        .filter(move |host| {
            Some(host.id) != vm.host()
                && !host.is_failed()
                && host.power_state() != PowerState::Deactivating
                && host.is_suitable_for_vm(vm)
        })
}

////////////////////////////////////////////////////////////////////////////////

/// Returns the first suitable host.
#[derive(Default)]
pub struct FirstFit;

impl FirstFit {
    pub fn new() -> Self {
        Self {}
    }
}

impl VmAllocationPolicy for FirstFit {
    fn find_host_for_vm(&self, vm: &Vm, hosts: &IndexMap<u32, Host>) -> Option<u32> {
        candidate_hosts(vm, hosts).next().map(|host| host.id)
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Returns the most loaded (by available MIPS) suitable host.
#[derive(Default)]
pub struct BestFit;

impl BestFit {
    pub fn new() -> Self {
        Self {}
    }
}

impl VmAllocationPolicy for BestFit {
    fn find_host_for_vm(&self, vm: &Vm, hosts: &IndexMap<u32, Host>) -> Option<u32> {
        let mut result: Option<u32> = None;
        let mut min_available_mips = u64::MAX;
        for host in candidate_hosts(vm, hosts) {
            let available = host.total_available_mips();
            if available < min_available_mips {
                min_available_mips = available;
                result = Some(host.id);
            }
        }
        result
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Returns the least loaded (by available MIPS) suitable host.
#[derive(Default)]
pub struct WorstFit;

impl WorstFit {
    pub fn new() -> Self {
        Self {}
    }
}

impl VmAllocationPolicy for WorstFit {
    fn find_host_for_vm(&self, vm: &Vm, hosts: &IndexMap<u32, Host>) -> Option<u32> {
        let mut result: Option<u32> = None;
        let mut max_available_mips = 0;
        for host in candidate_hosts(vm, hosts) {
            let available = host.total_available_mips();
            if result.is_none() || available > max_available_mips {
                max_available_mips = available;
                result = Some(host.id);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceDefaults;
    use crate::pe::Pe;

    fn hosts() -> IndexMap<u32, Host> {
        let defaults = ResourceDefaults::default();
        let mut hosts = IndexMap::new();
        for (id, pes) in [(0, 2), (1, 4), (2, 8)] {
            hosts.insert(id, Host::new(id, Pe::uniform(pes, 1000).unwrap(), &defaults).unwrap());
        }
        hosts
    }

    #[test]
    fn test_policies() {
        let hosts = hosts();
        let vm = Vm::new(1, 3, 1000, &ResourceDefaults::default()).unwrap();
        assert_eq!(FirstFit::new().find_host_for_vm(&vm, &hosts), Some(1));
        assert_eq!(BestFit::new().find_host_for_vm(&vm, &hosts), Some(1));
        assert_eq!(WorstFit::new().find_host_for_vm(&vm, &hosts), Some(2));
        let huge = Vm::new(2, 16, 1000, &ResourceDefaults::default()).unwrap();
        assert_eq!(FirstFit::new().find_host_for_vm(&huge, &hosts), None);
    }

    #[test]
    fn test_current_host_is_skipped() {
        let mut hosts = hosts();
        let mut vm = Vm::new(1, 1, 1000, &ResourceDefaults::default()).unwrap();
        let mut policy = FirstFit::new();
        assert!(policy.allocate_host_for_vm(&mut vm, &mut hosts, 0.).fully());
        assert_eq!(vm.host(), Some(0));
        assert_eq!(policy.find_host_for_vm(&vm, &hosts), Some(1));
        policy.deallocate_host_for_vm(&mut vm, &mut hosts, 1.);
        assert_eq!(vm.host(), None);
        assert!(hosts[&0].vms().is_empty());
    }

    #[test]
    fn test_resolver() {
        assert!(allocation_policy_resolver("BestFit").is_ok());
        assert!(allocation_policy_resolver("Random").is_err());
    }
}
