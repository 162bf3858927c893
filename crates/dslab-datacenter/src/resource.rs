//! Quantitative resources and their per-VM provisioning.

use std::collections::HashMap;

/// Tracks capacity and allocated amount of a single quantitative resource (RAM, bandwidth, storage, PE MIPS).
///
/// The ledger never lets the allocated amount exceed the capacity. All mutating operations report
/// failure by returning `false` and leave the state untouched in this case.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceLedger {
    capacity: u64,
    allocated: u64,
}

impl ResourceLedger {
    /// Creates ledger with specified capacity and nothing allocated.
    pub fn new(capacity: u64) -> Self {
        Self { capacity, allocated: 0 }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    pub fn available(&self) -> u64 {
        self.capacity - self.allocated
    }

    /// Checks whether the specified amount can be allocated right now.
    pub fn is_amount_available(&self, amount: u64) -> bool {
        amount <= self.available()
    }

    /// Returns the ratio of allocated amount to capacity.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.;
        }
        self.allocated as f64 / self.capacity as f64
    }

    /// Allocates the specified amount, fails if the amount is zero or exceeds the available amount.
    pub fn allocate(&mut self, amount: u64) -> bool {
        if amount == 0 || amount > self.available() {
            return false;
        }
        self.allocated += amount;
        true
    }

    /// Releases the specified amount, fails if the amount is zero or exceeds the allocated amount.
    pub fn deallocate(&mut self, amount: u64) -> bool {
        if amount == 0 || amount > self.allocated {
            return false;
        }
        self.allocated -= amount;
        true
    }

    /// Releases everything allocated so far, returns the released amount.
    pub fn deallocate_all(&mut self) -> u64 {
        std::mem::take(&mut self.allocated)
    }

    /// Changes the capacity preserving the allocated amount.
    ///
    /// Fails if the new capacity is zero or smaller than the currently allocated amount.
    pub fn set_capacity(&mut self, capacity: u64) -> bool {
        if capacity == 0 || capacity < self.allocated {
            return false;
        }
        self.capacity = capacity;
        true
    }
}

/// Ledger which also remembers how much of the resource is allocated to each VM.
///
/// A VM holds at most one allocation at a time, so allocating again replaces the previous amount.
#[derive(Clone, Debug)]
pub struct ResourceProvisioner {
    ledger: ResourceLedger,
    allocations: HashMap<u32, u64>,
}

impl ResourceProvisioner {
    pub fn new(capacity: u64) -> Self {
        Self {
            ledger: ResourceLedger::new(capacity),
            allocations: HashMap::new(),
        }
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn capacity(&self) -> u64 {
        self.ledger.capacity()
    }

    pub fn available(&self) -> u64 {
        self.ledger.available()
    }

    pub fn allocated(&self) -> u64 {
        self.ledger.allocated()
    }

    /// See [`ResourceLedger::set_capacity`].
    pub fn set_capacity(&mut self, capacity: u64) -> bool {
        self.ledger.set_capacity(capacity)
    }

    /// Returns the amount currently allocated to the VM.
    pub fn allocated_resource_for_vm(&self, vm_id: u32) -> u64 {
        self.allocations.get(&vm_id).copied().unwrap_or(0)
    }

    /// Checks whether the VM allocation can be set to `new_amount`.
    ///
    /// The amount already held by the VM is treated as available, since it would be released first.
    pub fn is_suitable_for_vm(&self, vm_id: u32, new_amount: u64) -> bool {
        let current = self.allocated_resource_for_vm(vm_id);
        new_amount <= self.ledger.available() + current
    }

    /// Sets the allocation of the VM to `amount`, replacing the previous one.
    pub fn allocate_resource_for_vm(&mut self, vm_id: u32, amount: u64) -> bool {
        if !self.is_suitable_for_vm(vm_id, amount) {
            return false;
        }
        self.deallocate_resource_for_vm(vm_id);
        if amount == 0 {
            return true;
        }
        if !self.ledger.allocate(amount) {
            return false;
        }
        self.allocations.insert(vm_id, amount);
        true
    }

    /// Releases the allocation of the VM, returns the released amount.
    pub fn deallocate_resource_for_vm(&mut self, vm_id: u32) -> u64 {
        match self.allocations.remove(&vm_id) {
            Some(amount) => {
                self.ledger.deallocate(amount);
                amount
            }
            None => 0,
        }
    }

    /// Releases all allocations.
    pub fn deallocate_all(&mut self) {
        self.allocations.clear();
        self.ledger.deallocate_all();
    }

    pub fn has_allocation_for(&self, vm_id: u32) -> bool {
        self.allocations.contains_key(&vm_id)
    }

    pub fn vm_count(&self) -> usize {
        self.allocations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_invariant(ledger: &ResourceLedger) {
        assert!(ledger.allocated() <= ledger.capacity());
        assert_eq!(ledger.available() + ledger.allocated(), ledger.capacity());
    }

    #[test]
    fn test_allocate_and_deallocate() {
        let mut ledger = ResourceLedger::new(100);
        assert!(ledger.allocate(30));
        assert!(ledger.allocate(70));
        assert!(!ledger.allocate(1));
        assert_eq!(ledger.available(), 0);
        assert!(!ledger.deallocate(101));
        assert!(ledger.deallocate(50));
        assert_eq!(ledger.available(), 50);
        check_invariant(&ledger);
    }

    #[test]
    fn test_zero_amounts_are_rejected() {
        let mut ledger = ResourceLedger::new(100);
        assert!(!ledger.allocate(0));
        assert!(!ledger.deallocate(0));
        assert!(!ledger.set_capacity(0));
        assert_eq!(ledger.capacity(), 100);
    }

    #[test]
    fn test_set_capacity_preserves_allocation() {
        let mut ledger = ResourceLedger::new(100);
        assert!(ledger.allocate(60));
        assert!(!ledger.set_capacity(59));
        assert_eq!(ledger.capacity(), 100);
        assert!(ledger.set_capacity(60));
        assert_eq!(ledger.available(), 0);
        assert!(ledger.set_capacity(200));
        assert_eq!(ledger.allocated(), 60);
        assert_eq!(ledger.available(), 140);
        check_invariant(&ledger);
    }

    #[test]
    fn test_invariant_under_mixed_operations() {
        let mut ledger = ResourceLedger::new(1000);
        let amounts = [17, 400, 0, 999, 583, 1, 250, 1000, 33];
        for (i, amount) in amounts.iter().cycle().take(200).enumerate() {
            if i % 3 == 0 {
                ledger.deallocate(*amount);
            } else {
                ledger.allocate(*amount);
            }
            check_invariant(&ledger);
        }
    }

    #[test]
    fn test_provisioner_replaces_vm_allocation() {
        let mut provisioner = ResourceProvisioner::new(1024);
        assert!(provisioner.allocate_resource_for_vm(1, 512));
        assert!(provisioner.allocate_resource_for_vm(2, 512));
        assert!(!provisioner.is_suitable_for_vm(3, 1));
        // vm 1 can grow into its own allocation only
        assert!(provisioner.is_suitable_for_vm(1, 512));
        assert!(!provisioner.is_suitable_for_vm(1, 513));
        assert!(provisioner.allocate_resource_for_vm(1, 256));
        assert_eq!(provisioner.available(), 256);
        assert_eq!(provisioner.deallocate_resource_for_vm(1), 256);
        assert_eq!(provisioner.deallocate_resource_for_vm(1), 0);
        assert_eq!(provisioner.allocated(), 512);
        assert_eq!(provisioner.vm_count(), 1);
    }
}
