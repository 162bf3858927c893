//! Subscription points for lifecycle notifications.

use std::fmt::{Debug, Formatter};

use crate::suitability::Suitability;

/// Ordered list of subscribers notified synchronously in registration order.
pub struct Listeners<E> {
    subscribers: Vec<Box<dyn FnMut(&E)>>,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn add<F>(&mut self, listener: F)
    where
        F: FnMut(&E) + 'static,
    {
        self.subscribers.push(Box::new(listener));
    }

    pub fn notify(&mut self, info: &E) {
        for subscriber in self.subscribers.iter_mut() {
            subscriber(info);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Debug for Listeners<E> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Listeners({})", self.subscribers.len())
    }
}

/// Host startup, shutdown or availability notification.
#[derive(Clone, Debug, PartialEq)]
pub struct HostEventInfo {
    pub time: f64,
    pub host_id: u32,
}

/// Notification sent after a host has updated the processing of its VMs.
#[derive(Clone, Debug, PartialEq)]
pub struct HostUpdatesVmsProcessingEventInfo {
    pub time: f64,
    pub host_id: u32,
    /// Delay until the next expected event on the host (`f64::INFINITY` if there is none).
    pub next_event_delay: f64,
}

/// Outcome of a finished VM migration.
#[derive(Clone, Debug, PartialEq)]
pub struct VmMigrationEventInfo {
    pub time: f64,
    pub vm_id: u32,
    pub source_host: Option<u32>,
    pub target_host: u32,
    pub suitability: Suitability,
}

impl VmMigrationEventInfo {
    pub fn succeeded(&self) -> bool {
        self.suitability.fully()
    }
}
