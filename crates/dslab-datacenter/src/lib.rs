#![doc = include_str!("../readme.md")]

pub mod allocation_policy;
pub mod broker;
pub mod cloudlet;
pub mod cloudlet_scheduler;
pub mod config;
pub mod datacenter;
pub mod error;
pub mod events;
pub mod host;
pub mod listener;
pub mod pe;
pub mod power;
pub mod resource;
pub mod simulation;
pub mod state_history;
pub mod suitability;
pub mod vm;
pub mod vm_scheduler;
