//! Datacenter configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::allocation_policy::allocation_policy_resolver;
use crate::error::{DatacenterError, Result};
use crate::power::power_model_resolver;
use crate::vm_scheduler::vm_scheduler_resolver;

/// Capacities used when a host or a VM is created without specifying them.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDefaults {
    pub host_ram: u64,
    pub host_bw: u64,
    pub host_storage: u64,
    pub vm_ram: u64,
    pub vm_bw: u64,
    pub vm_storage: u64,
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        Self {
            host_ram: 10240,
            host_bw: 10000,
            host_storage: 1000000,
            vm_ram: 512,
            vm_bw: 1000,
            vm_storage: 10000,
        }
    }
}

/// Description of a single host which is enough to build it at any time, e.g. when a host is added at runtime.
///
/// Missing RAM, bandwidth and storage capacities are taken from [`ResourceDefaults`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    pub name: String,
    pub pes: u32,
    pub pe_mips: u64,
    pub ram: Option<u64>,
    pub bw: Option<u64>,
    pub storage: Option<u64>,
    /// VM scheduler, `TimeShared` or `SpaceShared`
    pub vm_scheduler: String,
    /// Power model, e.g. `Linear[max=200,idle=100,startup=5,shutdown=3]`
    pub power_model: String,
    pub active_on_startup: bool,
}

impl HostSpec {
    pub fn new(pes: u32, pe_mips: u64) -> Self {
        Self {
            name: String::from("host"),
            pes,
            pe_mips,
            ram: None,
            bw: None,
            storage: None,
            vm_scheduler: String::from("TimeShared"),
            power_model: String::from("Linear[max=200,idle=100]"),
            active_on_startup: true,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_ram(mut self, ram: u64) -> Self {
        self.ram = Some(ram);
        self
    }

    pub fn with_bw(mut self, bw: u64) -> Self {
        self.bw = Some(bw);
        self
    }

    pub fn with_storage(mut self, storage: u64) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_vm_scheduler(mut self, vm_scheduler: &str) -> Self {
        self.vm_scheduler = vm_scheduler.to_string();
        self
    }

    pub fn with_power_model(mut self, power_model: &str) -> Self {
        self.power_model = power_model.to_string();
        self
    }

    pub fn with_active_on_startup(mut self, active: bool) -> Self {
        self.active_on_startup = active;
        self
    }
}

/// Represents physical host(s) configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct HostConfig {
    /// Host name. Should be set if count = 1
    pub name: Option<String>,
    /// Host name prefix. Full name is produced by appending instance number to the prefix.
    /// Should be set if count > 1
    pub name_prefix: Option<String>,
    /// number of PEs
    pub pes: u32,
    /// capacity of each PE
    pub pe_mips: u64,
    pub ram: Option<u64>,
    pub bw: Option<u64>,
    pub storage: Option<u64>,
    pub vm_scheduler: Option<String>,
    pub power_model: Option<String>,
    pub active_on_startup: Option<bool>,
    /// number of such hosts
    pub count: Option<u32>,
}

impl HostConfig {
    /// Expands config into specs of `count` hosts.
    pub fn to_specs(&self) -> Vec<HostSpec> {
        let count = self.count.unwrap_or(1);
        let default = HostSpec::new(self.pes, self.pe_mips);
        (0..count)
            .map(|i| {
                let name = if count == 1 && self.name.is_some() {
                    self.name.clone().unwrap_or_default()
                } else {
                    format!("{}{}", self.name_prefix.as_deref().unwrap_or("host"), i + 1)
                };
                HostSpec {
                    name,
                    pes: self.pes,
                    pe_mips: self.pe_mips,
                    ram: self.ram,
                    bw: self.bw,
                    storage: self.storage,
                    vm_scheduler: self.vm_scheduler.clone().unwrap_or_else(|| default.vm_scheduler.clone()),
                    power_model: self.power_model.clone().unwrap_or_else(|| default.power_model.clone()),
                    active_on_startup: self.active_on_startup.unwrap_or(default.active_on_startup),
                }
            })
            .collect()
    }
}

impl From<HostSpec> for HostConfig {
    fn from(spec: HostSpec) -> Self {
        Self {
            name: Some(spec.name),
            name_prefix: None,
            pes: spec.pes,
            pe_mips: spec.pe_mips,
            ram: spec.ram,
            bw: spec.bw,
            storage: spec.storage,
            vm_scheduler: Some(spec.vm_scheduler),
            power_model: Some(spec.power_model),
            active_on_startup: Some(spec.active_on_startup),
            count: Some(1),
        }
    }
}

/// Holds raw datacenter config parsed from YAML file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawDatacenterConfig {
    pub host_ram: Option<u64>,
    pub host_bw: Option<u64>,
    pub host_storage: Option<u64>,
    pub vm_ram: Option<u64>,
    pub vm_bw: Option<u64>,
    pub vm_storage: Option<u64>,
    pub scheduling_interval: Option<f64>,
    pub min_time_between_events: Option<f64>,
    pub bandwidth_percent_for_migration: Option<f64>,
    pub host_search_retry_delay: Option<f64>,
    pub idle_shutdown_deadline: Option<f64>,
    pub lazy_suitability_evaluation: Option<bool>,
    pub vm_migrations_enabled: Option<bool>,
    pub state_history_enabled: Option<bool>,
    pub state_history_limit: Option<usize>,
    pub vm_allocation_retry_period: Option<f64>,
    pub vm_allocation_timeout: Option<f64>,
    pub allocation_policy: Option<String>,
    pub hosts: Option<Vec<HostConfig>>,
}

/// Represents datacenter configuration.
#[derive(Debug, Clone)]
pub struct DatacenterConfig {
    /// capacities used when hosts and VMs omit them
    pub resource_defaults: ResourceDefaults,
    /// period of regular processing updates, 0 disables quantization
    pub scheduling_interval: f64,
    /// minimal delay between two processing updates
    pub min_time_between_events: f64,
    /// fraction of target host bandwidth used for migration traffic
    pub bandwidth_percent_for_migration: f64,
    /// minimal delay between two searches for under or overloaded hosts, negative means no delay
    pub host_search_retry_delay: f64,
    /// idle time after which an empty host is powered off, negative disables shutdown
    pub idle_shutdown_deadline: f64,
    /// stop suitability checks on the first missing resource
    pub lazy_suitability_evaluation: bool,
    pub vm_migrations_enabled: bool,
    pub state_history_enabled: bool,
    /// maximal number of state history entries per host or VM
    pub state_history_limit: usize,
    /// when VM creation fails the broker retries it after this duration
    pub vm_allocation_retry_period: f64,
    /// the broker gives up VM creation after this timeout is reached
    pub vm_allocation_timeout: f64,
    /// VM allocation policy, e.g. `BestFit`
    pub allocation_policy: String,
    /// datacenter physical hosts
    pub hosts: Vec<HostConfig>,
}

impl DatacenterConfig {
    /// Creates datacenter config with default parameter values.
    pub fn new() -> Self {
        Self {
            resource_defaults: ResourceDefaults::default(),
            scheduling_interval: 0.,
            min_time_between_events: 0.1,
            bandwidth_percent_for_migration: 0.5,
            host_search_retry_delay: -1.,
            idle_shutdown_deadline: -1.,
            lazy_suitability_evaluation: true,
            vm_migrations_enabled: true,
            state_history_enabled: false,
            state_history_limit: 10000,
            vm_allocation_retry_period: 1.,
            vm_allocation_timeout: 50.,
            allocation_policy: String::from("FirstFit"),
            hosts: Vec::new(),
        }
    }

    /// Creates datacenter config by reading parameter values from .yaml file (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Result<Self> {
        let yaml = std::fs::read_to_string(file_name)?;
        Self::from_yaml(&yaml)
    }

    /// Creates datacenter config from YAML string (uses default values if some parameters are absent).
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let data: RawDatacenterConfig = serde_yaml::from_str(yaml)?;
        let default = DatacenterConfig::new();
        let defaults = default.resource_defaults;
        let config = Self {
            resource_defaults: ResourceDefaults {
                host_ram: data.host_ram.unwrap_or(defaults.host_ram),
                host_bw: data.host_bw.unwrap_or(defaults.host_bw),
                host_storage: data.host_storage.unwrap_or(defaults.host_storage),
                vm_ram: data.vm_ram.unwrap_or(defaults.vm_ram),
                vm_bw: data.vm_bw.unwrap_or(defaults.vm_bw),
                vm_storage: data.vm_storage.unwrap_or(defaults.vm_storage),
            },
            scheduling_interval: data.scheduling_interval.unwrap_or(default.scheduling_interval),
            min_time_between_events: data.min_time_between_events.unwrap_or(default.min_time_between_events),
            bandwidth_percent_for_migration: data
                .bandwidth_percent_for_migration
                .unwrap_or(default.bandwidth_percent_for_migration),
            host_search_retry_delay: data.host_search_retry_delay.unwrap_or(default.host_search_retry_delay),
            idle_shutdown_deadline: data.idle_shutdown_deadline.unwrap_or(default.idle_shutdown_deadline),
            lazy_suitability_evaluation: data
                .lazy_suitability_evaluation
                .unwrap_or(default.lazy_suitability_evaluation),
            vm_migrations_enabled: data.vm_migrations_enabled.unwrap_or(default.vm_migrations_enabled),
            state_history_enabled: data.state_history_enabled.unwrap_or(default.state_history_enabled),
            state_history_limit: data.state_history_limit.unwrap_or(default.state_history_limit),
            vm_allocation_retry_period: data
                .vm_allocation_retry_period
                .unwrap_or(default.vm_allocation_retry_period),
            vm_allocation_timeout: data.vm_allocation_timeout.unwrap_or(default.vm_allocation_timeout),
            allocation_policy: data.allocation_policy.unwrap_or(default.allocation_policy),
            hosts: data.hosts.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks parameter constraints and that all model names can be resolved.
    pub fn validate(&self) -> Result<()> {
        validate_scheduling_interval(self.scheduling_interval)?;
        if self.min_time_between_events <= 0. {
            return Err(invalid(format!(
                "min_time_between_events must be positive, got {}",
                self.min_time_between_events
            )));
        }
        validate_bandwidth_percent(self.bandwidth_percent_for_migration)?;
        validate_host_search_retry_delay(self.host_search_retry_delay)?;
        if self.vm_allocation_retry_period <= 0. {
            return Err(invalid(format!(
                "vm_allocation_retry_period must be positive, got {}",
                self.vm_allocation_retry_period
            )));
        }
        if self.vm_allocation_timeout < 0. {
            return Err(invalid(format!(
                "vm_allocation_timeout must be non-negative, got {}",
                self.vm_allocation_timeout
            )));
        }
        let defaults = &self.resource_defaults;
        for (name, value) in [
            ("host_ram", defaults.host_ram),
            ("host_bw", defaults.host_bw),
            ("host_storage", defaults.host_storage),
            ("vm_ram", defaults.vm_ram),
            ("vm_bw", defaults.vm_bw),
            ("vm_storage", defaults.vm_storage),
        ] {
            if value == 0 {
                return Err(invalid(format!("{} must be positive", name)));
            }
        }
        allocation_policy_resolver(&self.allocation_policy)?;
        for host in self.hosts.iter() {
            if host.pes == 0 || host.pe_mips == 0 {
                return Err(invalid(format!(
                    "host config {:?} must have positive pes and pe_mips",
                    host.name.as_ref().or(host.name_prefix.as_ref())
                )));
            }
            for spec in host.to_specs().iter().take(1) {
                vm_scheduler_resolver(&spec.vm_scheduler)?;
                power_model_resolver(&spec.power_model)?;
            }
        }
        Ok(())
    }

    /// Returns specs of all configured hosts.
    pub fn host_specs(&self) -> Vec<HostSpec> {
        self.hosts.iter().flat_map(|host| host.to_specs()).collect()
    }

    /// Returns total hosts count
    pub fn number_of_hosts(&self) -> u32 {
        self.hosts.iter().map(|host| host.count.unwrap_or(1)).sum()
    }
}

impl Default for DatacenterConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(message: String) -> DatacenterError {
    DatacenterError::InvalidArgument(message)
}

pub(crate) fn validate_scheduling_interval(interval: f64) -> Result<()> {
    if interval < 0. {
        return Err(invalid(format!("scheduling_interval must be non-negative, got {}", interval)));
    }
    Ok(())
}

pub(crate) fn validate_bandwidth_percent(percent: f64) -> Result<()> {
    if percent <= 0. || percent > 1. {
        return Err(invalid(format!(
            "bandwidth_percent_for_migration must be in (0, 1], got {}",
            percent
        )));
    }
    Ok(())
}

pub(crate) fn validate_host_search_retry_delay(delay: f64) -> Result<()> {
    if delay == 0. {
        return Err(invalid(String::from(
            "host_search_retry_delay can't be 0, use a negative value to retry as soon as possible",
        )));
    }
    Ok(())
}

/// Parses config value string, which consists of two parts - name and options.
///
/// Example: `BestFit[option=0.8]` parts are name `BestFit` and options string `option=0.8`.
pub fn parse_config_value(config_str: &str) -> (String, Option<String>) {
    match config_str.split_once('[') {
        Some((l, r)) => (l.to_string(), Some(r.replace(']', ""))),
        None => (config_str.to_string(), None),
    }
}

/// Parses options string from config value, returns map with option names and values.
pub fn parse_options(options_str: &str) -> HashMap<String, String> {
    let mut options = HashMap::new();
    for option_str in options_str.split(',') {
        if let Some((name, value)) = option_str.split_once('=') {
            options.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_value() {
        assert_eq!(parse_config_value("FirstFit"), (String::from("FirstFit"), None));
        let (name, options) = parse_config_value("Linear[max=200,idle=80]");
        assert_eq!(name, "Linear");
        let options = parse_options(&options.unwrap());
        assert_eq!(options.get("max").unwrap(), "200");
        assert_eq!(options.get("idle").unwrap(), "80");
        assert_eq!(options.get("startup"), None);
    }

    #[test]
    fn test_defaults_for_missing_keys() {
        let config = DatacenterConfig::from_yaml("scheduling_interval: 10\n").unwrap();
        assert_eq!(config.scheduling_interval, 10.);
        assert_eq!(config.min_time_between_events, 0.1);
        assert_eq!(config.bandwidth_percent_for_migration, 0.5);
        assert_eq!(config.resource_defaults, ResourceDefaults::default());
        assert!(config.lazy_suitability_evaluation);
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_validation() {
        assert!(DatacenterConfig::from_yaml("bandwidth_percent_for_migration: 0").is_err());
        assert!(DatacenterConfig::from_yaml("bandwidth_percent_for_migration: 1.5").is_err());
        assert!(DatacenterConfig::from_yaml("bandwidth_percent_for_migration: 1").is_ok());
        assert!(DatacenterConfig::from_yaml("host_search_retry_delay: 0").is_err());
        assert!(DatacenterConfig::from_yaml("scheduling_interval: -1").is_err());
        assert!(DatacenterConfig::from_yaml("allocation_policy: Magic").is_err());
        let mut config = DatacenterConfig::new();
        config.hosts.push(HostConfig {
            name: None,
            name_prefix: None,
            pes: 0,
            pe_mips: 1000,
            ram: None,
            bw: None,
            storage: None,
            vm_scheduler: None,
            power_model: None,
            active_on_startup: None,
            count: None,
        });
        assert!(matches!(config.validate(), Err(DatacenterError::InvalidArgument(_))));
    }

    #[test]
    fn test_host_specs() {
        let yaml = "
hosts:
  - name_prefix: h
    pes: 4
    pe_mips: 1000
    ram: 4096
    count: 3
  - name: big
    pes: 16
    pe_mips: 2000
    vm_scheduler: SpaceShared
";
        let config = DatacenterConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.number_of_hosts(), 4);
        let specs = config.host_specs();
        assert_eq!(specs[2].name, "h3");
        assert_eq!(specs[2].ram, Some(4096));
        assert_eq!(specs[3].name, "big");
        assert_eq!(specs[3].bw, None);
        assert_eq!(specs[3].vm_scheduler, "SpaceShared");
    }
}
