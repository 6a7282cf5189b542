//! Windows backend over CIM (through PowerShell), `wmic` and `pnputil`.
//!
//! Process tables come from `sysinfo`. Every other query is decoded from
//! command output, so captured output can be replayed on any host.

pub mod cim;
pub mod cpu;
pub mod device_tree;
pub mod disk;
pub mod os;
pub mod power;

use std::sync::Arc;

use hwsight_common::config::TelemetryConfig;
use hwsight_common::model::{
    DeviceForest, HWDiskStore, LogicalProcessor, OSProcess, OperatingSystemInfo, PowerSource,
    ProcessorIdentifier,
};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::{PlatformTelemetryBackend, load_average_values};
use crate::decode::parse_key_values;
use crate::process_table;
use crate::source::{CommandRunner, Commands, NativeCounters, SystemCommandRunner, SystemCounters};
use cim::{cim_command, parse_cim_json};

const POWERSHELL_ARGS: &[&str] = &["-NoProfile", "-NonInteractive", "-Command"];

/// Windows implementation of [`PlatformTelemetryBackend`].
pub struct WindowsBackend {
    commands: Commands,
    counters: Arc<dyn NativeCounters>,
    identity: OnceCell<ProcessorIdentifier>,
}

impl WindowsBackend {
    /// Backend reading the live system.
    pub fn new(config: &TelemetryConfig) -> Self {
        Self::with_sources(config, Arc::new(SystemCommandRunner), Arc::new(SystemCounters))
    }

    /// Backend over explicit sources.
    pub fn with_sources(
        config: &TelemetryConfig,
        runner: Arc<dyn CommandRunner>,
        counters: Arc<dyn NativeCounters>,
    ) -> Self {
        Self {
            commands: Commands::new(
                runner,
                config.allow_commands,
                config.allow_privileged_commands,
            ),
            counters,
            identity: OnceCell::new(),
        }
    }

    /// Rows of a CIM class with the selected properties.
    fn cim<T: DeserializeOwned>(&self, class: &str, properties: &[&str]) -> Vec<T> {
        let command = cim_command(class, properties);
        let mut args = POWERSHELL_ARGS.to_vec();
        args.push(&command);
        parse_cim_json(&self.commands.run("powershell", &args))
    }

    /// One property through `wmic <alias> get <property> /value`.
    fn wmic(&self, alias: &str, property: &str) -> Option<String> {
        let lines = self.commands.run("wmic", &[alias, "get", property, "/value"]);
        parse_key_values(&lines, '=')
            .remove(property)
            .filter(|v| !v.is_empty())
    }
}

impl PlatformTelemetryBackend for WindowsBackend {
    fn platform(&self) -> &'static str {
        "windows"
    }

    fn query_processor_identity(&self) -> ProcessorIdentifier {
        self.processor_identity()
    }

    fn query_logical_processors(&self) -> Vec<LogicalProcessor> {
        self.logical_processors()
    }

    fn query_current_frequencies(&self) -> Vec<u64> {
        self.current_frequencies()
    }

    fn query_max_frequency(&self) -> u64 {
        self.max_frequency()
    }

    /// Windows keeps no load average; native counters usually report none.
    fn query_load_average(&self, n: usize) -> Vec<f64> {
        load_average_values(self.counters.load_average(), n)
    }

    fn query_disks(&self) -> Vec<HWDiskStore> {
        let disks = self.disks();
        debug!("Collected {} disks", disks.len());
        disks
    }

    fn query_power_sources(&self) -> Vec<PowerSource> {
        self.power_sources()
    }

    fn query_process(&self, pid: u32) -> Option<OSProcess> {
        process_table::sample(Some(&[pid]))
            .into_iter()
            .find(|p| p.process_id == pid && p.is_valid())
    }

    fn query_all_processes(&self) -> Vec<OSProcess> {
        let processes = process_table::sample(None);
        debug!("Collected {} processes", processes.len());
        processes
    }

    fn query_device_tree(&self, interface_class: &str) -> DeviceForest {
        self.device_tree(interface_class)
    }

    fn query_operating_system(&self) -> OperatingSystemInfo {
        self.operating_system()
    }
}

impl std::fmt::Debug for WindowsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsBackend")
            .field("commands", &self.commands)
            .finish()
    }
}
