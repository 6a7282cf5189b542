//! macOS backend over `sysctl`, `ioreg`, `diskutil`, `pmset` and `sw_vers`.
//!
//! Process tables come from `sysinfo`; everything else is parsed from tool
//! output, so the backend can replay captured output on any host.

pub mod cpu;
pub mod device_tree;
pub mod disk;
pub mod ioreg;
pub mod os;
pub mod power;

use std::sync::Arc;

use hwsight_common::config::TelemetryConfig;
use hwsight_common::model::{
    DeviceForest, HWDiskStore, LogicalProcessor, OSProcess, OperatingSystemInfo, PowerSource,
    ProcessorIdentifier,
};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::backend::{PlatformTelemetryBackend, load_average_values};
use crate::decode::parse_hex_or_decimal;
use crate::process_table;
use crate::source::{CommandRunner, Commands, NativeCounters, SystemCommandRunner, SystemCounters};
use ioreg::{IoregEntry, parse_ioreg};

/// macOS implementation of [`PlatformTelemetryBackend`].
pub struct MacBackend {
    commands: Commands,
    counters: Arc<dyn NativeCounters>,
    identity: OnceCell<ProcessorIdentifier>,
}

impl MacBackend {
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

    fn sysctl(&self, key: &str) -> Option<String> {
        self.commands.first_line("sysctl", &["-n", key])
    }

    fn sysctl_u64(&self, key: &str) -> Option<u64> {
        parse_hex_or_decimal(&self.sysctl(key)?)
    }

    fn ioreg(&self, args: &[&str]) -> Vec<IoregEntry> {
        parse_ioreg(&self.commands.run("ioreg", args))
    }
}

impl PlatformTelemetryBackend for MacBackend {
    fn platform(&self) -> &'static str {
        "macos"
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

impl std::fmt::Debug for MacBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacBackend")
            .field("commands", &self.commands)
            .finish()
    }
}
