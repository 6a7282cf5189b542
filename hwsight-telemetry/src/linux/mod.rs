//! Linux backend over procfs, sysfs and the udev database.
//!
//! Every path is resolved against the roots in [`TelemetryConfig`], so the
//! backend can replay a captured directory tree as well as read the live
//! system.

pub mod cpu;
pub mod device_tree;
pub mod disk;
pub mod os;
pub mod power;
pub mod process;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hwsight_common::config::TelemetryConfig;
use hwsight_common::model::{
    DeviceForest, HWDiskStore, LogicalProcessor, OSProcess, OperatingSystemInfo, PowerSource,
    ProcessorIdentifier,
};
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::backend::{PlatformTelemetryBackend, load_average_values};
use crate::decode::parse_u64_or;
use crate::devices::SysfsDevices;
use crate::source::{
    CommandRunner, Commands, FsSource, NativeCounters, SystemCommandRunner, SystemCounters,
    TextSource,
};
use crate::units::DEFAULT_CLOCK_TICKS;
use crate::update::update_by_identity;

const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Linux implementation of [`PlatformTelemetryBackend`].
pub struct LinuxBackend {
    config: TelemetryConfig,
    text: Arc<dyn TextSource>,
    devices: SysfsDevices,
    commands: Commands,
    counters: Arc<dyn NativeCounters>,
    clock_ticks: OnceCell<u64>,
    page_size: OnceCell<u64>,
    boot_time: OnceCell<u64>,
    identity: OnceCell<ProcessorIdentifier>,
}

impl LinuxBackend {
    /// Backend reading the live system.
    pub fn new(config: &TelemetryConfig) -> Self {
        Self::with_sources(
            config,
            Arc::new(FsSource),
            Arc::new(SystemCommandRunner),
            Arc::new(SystemCounters),
        )
    }

    /// Backend over explicit sources.
    pub fn with_sources(
        config: &TelemetryConfig,
        text: Arc<dyn TextSource>,
        runner: Arc<dyn CommandRunner>,
        counters: Arc<dyn NativeCounters>,
    ) -> Self {
        let devices = SysfsDevices::new(
            text.clone(),
            &config.sys_root,
            &config.dev_root,
            &config.udev_data_root,
        );
        Self {
            commands: Commands::new(
                runner,
                config.allow_commands,
                config.allow_privileged_commands,
            ),
            config: config.clone(),
            text,
            devices,
            counters,
            clock_ticks: OnceCell::new(),
            page_size: OnceCell::new(),
            boot_time: OnceCell::new(),
            identity: OnceCell::new(),
        }
    }

    fn proc_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.config.proc_root.join(rel)
    }

    fn sys_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.config.sys_root.join(rel)
    }

    fn etc_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.config.etc_root.join(rel)
    }

    fn clock_ticks(&self) -> u64 {
        *self.clock_ticks.get_or_init(|| {
            self.counters
                .clock_ticks_per_second()
                .or_else(|| {
                    let hz = self.commands.first_line("getconf", &["CLK_TCK"])?;
                    Some(parse_u64_or(&hz, 0)).filter(|hz| *hz > 0)
                })
                .unwrap_or_else(|| {
                    warn!("Clock tick rate unknown, assuming {}", DEFAULT_CLOCK_TICKS);
                    DEFAULT_CLOCK_TICKS
                })
        })
    }

    fn page_size(&self) -> u64 {
        *self.page_size.get_or_init(|| {
            self.counters
                .page_size()
                .or_else(|| {
                    let size = self.commands.first_line("getconf", &["PAGESIZE"])?;
                    Some(parse_u64_or(&size, 0)).filter(|size| *size > 0)
                })
                .unwrap_or(DEFAULT_PAGE_SIZE)
        })
    }

    /// Boot time from `/proc/stat`, falling back to the native counter.
    fn boot_time_secs(&self) -> u64 {
        *self.boot_time.get_or_init(|| {
            let from_stat = self
                .text
                .read_lines(&self.proc_path("stat"))
                .iter()
                .find_map(|l| l.strip_prefix("btime").map(|v| parse_u64_or(v, 0)))
                .filter(|secs| *secs > 0);
            from_stat
                .or_else(|| self.counters.boot_time_secs())
                .unwrap_or_else(|| {
                    warn!("Boot time unknown, process start times will be off");
                    0
                })
        })
    }
}

impl PlatformTelemetryBackend for LinuxBackend {
    fn platform(&self) -> &'static str {
        "linux"
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
        let from_proc = self
            .text
            .read_trimmed(&self.proc_path("loadavg"))
            .and_then(|line| {
                let values: Vec<f64> = line
                    .split_whitespace()
                    .take(3)
                    .filter_map(|v| v.parse().ok())
                    .collect();
                <[f64; 3]>::try_from(values).ok()
            });
        load_average_values(from_proc.or_else(|| self.counters.load_average()), n)
    }

    fn query_disks(&self) -> Vec<HWDiskStore> {
        let disks = self.disks();
        debug!("Collected {} disks", disks.len());
        disks
    }

    fn update_disk(&self, existing: &HWDiskStore) -> Option<HWDiskStore> {
        update_by_identity(existing, self.disk_named(&existing.name))
    }

    fn query_power_sources(&self) -> Vec<PowerSource> {
        self.power_sources()
    }

    fn query_process(&self, pid: u32) -> Option<OSProcess> {
        self.process(pid, &self.process_clock(), &self.accounts())
    }

    fn query_all_processes(&self) -> Vec<OSProcess> {
        let processes = self.all_processes();
        debug!("Collected {} processes", processes.len());
        processes
    }

    fn query_device_tree(&self, interface_class: &str) -> DeviceForest {
        device_tree::build_device_tree(&self.devices, interface_class)
    }

    fn query_operating_system(&self) -> OperatingSystemInfo {
        self.operating_system()
    }
}

impl std::fmt::Debug for LinuxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinuxBackend")
            .field("proc_root", &self.config.proc_root)
            .field("sys_root", &self.config.sys_root)
            .field("commands", &self.commands)
            .finish()
    }
}
