//! The per-platform capability trait and the platform detection switch.

use hwsight_common::config::TelemetryConfig;
use hwsight_common::model::{
    DeviceForest, HWDiskStore, LogicalProcessor, OSProcess, OperatingSystemInfo, PowerSource,
    ProcessorIdentifier,
};
use tracing::info;

use crate::tree::assemble_parent_pointers;
use crate::update::update_by_identity;

/// Hardware and OS queries implemented once per target OS.
///
/// Queries never fail: absent sources produce the per-field unknown values
/// documented on the model types, and entities that disappeared produce
/// `None` or are left out of collections.
pub trait PlatformTelemetryBackend: Send + Sync {
    /// Short platform name, e.g. "linux".
    fn platform(&self) -> &'static str;

    fn query_processor_identity(&self) -> ProcessorIdentifier;

    fn query_logical_processors(&self) -> Vec<LogicalProcessor>;

    /// Current frequency of each logical processor in Hz, in processor order.
    fn query_current_frequencies(&self) -> Vec<u64>;

    /// Maximum frequency in Hz; 0 when unknown.
    fn query_max_frequency(&self) -> u64;

    /// Load averages over 1, 5 and 15 minutes, truncated to `n` values.
    /// Unavailable values are negative.
    ///
    /// # Panics
    ///
    /// Panics if `n` is not between 1 and 3.
    fn query_load_average(&self, n: usize) -> Vec<f64>;

    fn query_disks(&self) -> Vec<HWDiskStore>;

    /// Re-collect `existing`; `None` when the same physical disk is gone.
    fn update_disk(&self, existing: &HWDiskStore) -> Option<HWDiskStore> {
        update_by_identity(existing, self.query_disks())
    }

    fn query_power_sources(&self) -> Vec<PowerSource>;

    /// `None` when no valid process has this pid.
    fn query_process(&self, pid: u32) -> Option<OSProcess>;

    fn query_all_processes(&self) -> Vec<OSProcess>;

    /// Re-sample `existing`; `None` when it exited or its pid was reused.
    fn update_process(&self, existing: &OSProcess) -> Option<OSProcess> {
        update_by_identity(existing, self.query_process(existing.process_id))
    }

    fn query_child_processes(&self, pid: u32) -> Vec<OSProcess> {
        self.query_all_processes()
            .into_iter()
            .filter(|p| p.parent_process_id == pid && p.process_id != pid)
            .collect()
    }

    /// All processes below `pid`, breadth first.
    fn query_descendant_processes(&self, pid: u32) -> Vec<OSProcess> {
        let mut all = self.query_all_processes();
        let pairs: Vec<(u32, u32)> = all
            .iter()
            .map(|p| (p.process_id, p.parent_process_id))
            .collect();
        let tree = assemble_parent_pointers(&pairs);
        tree.descendants_of(&pid)
            .into_iter()
            .filter_map(|id| {
                let idx = all.iter().position(|p| p.process_id == id)?;
                Some(all.swap_remove(idx))
            })
            .collect()
    }

    /// Devices of one interface class (e.g. "usb") as a forest.
    fn query_device_tree(&self, interface_class: &str) -> DeviceForest;

    fn query_operating_system(&self) -> OperatingSystemInfo;
}

/// Truncate a load average triple to `n` values.
pub(crate) fn load_average_values(load: Option<[f64; 3]>, n: usize) -> Vec<f64> {
    assert!((1..=3).contains(&n), "load average count must be 1 to 3, got {}", n);
    load.unwrap_or([-1.0; 3])[..n].to_vec()
}

/// Backend for targets with no native implementation. Every query reports
/// unknown or empty values.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedBackend;

impl PlatformTelemetryBackend for UnsupportedBackend {
    fn platform(&self) -> &'static str {
        "unsupported"
    }

    fn query_processor_identity(&self) -> ProcessorIdentifier {
        ProcessorIdentifier::default()
    }

    fn query_logical_processors(&self) -> Vec<LogicalProcessor> {
        Vec::new()
    }

    fn query_current_frequencies(&self) -> Vec<u64> {
        Vec::new()
    }

    fn query_max_frequency(&self) -> u64 {
        0
    }

    fn query_load_average(&self, n: usize) -> Vec<f64> {
        load_average_values(None, n)
    }

    fn query_disks(&self) -> Vec<HWDiskStore> {
        Vec::new()
    }

    fn query_power_sources(&self) -> Vec<PowerSource> {
        Vec::new()
    }

    fn query_process(&self, _pid: u32) -> Option<OSProcess> {
        None
    }

    fn query_all_processes(&self) -> Vec<OSProcess> {
        Vec::new()
    }

    fn query_device_tree(&self, _interface_class: &str) -> DeviceForest {
        DeviceForest::default()
    }

    fn query_operating_system(&self) -> OperatingSystemInfo {
        OperatingSystemInfo::default()
    }
}

/// Select the backend for the running platform.
pub fn platform_backend(config: &TelemetryConfig) -> Box<dyn PlatformTelemetryBackend> {
    #[cfg(target_os = "linux")]
    let backend: Box<dyn PlatformTelemetryBackend> =
        Box::new(crate::linux::LinuxBackend::new(config));

    #[cfg(target_os = "macos")]
    let backend: Box<dyn PlatformTelemetryBackend> =
        Box::new(crate::macos::MacBackend::new(config));

    #[cfg(target_os = "windows")]
    let backend: Box<dyn PlatformTelemetryBackend> =
        Box::new(crate::windows::WindowsBackend::new(config));

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    let backend: Box<dyn PlatformTelemetryBackend> = {
        let _ = config;
        Box::new(UnsupportedBackend)
    };

    info!("Using {} telemetry backend", backend.platform());
    backend
}
