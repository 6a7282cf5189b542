//! Normalized, platform-independent hardware and operating system data model.
//!
//! Every type here is an immutable value snapshot. A fresh snapshot is built
//! on each collection pass; consumers never patch one in place.
//!
//! Unknown values follow a per-field convention documented on each field:
//! `0`, `-1`, `-2`, an absent `Option`, or the [`UNKNOWN`] string.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholder used for every string attribute that could not be resolved.
pub const UNKNOWN: &str = "unknown";

/// Time-remaining value meaning the estimate is not available.
pub const TIME_REMAINING_UNKNOWN: f64 = -1.0;

/// Time-remaining value meaning the system is on line power.
pub const TIME_REMAINING_UNLIMITED: f64 = -2.0;

/// Identification of the installed processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorIdentifier {
    /// Vendor string, e.g. "GenuineIntel" or an ARM implementer code.
    pub vendor: String,
    /// Marketing name, e.g. "Intel(R) Core(TM) i7-8700 CPU @ 3.20GHz".
    pub name: String,
    pub family: String,
    pub model: String,
    /// Stepping, or `rNpM` on ARM.
    pub stepping: String,
    /// Opaque identifier, stable across calls on the same machine.
    pub processor_id: String,
    pub cpu64bit: bool,
    /// Nominal frequency in Hz; 0 when not reported.
    pub vendor_freq_hz: u64,
    /// Microarchitecture name when known from vendor/family/model.
    pub microarchitecture: String,
}

impl ProcessorIdentifier {
    /// Human readable identifier in the style "Intel64 Family 6 Model 158 Stepping 10".
    pub fn identifier(&self) -> String {
        let prefix = if self.vendor.contains("Intel") {
            if self.cpu64bit { "Intel64" } else { "x86" }
        } else {
            self.vendor.as_str()
        };
        format!(
            "{} Family {} Model {} Stepping {}",
            prefix, self.family, self.model, self.stepping
        )
    }
}

impl Default for ProcessorIdentifier {
    fn default() -> Self {
        Self {
            vendor: UNKNOWN.to_string(),
            name: UNKNOWN.to_string(),
            family: UNKNOWN.to_string(),
            model: UNKNOWN.to_string(),
            stepping: UNKNOWN.to_string(),
            processor_id: UNKNOWN.to_string(),
            cpu64bit: false,
            vendor_freq_hz: 0,
            microarchitecture: UNKNOWN.to_string(),
        }
    }
}

/// A logical processor and where it sits in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalProcessor {
    /// Unique within a snapshot.
    pub processor_number: u32,
    /// Physical core index.
    pub physical_processor_number: u32,
    /// Package (socket) index.
    pub physical_package_number: u32,
    pub numa_node: u32,
}

/// A physical storage device with cumulative I/O counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HWDiskStore {
    /// Stable name or handle, e.g. "/dev/sda", "disk0", "\\.\PHYSICALDRIVE0".
    pub name: String,
    pub model: String,
    pub serial: String,
    /// Total size in bytes.
    pub size: u64,
    pub reads: u64,
    pub read_bytes: u64,
    pub writes: u64,
    pub write_bytes: u64,
    pub current_queue_length: u64,
    /// Cumulative busy time in milliseconds.
    pub transfer_time_ms: u64,
    /// Unix epoch milliseconds when the counters were sampled.
    pub timestamp_ms: i64,
    pub partitions: Vec<HWPartition>,
}

/// A partition of a [`HWDiskStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HWPartition {
    /// Logical identifier, e.g. "sda1" or "disk0s2".
    pub identification: String,
    pub name: String,
    /// Filesystem type.
    pub fs_type: String,
    /// Filesystem UUID, [`UNKNOWN`] when not reported.
    pub uuid: String,
    /// Size in bytes.
    pub size: u64,
    pub major: u32,
    pub minor: u32,
    /// Empty string when unmounted.
    pub mount_point: String,
}

/// Units used by the capacity fields of a [`PowerSource`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityUnits {
    /// Capacities are percentages.
    #[default]
    Relative,
    MilliWattHours,
    MilliAmpHours,
}

/// Charging state of a power source; charging and discharging never coexist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeState {
    Charging,
    Discharging,
    #[default]
    Idle,
}

/// A battery or other power source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSource {
    pub name: String,
    pub device_name: String,
    /// Remaining capacity as a ratio in `[0.0, 1.0]`.
    pub remaining_capacity_ratio: f64,
    /// Seconds; -1 unknown, -2 unlimited.
    pub time_remaining_estimated: f64,
    /// Seconds; -1 unknown, -2 unlimited.
    pub time_remaining_instant: f64,
    /// Milliwatts, negative while discharging; 0 unknown.
    pub power_usage_rate: f64,
    /// Volts; -1 unknown.
    pub voltage: f64,
    /// Milliamps, negative while discharging; 0 unknown.
    pub amperage: f64,
    pub power_on_line: bool,
    pub charging: bool,
    pub discharging: bool,
    pub capacity_units: CapacityUnits,
    pub current_capacity: u32,
    pub max_capacity: u32,
    pub design_capacity: u32,
    /// -1 when unknown.
    pub cycle_count: i32,
    pub chemistry: String,
    pub manufacture_date: Option<NaiveDate>,
    pub manufacturer: String,
    pub serial_number: String,
    /// Degrees Celsius; 0 unknown.
    pub temperature: f64,
}

impl PowerSource {
    /// Set the charging flags from a single state, keeping them exclusive.
    pub fn set_charge_state(&mut self, state: ChargeState) {
        self.charging = state == ChargeState::Charging;
        self.discharging = state == ChargeState::Discharging;
    }

    /// Current charge state derived from the flags.
    pub fn charge_state(&self) -> ChargeState {
        match (self.charging, self.discharging) {
            (true, _) => ChargeState::Charging,
            (false, true) => ChargeState::Discharging,
            (false, false) => ChargeState::Idle,
        }
    }
}

impl Default for PowerSource {
    fn default() -> Self {
        Self {
            name: UNKNOWN.to_string(),
            device_name: UNKNOWN.to_string(),
            remaining_capacity_ratio: 0.0,
            time_remaining_estimated: TIME_REMAINING_UNKNOWN,
            time_remaining_instant: TIME_REMAINING_UNKNOWN,
            power_usage_rate: 0.0,
            voltage: -1.0,
            amperage: 0.0,
            power_on_line: false,
            charging: false,
            discharging: false,
            capacity_units: CapacityUnits::Relative,
            current_capacity: 0,
            max_capacity: 1,
            design_capacity: 1,
            cycle_count: -1,
            chemistry: UNKNOWN.to_string(),
            manufacture_date: None,
            manufacturer: UNKNOWN.to_string(),
            serial_number: UNKNOWN.to_string(),
            temperature: 0.0,
        }
    }
}

/// Lifecycle state of a sampled process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Being created.
    New,
    Running,
    Sleeping,
    /// Uninterruptible wait, usually for I/O.
    Waiting,
    Stopped,
    Zombie,
    Other,
    /// Failed validation, or the OS no longer reports the process.
    #[default]
    Invalid,
}

/// Sampled state of one operating system process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OSProcess {
    pub process_id: u32,
    pub parent_process_id: u32,
    pub name: String,
    pub path: String,
    pub command_line: String,
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub current_working_directory: String,
    pub user: String,
    pub user_id: String,
    pub group: String,
    pub group_id: String,
    pub state: ProcessState,
    pub thread_count: u32,
    pub priority: i32,
    /// Bytes.
    pub virtual_size: u64,
    /// Bytes.
    pub resident_set_size: u64,
    /// Milliseconds.
    pub kernel_time: u64,
    /// Milliseconds.
    pub user_time: u64,
    /// Unix epoch milliseconds.
    pub start_time: u64,
    /// Milliseconds.
    pub up_time: u64,
    /// Start time as reported, before clamping to the sampling instant.
    /// Stable across samples, so it tells a recycled pid apart.
    #[serde(default)]
    pub raw_start_time: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// -1 when not readable.
    pub open_files: i64,
    pub minor_faults: u64,
    pub major_faults: u64,
    /// Voluntary plus involuntary.
    pub context_switches: u64,
}

impl OSProcess {
    /// Placeholder for a process that vanished or failed validation.
    pub fn invalid(process_id: u32) -> Self {
        Self {
            process_id,
            state: ProcessState::Invalid,
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state != ProcessState::Invalid
    }
}

/// One node of a device forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTreeNode {
    pub id: String,
    /// Absent for roots.
    pub parent_id: Option<String>,
    pub name: String,
    /// Raw device identifier as reported by the platform.
    pub device_id: String,
    pub manufacturer: String,
}

/// A forest of devices, nodes kept in breadth-first order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceForest {
    nodes: Vec<DeviceTreeNode>,
    roots: Vec<String>,
}

impl DeviceForest {
    /// Build a forest from nodes in breadth-first order.
    ///
    /// Roots are the nodes without a parent id.
    pub fn new(nodes: Vec<DeviceTreeNode>) -> Self {
        let roots = nodes
            .iter()
            .filter(|n| n.parent_id.is_none())
            .map(|n| n.id.clone())
            .collect();
        Self { nodes, roots }
    }

    pub fn nodes(&self) -> &[DeviceTreeNode] {
        &self.nodes
    }

    pub fn roots(&self) -> impl Iterator<Item = &DeviceTreeNode> {
        self.roots.iter().filter_map(|id| self.get(id))
    }

    pub fn get(&self, id: &str) -> Option<&DeviceTreeNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn children<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a DeviceTreeNode> {
        self.nodes
            .iter()
            .filter(move |n| n.parent_id.as_deref() == Some(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Operating system family, version and host details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingSystemInfo {
    /// e.g. "Ubuntu", "macOS", "Windows".
    pub family: String,
    pub manufacturer: String,
    pub version: String,
    pub codename: String,
    pub build_number: String,
    /// 32 or 64; 0 when unknown.
    pub bitness: u32,
    pub hostname: String,
}

impl Default for OperatingSystemInfo {
    fn default() -> Self {
        Self {
            family: UNKNOWN.to_string(),
            manufacturer: UNKNOWN.to_string(),
            version: UNKNOWN.to_string(),
            codename: UNKNOWN.to_string(),
            build_number: UNKNOWN.to_string(),
            bitness: 0,
            hostname: UNKNOWN.to_string(),
        }
    }
}

/// Everything collected in one pass, ready for [`crate::encode`].
///
/// Sections that were not collected are empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Unix epoch milliseconds when the pass started.
    pub timestamp_ms: i64,
    /// Backend that produced the snapshot, e.g. "linux".
    pub platform: String,
    pub operating_system: OperatingSystemInfo,
    pub processor: Option<ProcessorIdentifier>,
    pub logical_processors: Vec<LogicalProcessor>,
    /// Hz, in logical processor order.
    pub current_frequencies: Vec<u64>,
    pub max_frequency: u64,
    /// 1, 5 and 15 minute averages; negative when unavailable.
    pub load_average: Vec<f64>,
    pub disks: Vec<HWDiskStore>,
    pub power_sources: Vec<PowerSource>,
    pub processes: Vec<OSProcess>,
    /// Device forests keyed by interface class.
    pub device_trees: BTreeMap<String, DeviceForest>,
}
