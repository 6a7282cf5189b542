use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Which entities a full snapshot collects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectConfig {
    /// Processor identity, topology and frequencies.
    #[serde(default = "default_true")]
    pub cpu: bool,

    /// Disk stores and partitions.
    #[serde(default = "default_true")]
    pub disks: bool,

    /// Batteries and UPS units.
    #[serde(default = "default_true")]
    pub power: bool,

    /// Process table. Can be expensive on hosts with many processes.
    #[serde(default)]
    pub processes: bool,

    /// Interface classes whose device trees are collected, e.g. `["usb"]`.
    #[serde(default)]
    pub device_classes: Vec<String>,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            cpu: true,
            disks: true,
            power: true,
            processes: false,
            device_classes: Vec::new(),
        }
    }
}

/// Where the telemetry backends look for their raw sources, and which
/// fallback tiers they are allowed to use.
///
/// Every root can be pointed at a fixture tree, which is how the Linux
/// backend is exercised in tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// procfs mount point (default: "/proc").
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// sysfs mount point (default: "/sys").
    #[serde(default = "default_sys_root")]
    pub sys_root: PathBuf,

    /// Device node directory (default: "/dev").
    #[serde(default = "default_dev_root")]
    pub dev_root: PathBuf,

    /// udev database directory (default: "/run/udev/data").
    #[serde(default = "default_udev_data_root")]
    pub udev_data_root: PathBuf,

    /// System configuration directory holding release files (default: "/etc").
    #[serde(default = "default_etc_root")]
    pub etc_root: PathBuf,

    /// Allow external diagnostic commands as a fallback tier (default: true).
    #[serde(default = "default_true")]
    pub allow_commands: bool,

    /// Allow commands that usually need elevated privileges, such as
    /// `dmidecode` (default: true). They fail gracefully when unprivileged.
    #[serde(default = "default_true")]
    pub allow_privileged_commands: bool,

    /// Bytes per sector used for block-device counters (default: 512).
    #[serde(default = "default_sector_size")]
    pub sector_size: u64,

    /// Entities collected by a full snapshot.
    #[serde(default)]
    pub collect: CollectConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_sys_root() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_dev_root() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_udev_data_root() -> PathBuf {
    PathBuf::from("/run/udev/data")
}

fn default_etc_root() -> PathBuf {
    PathBuf::from("/etc")
}

fn default_true() -> bool {
    true
}

fn default_sector_size() -> u64 {
    512
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            proc_root: default_proc_root(),
            sys_root: default_sys_root(),
            dev_root: default_dev_root(),
            udev_data_root: default_udev_data_root(),
            etc_root: default_etc_root(),
            allow_commands: true,
            allow_privileged_commands: true,
            sector_size: default_sector_size(),
            collect: CollectConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Load and validate configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: TelemetryConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.sector_size == 0 || !self.sector_size.is_power_of_two() {
            return Err(Error::Validation(format!(
                "sector_size must be a non-zero power of two, got {}",
                self.sector_size
            )));
        }

        if let Some(class) = self.collect.device_classes.iter().find(|c| c.trim().is_empty()) {
            return Err(Error::Validation(format!(
                "collect.device_classes contains an empty class name: {:?}",
                class
            )));
        }

        for (name, root) in [
            ("proc_root", &self.proc_root),
            ("sys_root", &self.sys_root),
            ("dev_root", &self.dev_root),
            ("udev_data_root", &self.udev_data_root),
            ("etc_root", &self.etc_root),
        ] {
            if root.as_os_str().is_empty() {
                return Err(Error::Validation(format!("{} must not be empty", name)));
            }
        }

        Ok(())
    }

    /// Build a configuration whose filesystem roots all live below `base`.
    ///
    /// `base/proc`, `base/sys`, `base/dev`, `base/run/udev/data` and
    /// `base/etc` are used; commands stay enabled.
    pub fn rooted_at(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            proc_root: base.join("proc"),
            sys_root: base.join("sys"),
            dev_root: base.join("dev"),
            udev_data_root: base.join("run/udev/data"),
            etc_root: base.join("etc"),
            ..Self::default()
        }
    }
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    debug!("Loading configuration from {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}
