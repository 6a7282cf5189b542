//! Device enumeration by subsystem.
//!
//! [`SysfsDevices`] walks the sysfs device hierarchy the same way udev does
//! and merges in the properties udev recorded in its database. Each device is
//! returned as an owned [`DeviceRecord`]; no handle outlives the call that
//! produced it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::trace;

use crate::decode::parse_key_values;
use crate::source::TextSource;

/// One enumerated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Canonical sysfs path; unique per device.
    pub syspath: PathBuf,
    pub sysname: String,
    pub subsystem: String,
    pub devtype: Option<String>,
    /// Device node, e.g. "/dev/sda".
    pub devnode: Option<String>,
    /// uevent and udev database properties.
    pub properties: BTreeMap<String, String>,
}

impl DeviceRecord {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Stable identifier for tree building.
    pub fn id(&self) -> String {
        self.syspath.display().to_string()
    }

    pub fn devtype_is(&self, devtype: &str) -> bool {
        self.devtype.as_deref() == Some(devtype)
    }
}

/// Enumerates devices and exposes their attributes and relations.
pub trait DeviceSource: Send + Sync {
    /// All devices belonging to `subsystem`, sorted by sysname.
    fn enumerate(&self, subsystem: &str) -> Vec<DeviceRecord>;

    /// A text attribute, trimmed; `None` when absent or empty.
    fn attribute(&self, device: &DeviceRecord, name: &str) -> Option<String>;

    fn attribute_bytes(&self, device: &DeviceRecord, name: &str) -> Option<Vec<u8>>;

    fn parent(&self, device: &DeviceRecord) -> Option<DeviceRecord>;

    fn children(&self, device: &DeviceRecord) -> Vec<DeviceRecord>;

    /// An integer attribute; `None` when absent or malformed.
    fn attribute_u64(&self, device: &DeviceRecord, name: &str) -> Option<u64> {
        self.attribute(device, name)?.parse().ok()
    }
}

/// [`DeviceSource`] over a sysfs tree and the udev database.
#[derive(Clone)]
pub struct SysfsDevices {
    text: Arc<dyn TextSource>,
    sys_root: PathBuf,
    dev_root: PathBuf,
    udev_data_root: PathBuf,
}

impl SysfsDevices {
    pub fn new(
        text: Arc<dyn TextSource>,
        sys_root: impl Into<PathBuf>,
        dev_root: impl Into<PathBuf>,
        udev_data_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            text,
            sys_root: sys_root.into(),
            dev_root: dev_root.into(),
            udev_data_root: udev_data_root.into(),
        }
    }

    fn record(&self, syspath: PathBuf, subsystem_hint: &str) -> Option<DeviceRecord> {
        let sysname = syspath.file_name()?.to_string_lossy().into_owned();
        let mut properties = self.text.read_key_values(&syspath.join("uevent"), '=');

        let subsystem = self
            .text
            .read_link(&syspath.join("subsystem"))
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| subsystem_hint.to_string());

        let db_name = match (properties.get("MAJOR"), properties.get("MINOR")) {
            (Some(major), Some(minor)) => {
                let kind = if subsystem == "block" { 'b' } else { 'c' };
                format!("{}{}:{}", kind, major, minor)
            }
            _ => format!("+{}:{}", subsystem, sysname),
        };
        let db_lines: Vec<String> = self
            .text
            .read_lines(&self.udev_data_root.join(db_name))
            .into_iter()
            .filter_map(|l| l.strip_prefix("E:").map(str::to_string))
            .collect();
        properties.extend(parse_key_values(&db_lines, '='));

        let devtype = properties.get("DEVTYPE").cloned();
        let devnode = properties
            .get("DEVNAME")
            .map(|name| self.dev_root.join(name).display().to_string());

        Some(DeviceRecord {
            syspath,
            sysname,
            subsystem,
            devtype,
            devnode,
            properties,
        })
    }

    fn devices_root(&self) -> PathBuf {
        self.sys_root.join("devices")
    }
}

impl DeviceSource for SysfsDevices {
    fn enumerate(&self, subsystem: &str) -> Vec<DeviceRecord> {
        let candidates = [
            self.sys_root.join("class").join(subsystem),
            self.sys_root.join("bus").join(subsystem).join("devices"),
        ];
        let Some(dir) = candidates.iter().find(|d| self.text.exists(d)) else {
            trace!("No sysfs directory for subsystem {}", subsystem);
            return Vec::new();
        };

        let mut devices: Vec<DeviceRecord> = self
            .text
            .list_dir(dir)
            .into_iter()
            .filter_map(|entry| self.text.canonicalize(&dir.join(entry)))
            .filter_map(|path| self.record(path, subsystem))
            .collect();
        devices.sort_by(|a, b| a.sysname.cmp(&b.sysname));
        devices.dedup_by(|a, b| a.syspath == b.syspath);
        devices
    }

    fn attribute(&self, device: &DeviceRecord, name: &str) -> Option<String> {
        self.text.read_trimmed(&device.syspath.join(name))
    }

    fn attribute_bytes(&self, device: &DeviceRecord, name: &str) -> Option<Vec<u8>> {
        self.text.read_bytes(&device.syspath.join(name))
    }

    fn parent(&self, device: &DeviceRecord) -> Option<DeviceRecord> {
        let stop = self.devices_root();
        let mut dir: &Path = device.syspath.parent()?;
        while dir.starts_with(&stop) && dir != stop {
            if self.text.exists(&dir.join("uevent")) {
                return self.record(dir.to_path_buf(), "");
            }
            dir = dir.parent()?;
        }
        None
    }

    fn children(&self, device: &DeviceRecord) -> Vec<DeviceRecord> {
        self.text
            .list_dir(&device.syspath)
            .into_iter()
            .map(|entry| device.syspath.join(entry))
            .filter(|p| self.text.exists(&p.join("uevent")))
            // Links such as "device" or "subsystem" resolve outside the node.
            .filter_map(|p| self.text.canonicalize(&p))
            .filter(|p| p.starts_with(&device.syspath) && *p != device.syspath)
            .filter_map(|p| self.record(p, &device.subsystem))
            .collect()
    }
}
