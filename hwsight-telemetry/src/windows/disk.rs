//! Physical disks from `Win32_DiskDrive`, raw disk performance counters
//! and `Win32_DiskPartition`.

use std::collections::HashMap;

use hwsight_common::model::{HWDiskStore, HWPartition, UNKNOWN};
use serde::Deserialize;

use super::WindowsBackend;
use super::cim::lenient_u64;
use crate::fallback::meaningful_string;
use crate::linux::disk::{DiskCounters, build_disk};

const DRIVE_PROPERTIES: &[&str] = &["Index", "Name", "Model", "SerialNumber", "Size"];

const PERF_PROPERTIES: &[&str] = &[
    "Name",
    "DiskReadsPersec",
    "DiskReadBytesPersec",
    "DiskWritesPersec",
    "DiskWriteBytesPersec",
    "CurrentDiskQueueLength",
    "PercentDiskTime",
];

const PARTITION_PROPERTIES: &[&str] = &["DiskIndex", "Index", "Name", "Type", "Size", "DeviceID"];

const LINK_PROPERTIES: &[&str] = &[
    "@{n='Partition';e={$_.Antecedent.DeviceID}}",
    "@{n='Drive';e={$_.Dependent.DeviceID}}",
];

const VOLUME_PROPERTIES: &[&str] = &["DeviceID", "FileSystem", "VolumeName", "VolumeSerialNumber"];

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Win32DiskDrive {
    pub index: Option<u32>,
    /// `\\.\PHYSICALDRIVE0`.
    pub name: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    pub size: Option<u64>,
}

/// Row of `Win32_PerfRawData_PerfDisk_PhysicalDisk`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiskPerfRaw {
    /// Disk index followed by its drive letters, e.g. "0 C: D:".
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    pub disk_reads_persec: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub disk_read_bytes_persec: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub disk_writes_persec: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub disk_write_bytes_persec: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub current_disk_queue_length: Option<u64>,
    /// Busy time in 100 ns units.
    #[serde(deserialize_with = "lenient_u64")]
    pub percent_disk_time: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Win32DiskPartition {
    pub disk_index: Option<u32>,
    pub index: Option<u32>,
    pub name: Option<String>,
    #[serde(rename = "Type")]
    pub partition_type: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    pub size: Option<u64>,
    #[serde(rename = "DeviceID")]
    pub device_id: Option<String>,
}

/// Partition to drive-letter association.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct PartitionLink {
    pub partition: Option<String>,
    pub drive: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Win32LogicalDisk {
    #[serde(rename = "DeviceID")]
    pub device_id: Option<String>,
    pub file_system: Option<String>,
    pub volume_name: Option<String>,
    pub volume_serial_number: Option<String>,
}

/// Counters keyed by disk index.
pub fn perf_counters(rows: &[DiskPerfRaw]) -> HashMap<u32, DiskCounters> {
    rows.iter()
        .filter_map(|row| {
            let index: u32 = row.name.as_deref()?.split_whitespace().next()?.parse().ok()?;
            Some((
                index,
                DiskCounters {
                    reads: row.disk_reads_persec.unwrap_or(0),
                    read_bytes: row.disk_read_bytes_persec.unwrap_or(0),
                    writes: row.disk_writes_persec.unwrap_or(0),
                    write_bytes: row.disk_write_bytes_persec.unwrap_or(0),
                    queue_length: row.current_disk_queue_length.unwrap_or(0),
                    transfer_time_ms: row.percent_disk_time.unwrap_or(0) / 10_000,
                },
            ))
        })
        .collect()
}

/// Build a partition, completing it with the volume mounted on it.
pub fn build_partition(
    partition: &Win32DiskPartition,
    links: &[PartitionLink],
    volumes: &[Win32LogicalDisk],
) -> HWPartition {
    let identification = partition
        .device_id
        .clone()
        .unwrap_or_else(|| UNKNOWN.to_string());
    let drive = links
        .iter()
        .find(|l| l.partition.as_deref() == Some(identification.as_str()))
        .and_then(|l| l.drive.clone());
    let volume = drive
        .as_deref()
        .and_then(|d| volumes.iter().find(|v| v.device_id.as_deref() == Some(d)));
    let text = |v: Option<&String>| v.filter(|s| meaningful_string(s)).cloned();

    HWPartition {
        name: text(volume.and_then(|v| v.volume_name.as_ref()))
            .or_else(|| partition.name.clone())
            .unwrap_or_else(|| identification.clone()),
        fs_type: text(volume.and_then(|v| v.file_system.as_ref()))
            .or_else(|| partition.partition_type.clone())
            .unwrap_or_else(|| "partition".to_string()),
        uuid: text(volume.and_then(|v| v.volume_serial_number.as_ref()))
            .unwrap_or_else(|| UNKNOWN.to_string()),
        size: partition.size.unwrap_or(0),
        major: partition.disk_index.unwrap_or(0),
        minor: partition.index.unwrap_or(0),
        mount_point: drive.map(|d| format!("{}\\", d)).unwrap_or_default(),
        identification,
    }
}

impl WindowsBackend {
    pub(super) fn disks(&self) -> Vec<HWDiskStore> {
        let drives: Vec<Win32DiskDrive> = self.cim("Win32_DiskDrive", DRIVE_PROPERTIES);
        if drives.is_empty() {
            return Vec::new();
        }
        let counters = perf_counters(
            &self.cim::<DiskPerfRaw>("Win32_PerfRawData_PerfDisk_PhysicalDisk", PERF_PROPERTIES),
        );
        let partitions: Vec<Win32DiskPartition> =
            self.cim("Win32_DiskPartition", PARTITION_PROPERTIES);
        let links: Vec<PartitionLink> = self.cim("Win32_LogicalDiskToPartition", LINK_PROPERTIES);
        let volumes: Vec<Win32LogicalDisk> = self.cim("Win32_LogicalDisk", VOLUME_PROPERTIES);
        let timestamp = chrono::Utc::now().timestamp_millis();

        drives
            .iter()
            .map(|drive| {
                let index = drive.index.unwrap_or(0);
                let text = |v: &Option<String>| {
                    v.as_ref()
                        .map(|s| s.trim().to_string())
                        .filter(meaningful_string)
                        .unwrap_or_else(|| UNKNOWN.to_string())
                };
                let mut parts: Vec<&Win32DiskPartition> = partitions
                    .iter()
                    .filter(|p| p.disk_index == Some(index))
                    .collect();
                parts.sort_by_key(|p| p.index);
                build_disk(
                    drive
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("\\\\.\\PHYSICALDRIVE{}", index)),
                    text(&drive.model),
                    text(&drive.serial_number),
                    drive.size.unwrap_or(0),
                    counters.get(&index).copied().unwrap_or_default(),
                    timestamp,
                    parts
                        .into_iter()
                        .map(|p| build_partition(p, &links, &volumes))
                        .collect(),
                )
            })
            .collect()
    }
}
