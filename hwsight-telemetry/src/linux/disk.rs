//! Block devices from sysfs, the udev database and `/proc/mounts`.

use std::collections::HashMap;

use hwsight_common::model::{HWDiskStore, HWPartition, UNKNOWN};
use tracing::trace;

use super::LinuxBackend;
use crate::decode::{Delimiter, Field, decode_line, parse_u64_or};
use crate::devices::{DeviceRecord, DeviceSource};
use crate::fallback::{FallbackChain, meaningful_string};
use crate::units::sectors_to_bytes;

/// Fields of `/sys/block/<dev>/stat`, in the order they are reported.
const DISK_STAT_LAYOUT: [Field; 6] = [
    Field::new("reads", 0),
    Field::new("read_sectors", 2),
    Field::new("writes", 4),
    Field::new("write_sectors", 6),
    Field::new("queue_length", 8),
    Field::new("busy_ms", 9),
];

/// Cumulative I/O counters of one disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskCounters {
    pub reads: u64,
    pub read_bytes: u64,
    pub writes: u64,
    pub write_bytes: u64,
    pub queue_length: u64,
    pub transfer_time_ms: u64,
}

/// Decode a block-device stat line. Sector counts are converted to bytes.
pub fn parse_disk_stat(line: &str, sector_size: u64) -> DiskCounters {
    let [reads, read_sectors, writes, write_sectors, queue, busy] =
        decode_line(line, Delimiter::Whitespace, &DISK_STAT_LAYOUT).map(|v| v.max(0) as u64);
    DiskCounters {
        reads,
        read_bytes: sectors_to_bytes(read_sectors, sector_size),
        writes,
        write_bytes: sectors_to_bytes(write_sectors, sector_size),
        queue_length: queue,
        transfer_time_ms: busy,
    }
}

/// Loopback, RAM and compressed-RAM devices are not disks.
pub fn is_pseudo_disk(sysname: &str) -> bool {
    ["loop", "ram", "zram"]
        .iter()
        .any(|prefix| sysname.starts_with(prefix))
}

/// Device -> first mount point from `/proc/mounts`, with octal escapes
/// (`\040` for space) decoded.
pub fn parse_mounts(lines: &[String]) -> HashMap<String, String> {
    let mut mounts = HashMap::new();
    for line in lines {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mount_point)) = (fields.next(), fields.next()) else {
            continue;
        };
        mounts
            .entry(unescape_mount(device))
            .or_insert_with(|| unescape_mount(mount_point));
    }
    mounts
}

fn unescape_mount(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let escaped = rest.get(pos + 1..pos + 4);
        match escaped.and_then(|oct| u8::from_str_radix(oct, 8).ok()) {
            Some(byte) => {
                out.push(char::from(byte));
                rest = &rest[pos + 4..];
            }
            None => {
                out.push('\\');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Build a disk from its identity, counters and partitions.
pub fn build_disk(
    name: String,
    model: String,
    serial: String,
    size: u64,
    counters: DiskCounters,
    timestamp_ms: i64,
    partitions: Vec<HWPartition>,
) -> HWDiskStore {
    HWDiskStore {
        name,
        model,
        serial,
        size,
        reads: counters.reads,
        read_bytes: counters.read_bytes,
        writes: counters.writes,
        write_bytes: counters.write_bytes,
        current_queue_length: counters.queue_length,
        transfer_time_ms: counters.transfer_time_ms,
        timestamp_ms,
        partitions,
    }
}

/// Build a partition from its udev record.
pub fn build_partition(
    record: &DeviceRecord,
    size_bytes: u64,
    mounts: &HashMap<String, String>,
) -> HWPartition {
    let identification = record
        .devnode
        .clone()
        .unwrap_or_else(|| format!("/dev/{}", record.sysname));
    let number = |key: &str| record.property(key).map_or(0, |v| parse_u64_or(v, 0) as u32);
    HWPartition {
        name: record
            .property("ID_FS_LABEL")
            .or_else(|| record.property("PARTNAME"))
            .unwrap_or(&record.sysname)
            .to_string(),
        fs_type: record.property("ID_FS_TYPE").unwrap_or("partition").to_string(),
        uuid: record
            .property("ID_FS_UUID")
            .or_else(|| record.property("ID_PART_ENTRY_UUID"))
            .unwrap_or(UNKNOWN)
            .to_string(),
        size: size_bytes,
        major: number("MAJOR"),
        minor: number("MINOR"),
        mount_point: mounts.get(&identification).cloned().unwrap_or_default(),
        identification,
    }
}

impl LinuxBackend {
    fn disk_model(&self, disk: &DeviceRecord) -> String {
        FallbackChain::new("disk_model")
            .then_validated(
                "udev",
                || disk.property("ID_MODEL").map(|m| m.replace('_', " ")),
                meaningful_string,
            )
            .then_validated("sysfs", || self.devices.attribute(disk, "device/model"), meaningful_string)
            .resolve_or(UNKNOWN.to_string())
    }

    fn disk_serial(&self, disk: &DeviceRecord) -> String {
        FallbackChain::new("disk_serial")
            .then_validated(
                "udev-short",
                || disk.property("ID_SERIAL_SHORT").map(str::to_string),
                meaningful_string,
            )
            .then_validated(
                "udev",
                || disk.property("ID_SERIAL").map(str::to_string),
                meaningful_string,
            )
            .then_validated("sysfs", || self.devices.attribute(disk, "device/serial"), meaningful_string)
            .resolve_or(UNKNOWN.to_string())
    }

    fn build_disk_store(
        &self,
        disk: &DeviceRecord,
        mounts: &HashMap<String, String>,
    ) -> HWDiskStore {
        let sector_size = self.config.sector_size;
        let sectors = self.devices.attribute_u64(disk, "size").unwrap_or(0);
        let counters = self
            .devices
            .attribute(disk, "stat")
            .map(|line| parse_disk_stat(&line, sector_size))
            .unwrap_or_default();

        let partitions = self
            .devices
            .children(disk)
            .iter()
            .filter(|child| child.devtype_is("partition"))
            .map(|part| {
                let size = self.devices.attribute_u64(part, "size").unwrap_or(0);
                build_partition(part, sectors_to_bytes(size, sector_size), mounts)
            })
            .collect();

        build_disk(
            disk.devnode
                .clone()
                .unwrap_or_else(|| format!("/dev/{}", disk.sysname)),
            self.disk_model(disk),
            self.disk_serial(disk),
            sectors_to_bytes(sectors, sector_size),
            counters,
            chrono::Utc::now().timestamp_millis(),
            partitions,
        )
    }

    fn disk_records(&self) -> Vec<DeviceRecord> {
        self.devices
            .enumerate("block")
            .into_iter()
            .filter(|d| d.devtype_is("disk"))
            .filter(|d| {
                let pseudo = is_pseudo_disk(&d.sysname);
                if pseudo {
                    trace!("Skipping pseudo disk {}", d.sysname);
                }
                !pseudo
            })
            .collect()
    }

    fn mounts(&self) -> HashMap<String, String> {
        parse_mounts(&self.text.read_lines(&self.proc_path("mounts")))
    }

    pub(super) fn disks(&self) -> Vec<HWDiskStore> {
        let mounts = self.mounts();
        self.disk_records()
            .iter()
            .map(|d| self.build_disk_store(d, &mounts))
            .collect()
    }

    /// Rebuild only the disk with this device node name.
    pub(super) fn disk_named(&self, name: &str) -> Option<HWDiskStore> {
        let record = self.disk_records().into_iter().find(|d| {
            d.devnode.as_deref() == Some(name) || format!("/dev/{}", d.sysname) == name
        })?;
        Some(self.build_disk_store(&record, &self.mounts()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn test_disk_stat_line() {
        let counters = parse_disk_stat("120 0 4800 300 45 0 9000 900 0 60 60", 512);
        assert_eq!(
            counters,
            DiskCounters {
                reads: 120,
                read_bytes: 4800 * 512,
                writes: 45,
                write_bytes: 9000 * 512,
                queue_length: 0,
                transfer_time_ms: 60,
            }
        );
    }

    #[test]
    fn test_short_stat_line_is_zero() {
        assert_eq!(parse_disk_stat("120 0 4800", 512), DiskCounters::default());
        assert_eq!(parse_disk_stat("", 512), DiskCounters::default());
    }

    #[test]
    fn test_pseudo_disks() {
        for name in ["loop0", "ram1", "zram0"] {
            assert!(is_pseudo_disk(name), "{}", name);
        }
        for name in ["sda", "nvme0n1", "vda", "mmcblk0"] {
            assert!(!is_pseudo_disk(name), "{}", name);
        }
    }

    #[test]
    fn test_parse_mounts() {
        let lines: Vec<String> = [
            "/dev/sda1 / ext4 rw,relatime 0 0",
            "proc /proc proc rw 0 0",
            "/dev/sdb1 /media/My\\040Disk vfat rw 0 0",
            "/dev/sda1 /var/snap ext4 rw 0 0",
            "broken",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let mounts = parse_mounts(&lines);
        assert_eq!(mounts["/dev/sda1"], "/");
        assert_eq!(mounts["/dev/sdb1"], "/media/My Disk");
        assert!(!mounts.contains_key("broken"));
    }

    #[test]
    fn test_build_partition() {
        let properties: BTreeMap<String, String> = [
            ("MAJOR", "8"),
            ("MINOR", "1"),
            ("ID_FS_TYPE", "ext4"),
            ("ID_FS_UUID", "0f3e-11aa"),
            ("PARTNAME", "root"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let record = DeviceRecord {
            syspath: PathBuf::from("/sys/devices/pci0000:00/ata1/block/sda/sda1"),
            sysname: "sda1".to_string(),
            subsystem: "block".to_string(),
            devtype: Some("partition".to_string()),
            devnode: Some("/dev/sda1".to_string()),
            properties,
        };
        let mounts = HashMap::from([("/dev/sda1".to_string(), "/".to_string())]);

        let part = build_partition(&record, 536_870_912, &mounts);
        assert_eq!(part.identification, "/dev/sda1");
        assert_eq!(part.name, "root");
        assert_eq!(part.fs_type, "ext4");
        assert_eq!(part.uuid, "0f3e-11aa");
        assert_eq!((part.major, part.minor), (8, 1));
        assert_eq!(part.mount_point, "/");
        assert_eq!(part.size, 536_870_912);
    }

    #[test]
    fn test_partition_without_uuid() {
        let record = DeviceRecord {
            syspath: PathBuf::from("/sys/devices/virtual/block/loop0/loop0p1"),
            sysname: "loop0p1".to_string(),
            subsystem: "block".to_string(),
            devtype: Some("partition".to_string()),
            devnode: None,
            properties: BTreeMap::new(),
        };
        let part = build_partition(&record, 0, &HashMap::new());
        assert_eq!(part.uuid, UNKNOWN);
        assert_eq!(part.identification, "/dev/loop0p1");
        assert_eq!(part.fs_type, "partition");
        assert!(part.mount_point.is_empty());
    }
}
