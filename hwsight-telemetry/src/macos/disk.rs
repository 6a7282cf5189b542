//! Physical disks from the I/O registry, completed by `diskutil info`.

use std::collections::BTreeMap;

use hwsight_common::model::{HWDiskStore, HWPartition, UNKNOWN};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use super::MacBackend;
use super::ioreg::{IoValue, IoregEntry, descendants_of};
use crate::decode::parse_key_values;
use crate::fallback::{FallbackChain, meaningful_string};
use crate::linux::disk::{DiskCounters, build_disk};

const IOREG_STORAGE: &[&str] = &["-r", "-c", "IOBlockStorageDevice", "-l", "-w0"];

static BYTE_COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((\d+) Bytes\)").unwrap());

/// One `IOMedia` object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Media {
    pub bsd_name: String,
    pub size: u64,
    pub major: u32,
    pub minor: u32,
    /// Partition type hint, e.g. "Apple_APFS".
    pub content: Option<String>,
    pub uuid: Option<String>,
}

/// A block storage device with its whole-disk media and partitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageDevice {
    pub model: Option<String>,
    pub serial: Option<String>,
    pub counters: DiskCounters,
    pub whole: Media,
    pub partitions: Vec<Media>,
}

fn media(entry: &IoregEntry) -> Option<Media> {
    let number = |key: &str| entry.int(key).unwrap_or(0).max(0) as u64;
    Some(Media {
        bsd_name: entry.string("BSD Name")?.to_string(),
        size: number("Size"),
        major: number("BSD Major") as u32,
        minor: number("BSD Minor") as u32,
        content: entry.string("Content").map(str::to_string),
        uuid: entry.string("UUID").map(str::to_string),
    })
}

/// Counters from a driver's `Statistics` dictionary. Times are nanoseconds.
pub fn statistics_counters(stats: &BTreeMap<String, IoValue>) -> DiskCounters {
    let get = |key: &str| {
        stats
            .get(key)
            .and_then(IoValue::as_int)
            .unwrap_or(0)
            .max(0) as u64
    };
    DiskCounters {
        reads: get("Operations (Read)"),
        read_bytes: get("Bytes (Read)"),
        writes: get("Operations (Write)"),
        write_bytes: get("Bytes (Write)"),
        queue_length: 0,
        transfer_time_ms: (get("Total Time (Read)") + get("Total Time (Write)")) / 1_000_000,
    }
}

/// Group registry entries by storage device.
pub fn parse_storage_devices(entries: &[IoregEntry]) -> Vec<StorageDevice> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.class.ends_with("BlockStorageDevice"))
        .filter_map(|(index, device)| {
            let characteristic = |key: &str| {
                device
                    .dict("Device Characteristics")
                    .and_then(|d| d.get(key))
                    .and_then(IoValue::as_str)
                    .map(|s| s.trim().to_string())
            };
            let below = descendants_of(entries, index);
            let counters = below
                .iter()
                .find_map(|i| entries[*i].dict("Statistics"))
                .map(statistics_counters)
                .unwrap_or_default();
            let whole = below
                .iter()
                .map(|i| &entries[*i])
                .filter(|e| e.class == "IOMedia" && e.bool("Whole") == Some(true))
                .find_map(media)?;
            let prefix = format!("{}s", whole.bsd_name);
            let partitions = below
                .iter()
                .map(|i| &entries[*i])
                .filter(|e| e.class == "IOMedia" && e.bool("Whole") != Some(true))
                .filter_map(media)
                .filter(|m| m.bsd_name.starts_with(&prefix))
                .collect();
            Some(StorageDevice {
                model: characteristic("Product Name"),
                serial: characteristic("Serial Number"),
                counters,
                whole,
                partitions,
            })
        })
        .collect()
}

/// Byte count from a `diskutil info` size line such as
/// "500.3 GB (500277790720 Bytes) (exactly 977105060 512-Byte-Units)".
pub fn diskutil_bytes(value: &str) -> Option<u64> {
    BYTE_COUNT.captures(value)?[1].parse().ok()
}

/// Build a partition from its registry media and `diskutil info` map.
pub fn build_partition(media: &Media, info: &BTreeMap<String, String>) -> HWPartition {
    let get = |key: &str| info.get(key).map(String::as_str).filter(|v| !v.is_empty());
    let mount_point = get("Mount Point")
        .filter(|m| !m.starts_with("Not "))
        .unwrap_or_default();
    HWPartition {
        identification: format!("/dev/{}", media.bsd_name),
        name: get("Volume Name")
            .filter(|v| !v.starts_with("Not "))
            .or(media.content.as_deref())
            .unwrap_or(&media.bsd_name)
            .to_string(),
        fs_type: get("Type (Bundle)")
            .or_else(|| get("File System Personality"))
            .or(media.content.as_deref())
            .unwrap_or("partition")
            .to_string(),
        uuid: media
            .uuid
            .as_deref()
            .or_else(|| get("Volume UUID"))
            .or_else(|| get("Disk / Partition UUID"))
            .unwrap_or(UNKNOWN)
            .to_string(),
        size: media.size,
        major: media.major,
        minor: media.minor,
        mount_point: mount_point.to_string(),
    }
}

impl MacBackend {
    fn diskutil_info(&self, bsd_name: &str) -> BTreeMap<String, String> {
        let node = format!("/dev/{}", bsd_name);
        parse_key_values(&self.commands.run("diskutil", &["info", &node]), ':')
    }

    fn build_disk_store(&self, device: &StorageDevice) -> HWDiskStore {
        let info = self.diskutil_info(&device.whole.bsd_name);
        let model = FallbackChain::new("disk_model")
            .then_validated("ioreg", || device.model.clone(), meaningful_string)
            .then_validated(
                "diskutil",
                || info.get("Device / Media Name").cloned(),
                meaningful_string,
            )
            .resolve_or(UNKNOWN.to_string());
        let serial = FallbackChain::new("disk_serial")
            .then_validated("ioreg", || device.serial.clone(), meaningful_string)
            .then_validated(
                "diskutil",
                || info.get("Disk / Partition UUID").cloned(),
                meaningful_string,
            )
            .resolve_or(UNKNOWN.to_string());
        let size = Some(device.whole.size)
            .filter(|s| *s > 0)
            .or_else(|| info.get("Disk Size").and_then(|v| diskutil_bytes(v)))
            .unwrap_or(0);
        let partitions = device
            .partitions
            .iter()
            .map(|p| build_partition(p, &self.diskutil_info(&p.bsd_name)))
            .collect();

        build_disk(
            format!("/dev/{}", device.whole.bsd_name),
            model,
            serial,
            size,
            device.counters,
            chrono::Utc::now().timestamp_millis(),
            partitions,
        )
    }

    pub(super) fn disks(&self) -> Vec<HWDiskStore> {
        parse_storage_devices(&self.ioreg(IOREG_STORAGE))
            .iter()
            .filter(|d| {
                let virtual_disk = d.model.as_deref().is_some_and(|m| m.contains("Disk Image"));
                if virtual_disk {
                    trace!("Skipping disk image {}", d.whole.bsd_name);
                }
                !virtual_disk
            })
            .map(|d| self.build_disk_store(d))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hwsight_common::config::TelemetryConfig;

    use super::*;
    use crate::backend::PlatformTelemetryBackend;
    use crate::source::{CannedCommandRunner, FixedCounters};

    const STORAGE: &str = r#"+-o IONVMeBlockStorageDevice  <class IONVMeBlockStorageDevice, id 0x100000400, registered>
  | {
  |   "Device Characteristics" = {"Product Name"="APPLE SSD AP0512M","Serial Number"="  S4X0NF0N123456  "}
  | }
  |
  +-o IOBlockStorageDriver  <class IOBlockStorageDriver, id 0x100000401, registered>
    | {
    |   "Statistics" = {"Operations (Write)"=200,"Bytes (Write)"=819200,"Operations (Read)"=100,"Bytes (Read)"=409600,"Total Time (Read)"=3000000,"Total Time (Write)"=7000000}
    | }
    |
    +-o APPLE SSD AP0512M Media  <class IOMedia, id 0x100000402, registered>
      | {
      |   "Whole" = Yes
      |   "BSD Name" = "disk0"
      |   "BSD Major" = 1
      |   "BSD Minor" = 0
      |   "Size" = 500277790720
      | }
      |
      +-o IOGUIDPartitionScheme  <class IOGUIDPartitionScheme, id 0x100000403>
        +-o EFI System Partition@1  <class IOMedia, id 0x100000404, registered>
        | {
        |   "Whole" = No
        |   "BSD Name" = "disk0s1"
        |   "BSD Major" = 1
        |   "BSD Minor" = 1
        |   "Size" = 209715200
        |   "Content" = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B"
        |   "UUID" = "6A1F2B0C-0000-4000-8000-000000000001"
        | }
        |
        +-o Container@2  <class IOMedia, id 0x100000405, registered>
          {
            "Whole" = No
            "BSD Name" = "disk0s2"
            "BSD Major" = 1
            "BSD Minor" = 2
            "Size" = 500068036608
            "Content" = "Apple_APFS"
          }
"#;

    const INFO_DISK0S2: &str = "   Device Identifier:         disk0s2\n   Volume Name:               Not applicable (no file system)\n   Mount Point:               Not applicable (no file system)\n   Partition Type:            Apple_APFS\n   Disk / Partition UUID:     9D1F1C2E-0000-4000-8000-000000000002\n";

    fn backend() -> MacBackend {
        let runner = CannedCommandRunner::new()
            .with(&format!("ioreg {}", IOREG_STORAGE.join(" ")), STORAGE)
            .with("diskutil info /dev/disk0s2", INFO_DISK0S2);
        MacBackend::with_sources(
            &TelemetryConfig::default(),
            Arc::new(runner),
            Arc::new(FixedCounters::default()),
        )
    }

    #[test]
    fn test_disks_from_registry() {
        let disks = backend().query_disks();
        assert_eq!(disks.len(), 1);
        let disk = &disks[0];
        assert_eq!(disk.name, "/dev/disk0");
        assert_eq!(disk.model, "APPLE SSD AP0512M");
        assert_eq!(disk.serial, "S4X0NF0N123456");
        assert_eq!(disk.size, 500_277_790_720);
        assert_eq!(disk.reads, 100);
        assert_eq!(disk.read_bytes, 409_600);
        assert_eq!(disk.writes, 200);
        assert_eq!(disk.write_bytes, 819_200);
        assert_eq!(disk.transfer_time_ms, 10);
        assert_eq!(disk.partitions.len(), 2);

        let efi = &disk.partitions[0];
        assert_eq!(efi.identification, "/dev/disk0s1");
        assert_eq!(efi.uuid, "6A1F2B0C-0000-4000-8000-000000000001");
        assert_eq!((efi.major, efi.minor), (1, 1));

        let container = &disk.partitions[1];
        assert_eq!(container.name, "Apple_APFS");
        assert_eq!(container.uuid, "9D1F1C2E-0000-4000-8000-000000000002");
        assert_eq!(container.mount_point, "");
    }

    #[test]
    fn test_update_disk_keeps_identity() {
        let mac = backend();
        let disk = mac.query_disks().remove(0);
        let fresh = mac.update_disk(&disk).unwrap();
        assert_eq!(fresh.serial, disk.serial);

        let mut other = disk.clone();
        other.size += 1;
        assert!(mac.update_disk(&other).is_none());
    }

    #[test]
    fn test_diskutil_bytes() {
        assert_eq!(
            diskutil_bytes("500.3 GB (500277790720 Bytes) (exactly 977105060 512-Byte-Units)"),
            Some(500_277_790_720)
        );
        assert_eq!(diskutil_bytes("unknown"), None);
    }
}
