//! Integration tests for hwsight-common library.

use std::collections::BTreeMap;

use hwsight_common::{
    CapacityUnits, ChargeState, CollectConfig, DeviceForest, DeviceTreeNode, Format,
    HWDiskStore, HWPartition, LogicalProcessor, OSProcess, OperatingSystemInfo, PowerSource,
    ProcessState, ProcessorIdentifier, TIME_REMAINING_UNKNOWN, TelemetryConfig,
    TelemetrySnapshot, UNKNOWN, decode, decode_auto, encode, parse_config,
};

fn node(id: &str, parent: Option<&str>) -> DeviceTreeNode {
    DeviceTreeNode {
        id: id.to_string(),
        parent_id: parent.map(str::to_string),
        name: id.to_uppercase(),
        device_id: format!("{}:0001", id),
        manufacturer: UNKNOWN.to_string(),
    }
}

fn sample_snapshot() -> TelemetrySnapshot {
    let disk = HWDiskStore {
        name: "/dev/nvme0n1".to_string(),
        model: "Samsung SSD 980".to_string(),
        serial: "S64DNX0R".to_string(),
        size: 1_000_204_886_016,
        reads: 120_000,
        read_bytes: 4_096_000_000,
        writes: 98_000,
        write_bytes: u64::MAX,
        current_queue_length: 0,
        transfer_time_ms: 71_000,
        timestamp_ms: 1_700_000_000_000,
        partitions: vec![HWPartition {
            identification: "/dev/nvme0n1p2".to_string(),
            name: "root".to_string(),
            fs_type: "ext4".to_string(),
            uuid: "0c5b6a2e-1c1a-4f55-9d6e-0e6e4f1a2b3c".to_string(),
            size: 999_000_000_000,
            major: 259,
            minor: 2,
            mount_point: "/".to_string(),
        }],
    };

    let mut battery = PowerSource {
        name: "BAT0".to_string(),
        capacity_units: CapacityUnits::MilliWattHours,
        current_capacity: 25_000,
        max_capacity: 50_000,
        remaining_capacity_ratio: 0.5,
        ..PowerSource::default()
    };
    battery.set_charge_state(ChargeState::Discharging);

    let process = OSProcess {
        process_id: 4242,
        parent_process_id: 1,
        name: "postgres".to_string(),
        state: ProcessState::Sleeping,
        environment: BTreeMap::from([("LANG".to_string(), "C".to_string())]),
        start_time: 1_700_000_005_000,
        open_files: -1,
        ..OSProcess::default()
    };

    TelemetrySnapshot {
        timestamp_ms: 1_700_000_000_000,
        platform: "linux".to_string(),
        operating_system: OperatingSystemInfo {
            family: "Ubuntu".to_string(),
            version: "22.04".to_string(),
            codename: "jammy".to_string(),
            bitness: 64,
            ..OperatingSystemInfo::default()
        },
        processor: Some(ProcessorIdentifier {
            vendor: "GenuineIntel".to_string(),
            family: "6".to_string(),
            model: "158".to_string(),
            stepping: "10".to_string(),
            cpu64bit: true,
            ..ProcessorIdentifier::default()
        }),
        logical_processors: (0..4)
            .map(|n| LogicalProcessor {
                processor_number: n,
                physical_processor_number: n / 2,
                physical_package_number: 0,
                numa_node: 0,
            })
            .collect(),
        current_frequencies: vec![800_000_000; 4],
        max_frequency: 4_600_000_000,
        load_average: vec![0.5, 0.25, -1.0],
        disks: vec![disk],
        power_sources: vec![battery],
        processes: vec![process],
        device_trees: BTreeMap::from([(
            "usb".to_string(),
            DeviceForest::new(vec![
                node("usb1", None),
                node("1-1", Some("usb1")),
                node("1-2", Some("usb1")),
            ]),
        )]),
    }
}

#[test]
fn test_snapshot_json_and_cbor() {
    let snapshot = sample_snapshot();

    let json = encode(&snapshot, Format::Json).expect("JSON encode failed");
    let decoded: TelemetrySnapshot = decode(&json, Format::Json).expect("JSON decode failed");
    assert_eq!(decoded, snapshot);

    let cbor = encode(&snapshot, Format::Cbor).expect("CBOR encode failed");
    assert!(
        cbor.len() < json.len(),
        "CBOR should be smaller than JSON"
    );
    let decoded: TelemetrySnapshot = decode_auto(&cbor).expect("Auto decode failed");
    assert_eq!(decoded.disks[0].write_bytes, u64::MAX);
    assert_eq!(decoded.processes[0].environment["LANG"], "C");
    assert_eq!(decoded.device_trees["usb"].len(), 3);
}

#[test]
fn test_decode_auto_detects_json() {
    let json = encode(&sample_snapshot(), Format::Json).unwrap();
    let decoded: TelemetrySnapshot = decode_auto(&json).unwrap();
    assert_eq!(decoded.platform, "linux");
    assert_eq!(decoded.load_average, vec![0.5, 0.25, -1.0]);
}

#[test]
fn test_decode_garbage_fails() {
    let result: hwsight_common::Result<TelemetrySnapshot> = decode(b"{not json", Format::Json);
    assert!(result.is_err());
}

#[test]
fn test_forest_survives_serialization() {
    let snapshot = sample_snapshot();
    let cbor = encode(&snapshot, Format::Cbor).unwrap();
    let decoded: TelemetrySnapshot = decode(&cbor, Format::Cbor).unwrap();

    let forest = &decoded.device_trees["usb"];
    let roots: Vec<_> = forest.roots().map(|n| n.id.as_str()).collect();
    assert_eq!(roots, vec!["usb1"]);
    assert_eq!(forest.children("usb1").count(), 2);
    assert_eq!(forest.get("1-2").unwrap().parent_id.as_deref(), Some("usb1"));
}

#[test]
fn test_power_source_flags() {
    let snapshot = sample_snapshot();
    let battery = &snapshot.power_sources[0];
    assert!(battery.discharging);
    assert!(!battery.charging);
    assert_eq!(battery.charge_state(), ChargeState::Discharging);
    assert_eq!(battery.time_remaining_instant, TIME_REMAINING_UNKNOWN);
}

#[test]
fn test_processor_identifier_text() {
    let snapshot = sample_snapshot();
    let cpu = snapshot.processor.unwrap();
    assert_eq!(cpu.identifier(), "Intel64 Family 6 Model 158 Stepping 10");
    assert_eq!(cpu.name, UNKNOWN);
}

#[test]
fn test_invalid_process_sentinel() {
    let gone = OSProcess::invalid(99);
    assert!(!gone.is_valid());
    assert_eq!(gone.process_id, 99);
    assert!(sample_snapshot().processes[0].is_valid());
}

#[test]
fn test_full_config_file() {
    let content = r#"{
        // Replay a captured tree
        proc_root: "/srv/capture/proc",
        sys_root: "/srv/capture/sys",
        allow_privileged_commands: false,
        sector_size: 4096,
        collect: {
            processes: true,
            device_classes: ["usb", "net"],
        },
        logging: {
            level: "debug",
            format: "json",
        },
    }"#;

    let config: TelemetryConfig = parse_config(content).expect("parse failed");
    config.validate().expect("validation failed");

    assert_eq!(config.proc_root.to_str(), Some("/srv/capture/proc"));
    assert_eq!(config.etc_root.to_str(), Some("/etc"));
    assert!(config.allow_commands);
    assert!(!config.allow_privileged_commands);
    assert_eq!(config.sector_size, 4096);
    assert_eq!(
        config.collect,
        CollectConfig {
            processes: true,
            device_classes: vec!["usb".to_string(), "net".to_string()],
            ..CollectConfig::default()
        }
    );
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_load_from_file_rejects_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hwsight.json5");
    std::fs::write(&path, "{ sector_size: 1000 }").unwrap();
    assert!(TelemetryConfig::load_from_file(&path).is_err());

    std::fs::write(&path, "{ sector_size: 512 }").unwrap();
    let config = TelemetryConfig::load_from_file(&path).unwrap();
    assert_eq!(config.sector_size, 512);
}

#[test]
fn test_rooted_config_is_valid() {
    let config = TelemetryConfig::rooted_at("/tmp/fixture");
    assert!(config.validate().is_ok());
    assert!(config.udev_data_root.ends_with("run/udev/data"));
}
