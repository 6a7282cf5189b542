//! Device trees from `pnputil /enum-devices /relations`.

use std::collections::HashMap;

use hwsight_common::model::{DeviceForest, UNKNOWN};

use super::WindowsBackend;
use crate::tree::{NodeInfo, assemble};

/// One device block of `pnputil` output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PnpDevice {
    pub instance_id: String,
    pub description: Option<String>,
    pub class_name: Option<String>,
    pub manufacturer: Option<String>,
    pub parent: Option<String>,
    pub children: Vec<String>,
}

/// Parse device blocks. Continuation lines (only a value) extend the
/// previous key, which is how `pnputil` lists several children.
pub fn parse_pnputil(lines: &[String]) -> Vec<PnpDevice> {
    let mut devices: Vec<PnpDevice> = Vec::new();
    let mut last_key = String::new();

    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            last_key.clear();
            continue;
        }
        let (key, value) = match trimmed.split_once(':') {
            Some((k, v)) if !line.starts_with(char::is_whitespace) && !k.contains('\\') => {
                (k.trim().to_string(), v.trim().to_string())
            }
            _ => (last_key.clone(), trimmed.to_string()),
        };
        if key == "Instance ID" {
            devices.push(PnpDevice {
                instance_id: value,
                ..Default::default()
            });
            last_key = key;
            continue;
        }
        let Some(device) = devices.last_mut() else {
            continue;
        };
        match key.as_str() {
            "Device Description" => device.description = Some(value),
            "Class Name" => device.class_name = Some(value),
            "Manufacturer Name" => device.manufacturer = Some(value),
            "Parent" => device.parent = Some(value),
            "Children" => device.children.push(value),
            _ => {}
        }
        last_key = key;
    }

    devices
}

/// `pnputil` class name for an interface class.
pub fn pnp_class(interface_class: &str) -> String {
    match interface_class.to_ascii_lowercase().as_str() {
        "usb" => "USB".to_string(),
        "hid" => "HIDClass".to_string(),
        "net" => "Net".to_string(),
        "disk" | "block" => "DiskDrive".to_string(),
        _ => interface_class.to_string(),
    }
}

fn node_info(device: &PnpDevice) -> NodeInfo<String> {
    NodeInfo {
        id: device.instance_id.clone(),
        name: device
            .description
            .clone()
            .unwrap_or_else(|| device.instance_id.clone()),
        device_id: device.instance_id.clone(),
        manufacturer: device
            .manufacturer
            .clone()
            .unwrap_or_else(|| UNKNOWN.to_string()),
    }
}

/// Forest of the listed devices. A device whose parent is not listed is a
/// root; children outside the list are ignored.
pub fn build_device_tree(devices: &[PnpDevice]) -> DeviceForest {
    let by_id: HashMap<&str, &PnpDevice> = devices
        .iter()
        .map(|d| (d.instance_id.as_str(), d))
        .collect();
    let roots = devices
        .iter()
        .filter(|d| {
            d.parent
                .as_deref()
                .is_none_or(|p| !by_id.contains_key(p))
        })
        .map(node_info)
        .collect();

    assemble(roots, |id: &String| {
        let Some(device) = by_id.get(id.as_str()) else {
            return Vec::new();
        };
        let mut kids: Vec<&PnpDevice> = device
            .children
            .iter()
            .filter_map(|c| by_id.get(c.as_str()).copied())
            .collect();
        // Children that only name their parent.
        kids.extend(
            devices
                .iter()
                .filter(|d| d.parent.as_deref() == Some(id.as_str()))
                .filter(|d| !device.children.contains(&d.instance_id)),
        );
        kids.into_iter().map(node_info).collect()
    })
    .into_forest()
}

impl WindowsBackend {
    pub(super) fn device_tree(&self, interface_class: &str) -> DeviceForest {
        let class = pnp_class(interface_class);
        let lines = self.commands.run(
            "pnputil",
            &["/enum-devices", "/connected", "/relations", "/class", &class],
        );
        build_device_tree(&parse_pnputil(&lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = r"Microsoft PnP Utility

Instance ID:                USB\ROOT_HUB30\4&1b2f2b&0&0
Device Description:         USB Root Hub (USB 3.0)
Class Name:                 USB
Manufacturer Name:          (Standard USB HUBs)
Status:                     Started
Parent:                     PCI\VEN_8086&DEV_A36D&SUBSYS_08631028&REV_10\3&11583659&0&A0
Children:                   USB\VID_046D&PID_C52B\5&2d1d0b5&0&2
                            USB\VID_8087&PID_0AAA\5&2d1d0b5&0&14

Instance ID:                USB\VID_046D&PID_C52B\5&2d1d0b5&0&2
Device Description:         USB Composite Device
Class Name:                 USB
Manufacturer Name:          (Standard USB Host Controller)
Status:                     Started
Parent:                     USB\ROOT_HUB30\4&1b2f2b&0&0

Instance ID:                USB\VID_8087&PID_0AAA\5&2d1d0b5&0&14
Device Description:         Intel(R) Wireless Bluetooth(R)
Class Name:                 USB
Manufacturer Name:          Intel Corporation
Status:                     Started
Parent:                     USB\ROOT_HUB30\4&1b2f2b&0&0
";

    fn lines() -> Vec<String> {
        OUTPUT.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_blocks() {
        let devices = parse_pnputil(&lines());
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].children.len(), 2);
        assert_eq!(devices[0].children[1], r"USB\VID_8087&PID_0AAA\5&2d1d0b5&0&14");
        assert_eq!(devices[2].manufacturer.as_deref(), Some("Intel Corporation"));
    }

    #[test]
    fn test_forest_roots_at_listed_devices() {
        let forest = build_device_tree(&parse_pnputil(&lines()));
        assert_eq!(forest.len(), 3);
        let roots: Vec<_> = forest.roots().map(|n| n.name.as_str()).collect();
        assert_eq!(roots, vec!["USB Root Hub (USB 3.0)"]);
        assert_eq!(forest.children(r"USB\ROOT_HUB30\4&1b2f2b&0&0").count(), 2);
        let bt = forest.get(r"USB\VID_8087&PID_0AAA\5&2d1d0b5&0&14").unwrap();
        assert_eq!(bt.parent_id.as_deref(), Some(r"USB\ROOT_HUB30\4&1b2f2b&0&0"));
    }

    #[test]
    fn test_class_names() {
        assert_eq!(pnp_class("usb"), "USB");
        assert_eq!(pnp_class("Bluetooth"), "Bluetooth");
    }
}
