//! Device forests from a sysfs subsystem.

use std::collections::HashMap;

use hwsight_common::model::{DeviceForest, UNKNOWN};

use crate::devices::{DeviceRecord, DeviceSource};
use crate::tree::{NodeInfo, assemble};

/// Name, manufacturer and raw id of one device.
pub fn node_info(devices: &dyn DeviceSource, device: &DeviceRecord) -> NodeInfo<String> {
    let first = |attribute: &str, properties: &[&str]| {
        devices
            .attribute(device, attribute)
            .or_else(|| {
                properties
                    .iter()
                    .find_map(|p| device.property(p).map(str::to_string))
            })
    };
    NodeInfo {
        id: device.id(),
        name: first("product", &["ID_MODEL_FROM_DATABASE", "ID_MODEL"])
            .unwrap_or_else(|| device.sysname.clone()),
        device_id: ["PRODUCT", "PCI_ID", "MODALIAS"]
            .iter()
            .find_map(|p| device.property(p))
            .unwrap_or(&device.sysname)
            .to_string(),
        manufacturer: first("manufacturer", &["ID_VENDOR_FROM_DATABASE", "ID_VENDOR"])
            .unwrap_or_else(|| UNKNOWN.to_string()),
    }
}

/// Assemble the devices of `subsystem` into a forest.
///
/// A device's parent is its nearest ancestor that belongs to the same set;
/// devices with none are roots. For "usb" only whole devices are kept, not
/// their interfaces.
pub fn build_device_tree(devices: &dyn DeviceSource, subsystem: &str) -> DeviceForest {
    let members: Vec<DeviceRecord> = devices
        .enumerate(subsystem)
        .into_iter()
        .filter(|d| subsystem != "usb" || d.devtype_is("usb_device"))
        .collect();
    let ids: HashMap<String, usize> = members
        .iter()
        .enumerate()
        .map(|(i, d)| (d.id(), i))
        .collect();

    let mut roots = Vec::new();
    let mut children: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, device) in members.iter().enumerate() {
        let mut ancestor = devices.parent(device);
        let parent = loop {
            match ancestor {
                Some(a) if ids.contains_key(&a.id()) => break Some(a.id()),
                Some(a) => ancestor = devices.parent(&a),
                None => break None,
            }
        };
        match parent {
            Some(p) => children.entry(p).or_default().push(i),
            None => roots.push(node_info(devices, device)),
        }
    }

    assemble(roots, |id| {
        children
            .get(id)
            .map(|kids| {
                kids.iter()
                    .map(|i| node_info(devices, &members[*i]))
                    .collect()
            })
            .unwrap_or_default()
    })
    .into_forest()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::devices::SysfsDevices;
    use crate::source::FsSource;
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::path::Path;
    use std::sync::Arc;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_usb_hub_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let sys = root.join("sys");
        let hub = sys.join("devices/pci0000:00/0000:00:14.0/usb1");
        let kbd = hub.join("1-1");
        let iface = kbd.join("1-1:1.0");

        write(
            &hub.join("uevent"),
            "DEVTYPE=usb_device\nPRODUCT=1d6b/2/606\n",
        );
        write(&hub.join("product"), "xHCI Host Controller\n");
        write(&hub.join("manufacturer"), "Linux 6.6.0 xhci-hcd\n");
        write(
            &kbd.join("uevent"),
            "DEVTYPE=usb_device\nPRODUCT=46d/c31c/6400\n",
        );
        write(&kbd.join("product"), "USB Keyboard\n");
        write(&iface.join("uevent"), "DEVTYPE=usb_interface\n");
        write(&sys.join("devices/pci0000:00/0000:00:14.0/uevent"), "PCI_ID=8086:A36D\n");

        let bus = sys.join("bus/usb/devices");
        fs::create_dir_all(&bus).unwrap();
        symlink(&hub, bus.join("usb1")).unwrap();
        symlink(&kbd, bus.join("1-1")).unwrap();
        symlink(&iface, bus.join("1-1:1.0")).unwrap();

        let devices = SysfsDevices::new(
            Arc::new(FsSource),
            sys,
            root.join("dev"),
            root.join("run/udev/data"),
        );
        let forest = build_device_tree(&devices, "usb");

        assert_eq!(forest.len(), 2);
        let roots: Vec<_> = forest.roots().collect();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].name, "xHCI Host Controller");
        assert_eq!(roots[0].device_id, "1d6b/2/606");

        let kids: Vec<_> = forest.children(&roots[0].id).collect();
        assert_eq!(kids.len(), 1);
        assert_eq!(kids[0].name, "USB Keyboard");
        assert_eq!(kids[0].manufacturer, UNKNOWN);
    }
}
