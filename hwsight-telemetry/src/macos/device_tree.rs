//! Device trees from an I/O registry plane.

use std::collections::HashMap;

use hwsight_common::model::{DeviceForest, UNKNOWN};

use super::MacBackend;
use super::ioreg::{IoregEntry, children_of};
use crate::tree::{NodeInfo, assemble};

/// Registry arguments for an interface class. Known classes map to their
/// plane; anything else is matched as an I/O Kit class name.
pub fn ioreg_args(interface_class: &str) -> Vec<String> {
    let plane = match interface_class.to_ascii_lowercase().as_str() {
        "usb" => Some("IOUSB"),
        "firewire" => Some("IOFireWire"),
        "devicetree" => Some("IODeviceTree"),
        _ => None,
    };
    let mut args: Vec<String> = match plane {
        Some(plane) => vec!["-p".to_string(), plane.to_string()],
        None => vec!["-r".to_string(), "-c".to_string(), interface_class.to_string()],
    };
    args.extend(["-l".to_string(), "-w0".to_string()]);
    args
}

fn node_info(entry: &IoregEntry) -> NodeInfo<String> {
    let name = entry
        .string("USB Product Name")
        .or_else(|| entry.string("kUSBProductString"))
        .or_else(|| entry.string("model"))
        .unwrap_or(&entry.name);
    let device_id = match (entry.int("idVendor"), entry.int("idProduct")) {
        (Some(vendor), Some(product)) => format!("{:04x}:{:04x}", vendor, product),
        _ => entry.id.clone(),
    };
    NodeInfo {
        id: entry.id.clone(),
        name: name.to_string(),
        device_id,
        manufacturer: entry
            .string("USB Vendor Name")
            .or_else(|| entry.string("kUSBVendorString"))
            .or_else(|| entry.string("manufacturer"))
            .unwrap_or(UNKNOWN)
            .to_string(),
    }
}

/// Assemble a forest from parsed registry entries. The registry root itself
/// is not a device; its children become roots.
pub fn build_device_tree(entries: &[IoregEntry]) -> DeviceForest {
    let is_device = |e: &IoregEntry| e.class != "IORegistryEntry" && !e.id.is_empty();
    let index_by_id: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id.as_str(), i))
        .collect();
    let roots = entries
        .iter()
        .filter(|e| is_device(e))
        .filter(|e| e.parent.is_none_or(|p| !is_device(&entries[p])))
        .map(node_info)
        .collect();

    assemble(roots, |id: &String| {
        let Some(index) = index_by_id.get(id.as_str()) else {
            return Vec::new();
        };
        children_of(entries, *index)
            .map(|i| &entries[i])
            .filter(|e| is_device(e))
            .map(node_info)
            .collect()
    })
    .into_forest()
}

impl MacBackend {
    pub(super) fn device_tree(&self, interface_class: &str) -> DeviceForest {
        let args = ioreg_args(interface_class);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        build_device_tree(&self.ioreg(&args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macos::ioreg::parse_ioreg;

    const USB_PLANE: &str = r#"+-o Root  <class IORegistryEntry, id 0x100000100, retain 21>
  +-o AppleUSBXHCI@01000000  <class AppleUSBXHCI, id 0x100000200, registered>
    | {
    |   "name" = <"usb-drd0">
    | }
    |
    +-o USB3.1 Hub@01100000  <class IOUSBHostDevice, id 0x100000300, registered>
      | {
      |   "USB Product Name" = "USB3.1 Hub"
      |   "USB Vendor Name" = "GenesysLogic"
      |   "idVendor" = 1507
      |   "idProduct" = 1553
      | }
      |
      +-o Magic Keyboard@01110000  <class IOUSBHostDevice, id 0x100000301, registered>
          {
            "USB Product Name" = "Magic Keyboard"
            "USB Vendor Name" = "Apple Inc."
            "idVendor" = 1452
            "idProduct" = 620
          }
"#;

    #[test]
    fn test_usb_plane_forest() {
        let entries = parse_ioreg(&USB_PLANE.lines().collect::<Vec<_>>());
        let forest = build_device_tree(&entries);
        assert_eq!(forest.len(), 3);

        let roots: Vec<_> = forest.roots().map(|n| n.id.as_str()).collect();
        assert_eq!(roots, vec!["0x100000200"]);

        let hub = forest.get("0x100000300").unwrap();
        assert_eq!(hub.parent_id.as_deref(), Some("0x100000200"));
        assert_eq!(hub.device_id, "05e3:0611");
        assert_eq!(hub.manufacturer, "GenesysLogic");

        let keyboard = forest.get("0x100000301").unwrap();
        assert_eq!(keyboard.name, "Magic Keyboard");
        assert_eq!(keyboard.parent_id.as_deref(), Some("0x100000300"));
        assert_eq!(forest.children("0x100000300").count(), 1);
    }

    #[test]
    fn test_ioreg_args() {
        assert_eq!(ioreg_args("USB"), vec!["-p", "IOUSB", "-l", "-w0"]);
        assert_eq!(
            ioreg_args("IOPCIDevice"),
            vec!["-r", "-c", "IOPCIDevice", "-l", "-w0"]
        );
    }

    #[test]
    fn test_empty_registry() {
        assert!(build_device_tree(&[]).is_empty());
    }
}
