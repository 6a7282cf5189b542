//! Processor identity and topology from `sysctl` and the device tree.

use hwsight_common::model::{LogicalProcessor, ProcessorIdentifier, UNKNOWN};
use tracing::debug;

use super::MacBackend;
use super::ioreg::IoregEntry;
use crate::decode::{Endian, parse_hex_or_decimal, read_uint};
use crate::fallback::{FallbackChain, meaningful_string};
use crate::linux::cpu::{CpuInfo, build_processor_identifier};
use crate::topology::synthesize_topology;
use crate::units::{frequency_from_name, synthesized_processor_id};

const IOREG_CPUS: &[&str] = &["-p", "IODeviceTree", "-r", "-n", "cpus", "-l", "-w0"];

/// Identity fields from `sysctl`. `lookup` returns the value of one key.
pub fn cpu_info<F>(lookup: F) -> CpuInfo
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(meaningful_string);
    let name = get("machdep.cpu.brand_string");
    match get("machdep.cpu.vendor") {
        Some(vendor) => CpuInfo {
            vendor: Some(vendor),
            name,
            family: get("machdep.cpu.family"),
            model: get("machdep.cpu.model"),
            stepping: get("machdep.cpu.stepping"),
            flags: get("machdep.cpu.features")
                .map(|f| f.split_whitespace().map(str::to_ascii_lowercase).collect())
                .unwrap_or_default(),
            ..Default::default()
        },
        // Apple silicon has no machdep.cpu vendor/family keys.
        None => CpuInfo {
            vendor: name
                .as_deref()
                .filter(|n| n.starts_with("Apple"))
                .map(|_| "Apple Inc.".to_string()),
            name,
            family: get("hw.cpufamily")
                .and_then(|f| parse_hex_or_decimal(&f))
                .map(|f| format!("0x{:x}", f & 0xFFFF_FFFF)),
            model: get("hw.cpusubtype"),
            ..Default::default()
        },
    }
}

/// Processor id from the CPUID signature and EDX feature bits.
pub fn cpuid_processor_id(signature: u64, feature_bits: u64) -> String {
    format!("{:08X}{:08X}", feature_bits & 0xFFFF_FFFF, signature & 0xFFFF_FFFF)
}

/// Clock of the first cpu node that reports one, little-endian.
pub fn device_tree_clock(entries: &[IoregEntry]) -> Option<u64> {
    entries
        .iter()
        .filter(|e| e.name.starts_with("cpu"))
        .find_map(|e| {
            let bytes = e.data("clock-frequency")?;
            read_uint(bytes, 0, bytes.len().min(8), Endian::Little)
        })
        .filter(|hz| *hz > 0)
}

impl MacBackend {
    pub(super) fn processor_identity(&self) -> ProcessorIdentifier {
        self.identity
            .get_or_init(|| {
                let info = cpu_info(|key| self.sysctl(key));
                let processor_id = FallbackChain::new("processor_id")
                    .then("cpuid-signature", || {
                        Some(cpuid_processor_id(
                            self.sysctl_u64("machdep.cpu.signature")?,
                            self.sysctl_u64("machdep.cpu.feature_bits")?,
                        ))
                    })
                    .then("cpufamily", || {
                        let family = self.sysctl_u64("hw.cpufamily")?;
                        let subtype = self.sysctl_u64("hw.cpusubtype").unwrap_or(0);
                        Some(format!("{:08X}{:08X}", family & 0xFFFF_FFFF, subtype & 0xFFFF_FFFF))
                    })
                    .then("synthesized", || {
                        let flags: Vec<&str> = info.flags.iter().map(String::as_str).collect();
                        Some(synthesized_processor_id(
                            info.stepping.as_deref()?,
                            info.model.as_deref()?,
                            info.family.as_deref()?,
                            &flags,
                        ))
                    })
                    .resolve_or(UNKNOWN.to_string());
                let cpu64bit = FallbackChain::new("cpu64bit")
                    .then("hw.cpu64bit_capable", || {
                        self.sysctl_u64("hw.cpu64bit_capable").map(|v| v == 1)
                    })
                    .then("pointer-width", || Some(cfg!(target_pointer_width = "64")))
                    .resolve_or(false);
                let vendor_freq = self.vendor_frequency(&info);
                let identity = build_processor_identifier(&info, processor_id, cpu64bit, vendor_freq);
                debug!("Processor identity: {}", identity.identifier());
                identity
            })
            .clone()
    }

    fn vendor_frequency(&self, info: &CpuInfo) -> u64 {
        FallbackChain::new("vendor_frequency")
            .then("brand-string", || info.name.as_deref().and_then(frequency_from_name))
            .then_validated(
                "hw.cpufrequency",
                || self.sysctl_u64("hw.cpufrequency"),
                |hz| *hz > 0,
            )
            .then("ioreg", || device_tree_clock(&self.ioreg(IOREG_CPUS)))
            .resolve_or(0)
    }

    pub(super) fn logical_processors(&self) -> Vec<LogicalProcessor> {
        let count = |key: &str| self.sysctl_u64(key).unwrap_or(0) as u32;
        synthesize_topology(
            count("hw.logicalcpu"),
            count("hw.physicalcpu"),
            count("hw.packages"),
        )
    }

    pub(super) fn current_frequencies(&self) -> Vec<u64> {
        let hz = FallbackChain::new("current_frequency")
            .then_validated(
                "hw.cpufrequency",
                || self.sysctl_u64("hw.cpufrequency"),
                |hz| *hz > 0,
            )
            .then("vendor", || Some(self.processor_identity().vendor_freq_hz))
            .resolve_or(0);
        vec![hz; self.logical_processors().len()]
    }

    pub(super) fn max_frequency(&self) -> u64 {
        self.sysctl_u64("hw.cpufrequency_max")
            .filter(|hz| *hz > 0)
            .unwrap_or_else(|| self.processor_identity().vendor_freq_hz)
    }
}
