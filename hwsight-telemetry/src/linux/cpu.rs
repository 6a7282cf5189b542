//! Processor identity, topology and frequency from procfs and sysfs.

use hwsight_common::model::{LogicalProcessor, ProcessorIdentifier, UNKNOWN};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::LinuxBackend;
use crate::decode::{Endian, hex_to_bytes, parse_hex_or_decimal, parse_u64_or, read_uint};
use crate::fallback::{FallbackChain, meaningful_string};
use crate::microarch::microarchitecture;
use crate::units::{big_endian_midr, frequency_from_name, khz_to_hz, synthesized_processor_id};

/// Fields parsed from `/proc/cpuinfo`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuInfo {
    pub vendor: Option<String>,
    pub name: Option<String>,
    pub family: Option<String>,
    pub model: Option<String>,
    /// Decimal stepping on x86, `rNpM` on ARM.
    pub stepping: Option<String>,
    pub flags: Vec<String>,
    /// "cpu MHz" of each processor block, in order.
    pub mhz: Vec<f64>,
    pub topology: Vec<LogicalProcessor>,
}

impl CpuInfo {
    /// ARM reports a numeric implementer code instead of a vendor string.
    pub fn is_arm(&self) -> bool {
        self.vendor.as_deref().is_some_and(|v| v.starts_with("0x"))
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// Parse `/proc/cpuinfo`. Identity fields come from the first processor
/// block; topology and frequency are collected for every block.
pub fn parse_cpuinfo(lines: &[String]) -> CpuInfo {
    let mut info = CpuInfo::default();
    let mut variant: Option<u64> = None;
    let mut revision: Option<u64> = None;
    let mut hardware: Option<String> = None;
    let mut current: Option<LogicalProcessor> = None;

    let set = |slot: &mut Option<String>, value: &str| {
        if slot.is_none() && !value.is_empty() {
            *slot = Some(value.to_string());
        }
    };

    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "processor" => {
                // ARM kernels also print "Processor : <name>"
                if let Ok(n) = value.parse::<u32>() {
                    info.topology.extend(current.take());
                    current = Some(LogicalProcessor {
                        processor_number: n,
                        physical_processor_number: n,
                        physical_package_number: 0,
                        numa_node: 0,
                    });
                }
            }
            "Processor" => set(&mut hardware, value),
            "physical id" => {
                if let Some(lp) = current.as_mut() {
                    lp.physical_package_number = parse_u64_or(value, 0) as u32;
                }
            }
            "core id" => {
                if let Some(lp) = current.as_mut() {
                    lp.physical_processor_number = parse_u64_or(value, 0) as u32;
                }
            }
            "vendor_id" | "CPU implementer" => set(&mut info.vendor, value),
            "model name" => set(&mut info.name, value),
            "cpu family" | "CPU architecture" => set(&mut info.family, value),
            "model" | "CPU part" => set(&mut info.model, value),
            "stepping" => set(&mut info.stepping, value),
            "CPU variant" if variant.is_none() => variant = parse_hex_or_decimal(value),
            "CPU revision" if revision.is_none() => revision = parse_hex_or_decimal(value),
            "Hardware" => set(&mut hardware, value),
            "flags" | "Features" if info.flags.is_empty() => {
                info.flags = value.split_whitespace().map(str::to_string).collect();
            }
            "cpu MHz" => {
                if let Ok(mhz) = value.parse() {
                    info.mhz.push(mhz);
                }
            }
            _ => {}
        }
    }
    info.topology.extend(current);

    if let (true, Some(variant), Some(revision)) = (info.stepping.is_none(), variant, revision) {
        info.stepping = Some(format!("r{}p{}", variant, revision));
    }
    if info.name.is_none() {
        info.name = hardware;
    }
    info
}

/// Extract the processor ID from `dmidecode -t 4` output.
///
/// dmidecode prints the CPUID bytes in memory order (EAX then EDX, each
/// little-endian); the result is EDX followed by EAX as 16 hex digits.
pub fn parse_dmidecode_processor_id(lines: &[String]) -> Option<String> {
    let raw = lines
        .iter()
        .find_map(|l| l.trim().strip_prefix("ID:"))?;
    let mut bytes = hex_to_bytes(raw)?;
    if bytes.len() != 8 {
        return None;
    }
    bytes.reverse();
    Some(bytes.iter().map(|b| format!("{:02X}", b)).collect())
}

static CPUID_LEAF1: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"0x00000001 0x00: eax=0x([0-9a-fA-F]{8}).*edx=0x([0-9a-fA-F]{8})").unwrap()
});

/// Extract the processor ID from raw `cpuid -1r` output (leaf 1).
pub fn parse_cpuid_leaf1(lines: &[String]) -> Option<String> {
    lines.iter().find_map(|l| {
        let caps = CPUID_LEAF1.captures(l)?;
        Some(format!("{}{}", &caps[2], &caps[1]).to_uppercase())
    })
}

/// Processor ID derived from `/proc/cpuinfo` alone.
pub fn synthesize_processor_id(info: &CpuInfo) -> String {
    let field = |v: &Option<String>| v.clone().unwrap_or_default();
    if info.is_arm() {
        let midr = big_endian_midr(
            &field(&info.vendor),
            &field(&info.stepping),
            &field(&info.model),
            &field(&info.family),
        );
        return format!("{:016X}", midr);
    }
    let flags: Vec<&str> = info.flags.iter().map(String::as_str).collect();
    synthesized_processor_id(
        &field(&info.stepping),
        &field(&info.model),
        &field(&info.family),
        &flags,
    )
}

/// Assemble the identifier from parsed fields and resolved values.
pub fn build_processor_identifier(
    info: &CpuInfo,
    processor_id: String,
    cpu64bit: bool,
    vendor_freq_hz: u64,
) -> ProcessorIdentifier {
    let or_unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| UNKNOWN.to_string());
    let vendor = or_unknown(&info.vendor);
    let family = or_unknown(&info.family);
    let model = or_unknown(&info.model);
    let microarchitecture = microarchitecture(&vendor, &family, &model)
        .unwrap_or(UNKNOWN)
        .to_string();
    ProcessorIdentifier {
        name: or_unknown(&info.name),
        stepping: or_unknown(&info.stepping),
        vendor,
        family,
        model,
        processor_id,
        cpu64bit,
        vendor_freq_hz,
        microarchitecture,
    }
}

/// Topology of one `cpuN` sysfs directory.
pub fn build_logical_processor(
    number: u32,
    core_id: Option<&str>,
    package_id: Option<&str>,
    entries: &[String],
) -> LogicalProcessor {
    let numa_node = entries
        .iter()
        .filter_map(|e| e.strip_prefix("node"))
        .find_map(|n| n.parse().ok())
        .unwrap_or(0);
    LogicalProcessor {
        processor_number: number,
        physical_processor_number: core_id.map_or(number, |c| parse_u64_or(c, 0) as u32),
        physical_package_number: package_id.map_or(0, |p| parse_u64_or(p, 0) as u32),
        numa_node,
    }
}

/// Decode a device-tree `clock-frequency` cell (big-endian, 32 or 64 bit).
pub fn devicetree_clock(bytes: &[u8]) -> Option<u64> {
    match bytes.len() {
        4 | 8 => read_uint(bytes, 0, bytes.len(), Endian::Big).filter(|hz| *hz > 0),
        _ => None,
    }
}

impl LinuxBackend {
    fn cpuinfo(&self) -> CpuInfo {
        parse_cpuinfo(&self.text.read_lines(&self.proc_path("cpuinfo")))
    }

    fn cpu_dir(&self, number: u32) -> std::path::PathBuf {
        self.sys_path(format!("devices/system/cpu/cpu{}", number))
    }

    pub(super) fn processor_identity(&self) -> ProcessorIdentifier {
        self.identity
            .get_or_init(|| {
                let info = self.cpuinfo();

                let processor_id = FallbackChain::new("processor_id")
                    .then_validated(
                        "dmidecode",
                        || {
                            parse_dmidecode_processor_id(
                                &self.commands.run_privileged("dmidecode", &["-t", "4"]),
                            )
                        },
                        meaningful_string,
                    )
                    .then_validated(
                        "cpuid",
                        || parse_cpuid_leaf1(&self.commands.run("cpuid", &["-1r"])),
                        meaningful_string,
                    )
                    .then("cpuinfo", || Some(synthesize_processor_id(&info)))
                    .resolve_or(UNKNOWN.to_string());

                let cpu64bit = FallbackChain::new("cpu64bit")
                    .then("cpuinfo", || {
                        if info.is_arm() {
                            (info.has_flag("asimd") || info.has_flag("aes")).then_some(true)
                        } else {
                            (!info.flags.is_empty()).then(|| info.has_flag("lm"))
                        }
                    })
                    .then("getconf", || {
                        self.commands
                            .first_line("getconf", &["LONG_BIT"])
                            .map(|bits| bits == "64")
                    })
                    .resolve_or(false);

                let vendor_freq = FallbackChain::new("vendor_frequency")
                    .then("name", || info.name.as_deref().and_then(frequency_from_name))
                    .then_validated(
                        "cpufreq",
                        || {
                            let path = self.cpu_dir(0).join("cpufreq/base_frequency");
                            Some(khz_to_hz(parse_u64_or(&self.text.read_trimmed(&path)?, 0)))
                        },
                        |hz| *hz > 0,
                    )
                    .then("devicetree", || {
                        let path =
                            self.sys_path("firmware/devicetree/base/cpus/cpu@0/clock-frequency");
                        devicetree_clock(&self.text.read_bytes(&path)?)
                    })
                    .resolve_or(0);

                build_processor_identifier(&info, processor_id, cpu64bit, vendor_freq)
            })
            .clone()
    }

    pub(super) fn logical_processors(&self) -> Vec<LogicalProcessor> {
        FallbackChain::new("logical_processors")
            .then_validated("sysfs", || Some(self.sysfs_topology()), |v| !v.is_empty())
            .then_validated("cpuinfo", || Some(self.cpuinfo().topology), |v| !v.is_empty())
            .resolve_or(Vec::new())
    }

    fn sysfs_topology(&self) -> Vec<LogicalProcessor> {
        let mut numbers: Vec<u32> = self
            .text
            .list_dir(&self.sys_path("devices/system/cpu"))
            .iter()
            .filter_map(|e| e.strip_prefix("cpu")?.parse().ok())
            .collect();
        numbers.sort_unstable();

        numbers
            .into_iter()
            .map(|n| {
                let dir = self.cpu_dir(n);
                let core_id = self.text.read_trimmed(&dir.join("topology/core_id"));
                let package_id = self
                    .text
                    .read_trimmed(&dir.join("topology/physical_package_id"));
                build_logical_processor(
                    n,
                    core_id.as_deref(),
                    package_id.as_deref(),
                    &self.text.list_dir(&dir),
                )
            })
            .collect()
    }

    pub(super) fn current_frequencies(&self) -> Vec<u64> {
        let processors = self.logical_processors();
        let info = self.cpuinfo();
        let nominal = self.processor_identity().vendor_freq_hz;

        processors
            .iter()
            .enumerate()
            .map(|(i, lp)| {
                FallbackChain::new("current_frequency")
                    .then_validated(
                        "cpufreq",
                        || {
                            let path = self
                                .cpu_dir(lp.processor_number)
                                .join("cpufreq/scaling_cur_freq");
                            Some(khz_to_hz(parse_u64_or(&self.text.read_trimmed(&path)?, 0)))
                        },
                        |hz| *hz > 0,
                    )
                    .then_validated(
                        "cpuinfo",
                        || info.mhz.get(i).map(|mhz| (mhz * 1e6).round() as u64),
                        |hz| *hz > 0,
                    )
                    .then("nominal", || Some(nominal))
                    .resolve_or(0)
            })
            .collect()
    }

    pub(super) fn max_frequency(&self) -> u64 {
        let processors = self.logical_processors();
        let from_sysfs = processors
            .iter()
            .filter_map(|lp| {
                let path = self
                    .cpu_dir(lp.processor_number)
                    .join("cpufreq/cpuinfo_max_freq");
                self.text.read_trimmed(&path)
            })
            .map(|khz| khz_to_hz(parse_u64_or(&khz, 0)))
            .max()
            .unwrap_or(0);
        if from_sysfs > 0 {
            return from_sysfs;
        }
        debug!("No cpufreq maximum, using current frequencies");
        self.current_frequencies().into_iter().max().unwrap_or(0)
    }
}
