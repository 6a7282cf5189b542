//! Processor identity and topology from `Win32_Processor`.

use hwsight_common::model::{LogicalProcessor, ProcessorIdentifier, UNKNOWN};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::WindowsBackend;
use crate::fallback::{FallbackChain, meaningful_string};
use crate::linux::cpu::{CpuInfo, build_processor_identifier};
use crate::topology::synthesize_topology;
use crate::units::{frequency_from_name, synthesized_processor_id};

const PROCESSOR_PROPERTIES: &[&str] = &[
    "Name",
    "Manufacturer",
    "Caption",
    "ProcessorId",
    "MaxClockSpeed",
    "CurrentClockSpeed",
    "NumberOfCores",
    "NumberOfLogicalProcessors",
    "AddressWidth",
];

static CAPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Family (\w+) Model (\w+) (?:Stepping|Revision) (\w+)").unwrap()
});

/// One `Win32_Processor` row, i.e. one socket.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Win32Processor {
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub caption: Option<String>,
    pub processor_id: Option<String>,
    /// MHz.
    pub max_clock_speed: Option<u64>,
    /// MHz.
    pub current_clock_speed: Option<u64>,
    pub number_of_cores: Option<u32>,
    pub number_of_logical_processors: Option<u32>,
    pub address_width: Option<u32>,
}

/// Identity fields of the first socket.
pub fn cpu_info(processor: &Win32Processor) -> CpuInfo {
    let clean = |v: &Option<String>| v.as_ref().map(|s| s.trim().to_string()).filter(meaningful_string);
    let caption = processor.caption.as_deref().and_then(|c| CAPTION.captures(c));
    let part = |i: usize| caption.as_ref().map(|c| c[i].to_string());
    CpuInfo {
        vendor: clean(&processor.manufacturer),
        name: clean(&processor.name),
        family: part(1),
        model: part(2),
        stepping: part(3),
        ..Default::default()
    }
}

/// Topology of every socket, numbered consecutively.
pub fn logical_processors(processors: &[Win32Processor]) -> Vec<LogicalProcessor> {
    let mut out: Vec<LogicalProcessor> = Vec::new();
    let mut next_core = 0;
    for (package, processor) in processors.iter().enumerate() {
        let logical = processor.number_of_logical_processors.unwrap_or(1);
        let cores = processor.number_of_cores.unwrap_or(logical);
        let base = out.len() as u32;
        let socket = synthesize_topology(logical, cores, 1);
        let socket_cores = socket
            .iter()
            .map(|lp| lp.physical_processor_number + 1)
            .max()
            .unwrap_or(0);
        out.extend(socket.into_iter().map(|lp| LogicalProcessor {
            processor_number: base + lp.processor_number,
            physical_processor_number: next_core + lp.physical_processor_number,
            physical_package_number: package as u32,
            numa_node: 0,
        }));
        next_core += socket_cores;
    }
    out
}

impl WindowsBackend {
    fn processors(&self) -> Vec<Win32Processor> {
        self.cim("Win32_Processor", PROCESSOR_PROPERTIES)
    }

    pub(super) fn processor_identity(&self) -> ProcessorIdentifier {
        self.identity
            .get_or_init(|| {
                let processors = self.processors();
                let first = processors.first().cloned().unwrap_or_default();
                let info = cpu_info(&first);
                let processor_id = FallbackChain::new("processor_id")
                    .then_validated("cim", || first.processor_id.clone(), meaningful_string)
                    .then_validated("wmic", || self.wmic("cpu", "ProcessorId"), meaningful_string)
                    .then("synthesized", || {
                        Some(synthesized_processor_id(
                            info.stepping.as_deref()?,
                            info.model.as_deref()?,
                            info.family.as_deref()?,
                            &[],
                        ))
                    })
                    .resolve_or(UNKNOWN.to_string());
                let cpu64bit = FallbackChain::new("cpu64bit")
                    .then("cim", || first.address_width.map(|w| w == 64))
                    .then("wmic", || {
                        self.wmic("os", "OSArchitecture").map(|a| a.contains("64"))
                    })
                    .then("pointer-width", || Some(cfg!(target_pointer_width = "64")))
                    .resolve_or(false);
                let vendor_freq = FallbackChain::new("vendor_frequency")
                    .then("name", || info.name.as_deref().and_then(frequency_from_name))
                    .then_validated(
                        "cim",
                        || first.max_clock_speed.map(|mhz| mhz * 1_000_000),
                        |hz| *hz > 0,
                    )
                    .then_validated(
                        "wmic",
                        || {
                            let mhz: u64 = self.wmic("cpu", "MaxClockSpeed")?.parse().ok()?;
                            Some(mhz * 1_000_000)
                        },
                        |hz| *hz > 0,
                    )
                    .resolve_or(0);
                let identity =
                    build_processor_identifier(&info, processor_id.trim().to_string(), cpu64bit, vendor_freq);
                debug!("Processor identity: {}", identity.identifier());
                identity
            })
            .clone()
    }

    pub(super) fn logical_processors(&self) -> Vec<LogicalProcessor> {
        let processors = self.processors();
        if processors.is_empty() {
            return synthesize_topology(1, 1, 1);
        }
        logical_processors(&processors)
    }

    pub(super) fn current_frequencies(&self) -> Vec<u64> {
        let processors = self.processors();
        if processors.is_empty() {
            return vec![self.processor_identity().vendor_freq_hz];
        }
        processors
            .iter()
            .flat_map(|p| {
                let hz = p.current_clock_speed.unwrap_or(0) * 1_000_000;
                let count = p.number_of_logical_processors.unwrap_or(1).max(1) as usize;
                std::iter::repeat_n(hz, count)
            })
            .collect()
    }

    pub(super) fn max_frequency(&self) -> u64 {
        self.processors()
            .iter()
            .filter_map(|p| p.max_clock_speed)
            .max()
            .map(|mhz| mhz * 1_000_000)
            .filter(|hz| *hz > 0)
            .unwrap_or_else(|| self.processor_identity().vendor_freq_hz)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hwsight_common::config::TelemetryConfig;

    use super::*;
    use crate::backend::PlatformTelemetryBackend;
    use crate::source::{CannedCommandRunner, FixedCounters};
    use crate::windows::cim::cim_command;

    const TWO_SOCKETS: &str = r#"[{"Name":"Intel(R) Xeon(R) Gold 6130 CPU @ 2.10GHz","Manufacturer":"GenuineIntel","Caption":"Intel64 Family 6 Model 85 Stepping 4","ProcessorId":"BFEBFBFF00050654","MaxClockSpeed":2095,"CurrentClockSpeed":2095,"NumberOfCores":2,"NumberOfLogicalProcessors":4,"AddressWidth":64},{"Name":"Intel(R) Xeon(R) Gold 6130 CPU @ 2.10GHz","Manufacturer":"GenuineIntel","Caption":"Intel64 Family 6 Model 85 Stepping 4","ProcessorId":"BFEBFBFF00050654","MaxClockSpeed":2095,"CurrentClockSpeed":1800,"NumberOfCores":2,"NumberOfLogicalProcessors":4,"AddressWidth":64}]"#;

    fn powershell_key(class: &str, properties: &[&str]) -> String {
        format!(
            "powershell -NoProfile -NonInteractive -Command {}",
            cim_command(class, properties)
        )
    }

    fn backend(runner: CannedCommandRunner) -> WindowsBackend {
        WindowsBackend::with_sources(
            &TelemetryConfig::default(),
            Arc::new(runner),
            Arc::new(FixedCounters::default()),
        )
    }

    #[test]
    fn test_identity_from_cim() {
        let win = backend(
            CannedCommandRunner::new()
                .with(&powershell_key("Win32_Processor", PROCESSOR_PROPERTIES), TWO_SOCKETS),
        );
        let id = win.query_processor_identity();
        assert_eq!(id.vendor, "GenuineIntel");
        assert_eq!(id.family, "6");
        assert_eq!(id.model, "85");
        assert_eq!(id.stepping, "4");
        assert_eq!(id.processor_id, "BFEBFBFF00050654");
        assert_eq!(id.vendor_freq_hz, 2_100_000_000);
        assert_eq!(id.microarchitecture, "Skylake (Server)");
        assert!(id.cpu64bit);
    }

    #[test]
    fn test_two_socket_topology() {
        let win = backend(
            CannedCommandRunner::new()
                .with(&powershell_key("Win32_Processor", PROCESSOR_PROPERTIES), TWO_SOCKETS),
        );
        let lps = win.query_logical_processors();
        assert_eq!(lps.len(), 8);
        assert_eq!(lps[4].processor_number, 4);
        assert_eq!(lps[4].physical_package_number, 1);
        assert_eq!(lps[4].physical_processor_number, 2);
        assert_eq!(lps[7].physical_processor_number, 3);

        let freqs = win.query_current_frequencies();
        assert_eq!(freqs.len(), 8);
        assert_eq!(freqs[0], 2_095_000_000);
        assert_eq!(freqs[7], 1_800_000_000);
        assert_eq!(win.query_max_frequency(), 2_095_000_000);
    }

    #[test]
    fn test_wmic_fallback() {
        let win = backend(
            CannedCommandRunner::new()
                .with("wmic cpu get ProcessorId /value", "\r\n\r\nProcessorId=178BFBFF00A20F12\r\n\r\n"),
        );
        let id = win.query_processor_identity();
        assert_eq!(id.processor_id, "178BFBFF00A20F12");
        assert_eq!(id.vendor, UNKNOWN);
    }
}
