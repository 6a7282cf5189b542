//! Operating system details from `sw_vers`.

use hwsight_common::model::{OperatingSystemInfo, UNKNOWN};

use super::MacBackend;
use crate::decode::parse_key_values;
use crate::fallback::FallbackChain;

/// Marketing name of a macOS release.
pub fn codename(version: &str) -> Option<&'static str> {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    Some(match (major, minor) {
        (26, _) => "Tahoe",
        (15, _) => "Sequoia",
        (14, _) => "Sonoma",
        (13, _) => "Ventura",
        (12, _) => "Monterey",
        (11, _) => "Big Sur",
        (10, 16) => "Big Sur",
        (10, 15) => "Catalina",
        (10, 14) => "Mojave",
        (10, 13) => "High Sierra",
        (10, 12) => "Sierra",
        (10, 11) => "El Capitan",
        (10, 10) => "Yosemite",
        _ => return None,
    })
}

impl MacBackend {
    pub(super) fn operating_system(&self) -> OperatingSystemInfo {
        let sw_vers = parse_key_values(&self.commands.run("sw_vers", &[]), ':');
        let field = |key: &str| sw_vers.get(key).filter(|v| !v.is_empty()).cloned();
        let version = FallbackChain::new("os_version")
            .then("sw_vers", || field("ProductVersion"))
            .then("sysctl", || self.sysctl("kern.osproductversion"))
            .resolve();
        let version = version.value();
        let bitness = FallbackChain::new("bitness")
            .then("hw.cpu64bit_capable", || {
                self.sysctl_u64("hw.cpu64bit_capable")
                    .map(|v| if v == 1 { 64 } else { 32 })
            })
            .then("pointer-width", || {
                Some(if cfg!(target_pointer_width = "64") { 64 } else { 32 })
            })
            .resolve_or(0);
        let unknown = || UNKNOWN.to_string();

        OperatingSystemInfo {
            family: field("ProductName").unwrap_or_else(|| "macOS".to_string()),
            manufacturer: "Apple".to_string(),
            codename: version
                .as_deref()
                .and_then(codename)
                .map_or_else(unknown, str::to_string),
            version: version.unwrap_or_else(unknown),
            build_number: field("BuildVersion")
                .or_else(|| self.sysctl("kern.osversion"))
                .unwrap_or_else(unknown),
            bitness,
            hostname: self
                .sysctl("kern.hostname")
                .or_else(|| hostname::get().ok().map(|h| h.to_string_lossy().into_owned()))
                .unwrap_or_else(unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hwsight_common::config::TelemetryConfig;

    use super::*;
    use crate::backend::PlatformTelemetryBackend;
    use crate::source::{CannedCommandRunner, FixedCounters};

    #[test]
    fn test_codenames() {
        assert_eq!(codename("14.2.1"), Some("Sonoma"));
        assert_eq!(codename("10.15.7"), Some("Catalina"));
        assert_eq!(codename("11.0"), Some("Big Sur"));
        assert_eq!(codename("9.1"), None);
        assert_eq!(codename("unknown"), None);
    }

    #[test]
    fn test_sw_vers() {
        let runner = CannedCommandRunner::new()
            .with(
                "sw_vers",
                "ProductName:\t\tmacOS\nProductVersion:\t\t14.2.1\nBuildVersion:\t\t23C71\n",
            )
            .with("sysctl -n hw.cpu64bit_capable", "1")
            .with("sysctl -n kern.hostname", "studio.local");
        let mac = MacBackend::with_sources(
            &TelemetryConfig::default(),
            Arc::new(runner),
            Arc::new(FixedCounters::default()),
        );
        let os = mac.query_operating_system();
        assert_eq!(os.family, "macOS");
        assert_eq!(os.version, "14.2.1");
        assert_eq!(os.codename, "Sonoma");
        assert_eq!(os.build_number, "23C71");
        assert_eq!(os.bitness, 64);
        assert_eq!(os.hostname, "studio.local");
    }
}
