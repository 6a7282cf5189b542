//! Operating system details from `Win32_OperatingSystem`.

use hwsight_common::model::{OperatingSystemInfo, UNKNOWN};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::WindowsBackend;
use crate::fallback::FallbackChain;

const OS_PROPERTIES: &[&str] = &[
    "Caption",
    "Version",
    "BuildNumber",
    "OSArchitecture",
    "CSName",
    "Manufacturer",
];

static VER_OUTPUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[Version (\d+\.\d+)\.(\d+)(?:\.\d+)?\]").unwrap());

static CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:Microsoft )?Windows\s+((?:Server\s+)?\S+)\s*(.*)$").unwrap());

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Win32OperatingSystem {
    pub caption: Option<String>,
    pub version: Option<String>,
    pub build_number: Option<String>,
    #[serde(rename = "OSArchitecture")]
    pub os_architecture: Option<String>,
    #[serde(rename = "CSName")]
    pub cs_name: Option<String>,
    pub manufacturer: Option<String>,
}

/// Release and edition from a caption such as "Microsoft Windows 11 Pro".
pub fn parse_caption(caption: &str) -> Option<(String, Option<String>)> {
    let caps = CAPTION.captures(caption.trim())?;
    let edition = caps[2].trim();
    Some((
        caps[1].to_string(),
        Some(edition.to_string()).filter(|e| !e.is_empty()),
    ))
}

/// Version and build from `cmd /c ver`, e.g.
/// "Microsoft Windows [Version 10.0.22631.2861]".
pub fn parse_ver(lines: &[String]) -> Option<(String, String)> {
    lines.iter().find_map(|line| {
        let caps = VER_OUTPUT.captures(line)?;
        Some((format!("{}.{}", &caps[1], &caps[2]), caps[2].to_string()))
    })
}

impl WindowsBackend {
    pub(super) fn operating_system(&self) -> OperatingSystemInfo {
        let os = self
            .cim::<Win32OperatingSystem>("Win32_OperatingSystem", OS_PROPERTIES)
            .into_iter()
            .next()
            .unwrap_or_default();
        let caption = os.caption.as_deref().and_then(parse_caption);
        let ver = || parse_ver(&self.commands.run("cmd", &["/c", "ver"]));

        let version = FallbackChain::new("os_version")
            .then("caption", || caption.as_ref().map(|(release, _)| release.clone()))
            .then("cim", || os.version.clone())
            .then("ver", || ver().map(|(version, _)| version))
            .resolve_or(UNKNOWN.to_string());
        let build_number = FallbackChain::new("os_build")
            .then("cim", || os.build_number.clone())
            .then("ver", || ver().map(|(_, build)| build))
            .resolve_or(UNKNOWN.to_string());
        let bitness = FallbackChain::new("bitness")
            .then("cim", || {
                os.os_architecture
                    .as_deref()
                    .map(|a| if a.contains("64") { 64 } else { 32 })
            })
            .then("pointer-width", || {
                Some(if cfg!(target_pointer_width = "64") { 64 } else { 32 })
            })
            .resolve_or(0);

        OperatingSystemInfo {
            family: "Windows".to_string(),
            manufacturer: os
                .manufacturer
                .clone()
                .unwrap_or_else(|| "Microsoft Corporation".to_string()),
            version,
            codename: caption
                .and_then(|(_, edition)| edition)
                .unwrap_or_else(|| UNKNOWN.to_string()),
            build_number,
            bitness,
            hostname: os
                .cs_name
                .clone()
                .or_else(|| hostname::get().ok().map(|h| h.to_string_lossy().into_owned()))
                .unwrap_or_else(|| UNKNOWN.to_string()),
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
    use crate::windows::cim::cim_command;

    fn backend(runner: CannedCommandRunner) -> WindowsBackend {
        WindowsBackend::with_sources(
            &TelemetryConfig::default(),
            Arc::new(runner),
            Arc::new(FixedCounters::default()),
        )
    }

    #[test]
    fn test_parse_caption() {
        assert_eq!(
            parse_caption("Microsoft Windows 11 Pro"),
            Some(("11".to_string(), Some("Pro".to_string())))
        );
        assert_eq!(
            parse_caption("Microsoft Windows Server 2022 Datacenter"),
            Some(("Server 2022".to_string(), Some("Datacenter".to_string())))
        );
        assert_eq!(parse_caption("Linux"), None);
    }

    #[test]
    fn test_from_cim() {
        let runner = CannedCommandRunner::new().with(
            &format!(
                "powershell -NoProfile -NonInteractive -Command {}",
                cim_command("Win32_OperatingSystem", OS_PROPERTIES)
            ),
            r#"{"Caption":"Microsoft Windows 11 Pro","Version":"10.0.22631","BuildNumber":"22631","OSArchitecture":"64-bit","CSName":"DESKTOP-01","Manufacturer":"Microsoft Corporation"}"#,
        );
        let os = backend(runner).query_operating_system();
        assert_eq!(os.family, "Windows");
        assert_eq!(os.version, "11");
        assert_eq!(os.codename, "Pro");
        assert_eq!(os.build_number, "22631");
        assert_eq!(os.bitness, 64);
        assert_eq!(os.hostname, "DESKTOP-01");
    }

    #[test]
    fn test_ver_fallback() {
        let runner = CannedCommandRunner::new().with(
            "cmd /c ver",
            "\r\nMicrosoft Windows [Version 10.0.19045.3803]\r\n",
        );
        let os = backend(runner).query_operating_system();
        assert_eq!(os.version, "10.0.19045");
        assert_eq!(os.build_number, "19045");
        assert_eq!(os.codename, UNKNOWN);
    }
}
