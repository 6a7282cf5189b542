//! Distribution, kernel and host details.

use std::collections::BTreeMap;

use hwsight_common::model::{OperatingSystemInfo, UNKNOWN};
use once_cell::sync::Lazy;
use regex::Regex;

use super::LinuxBackend;
use crate::decode::{parse_key_values, unquote};
use crate::fallback::FallbackChain;

/// Distribution name, version and codename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distro {
    pub family: String,
    pub version: Option<String>,
    pub codename: Option<String>,
}

impl Distro {
    fn new(family: &str, version: Option<&str>, codename: Option<&str>) -> Option<Self> {
        let clean = |v: &str| Some(unquote(v).trim().to_string()).filter(|s| !s.is_empty());
        Some(Self {
            family: clean(family)?,
            version: version.and_then(clean),
            codename: codename.and_then(clean),
        })
    }
}

static PARENTHESIZED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([^)]+)\)").unwrap());

static RELEASE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)\s+release\s+([^\s(]+)(?:.*\(([^)]+)\))?").unwrap()
});

/// `/etc/os-release` (already split into key/value pairs).
pub fn parse_os_release(map: &BTreeMap<String, String>) -> Option<Distro> {
    let get = |k: &str| map.get(k).map(String::as_str);
    let codename = get("VERSION_CODENAME").map(str::to_string).or_else(|| {
        let version = get("VERSION")?;
        Some(PARENTHESIZED.captures(version)?[1].to_string())
    });
    Distro::new(
        get("NAME")?,
        get("VERSION_ID").or_else(|| get("VERSION")),
        codename.as_deref(),
    )
}

/// Output of `lsb_release -a`.
pub fn parse_lsb_release_output(lines: &[String]) -> Option<Distro> {
    let map = parse_key_values(lines, ':');
    let get = |k: &str| map.get(k).map(String::as_str);
    Distro::new(get("Distributor ID")?, get("Release"), get("Codename"))
}

/// `/etc/lsb-release`.
pub fn parse_lsb_release_file(map: &BTreeMap<String, String>) -> Option<Distro> {
    let get = |k: &str| map.get(k).map(String::as_str);
    Distro::new(get("DISTRIB_ID")?, get("DISTRIB_RELEASE"), get("DISTRIB_CODENAME"))
}

/// First line of a vendor release file, e.g.
/// "CentOS Linux release 7.9.2009 (Core)".
pub fn parse_release_line(line: &str) -> Option<Distro> {
    let caps = RELEASE_LINE.captures(line.trim())?;
    Distro::new(
        &caps[1],
        caps.get(2).map(|m| m.as_str()),
        caps.get(3).map(|m| m.as_str()),
    )
}

/// Release files other than the generic ones, e.g. "redhat-release".
pub fn is_vendor_release_file(name: &str) -> bool {
    (name.ends_with("-release") || name.ends_with("_version"))
        && name != "os-release"
        && name != "lsb-release"
}

/// Guess the distribution from a release file name.
pub fn family_from_filename(name: &str) -> Option<String> {
    let stem = name
        .strip_suffix("-release")
        .or_else(|| name.strip_suffix("_version"))?;
    const KNOWN: &[(&str, &str)] = &[
        ("redhat", "Red Hat Linux"),
        ("debian", "Debian"),
        ("SuSE", "SuSE"),
        ("gentoo", "Gentoo"),
        ("slackware", "Slackware"),
        ("arch", "Arch Linux"),
        ("alpine", "Alpine Linux"),
    ];
    if let Some((_, family)) = KNOWN.iter().find(|(k, _)| *k == stem) {
        return Some(family.to_string());
    }
    let mut chars = stem.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

impl LinuxBackend {
    fn distro(&self) -> Option<Distro> {
        let etc = |name: &str| self.etc_path(name);
        FallbackChain::new("os_family")
            .then("os-release", || {
                parse_os_release(&self.text.read_key_values(&etc("os-release"), '='))
            })
            .then("lsb_release", || {
                parse_lsb_release_output(&self.commands.run("lsb_release", &["-a"]))
            })
            .then("lsb-release", || {
                parse_lsb_release_file(&self.text.read_key_values(&etc("lsb-release"), '='))
            })
            .then("release-file", || {
                self.release_files()
                    .iter()
                    .filter_map(|f| self.text.read_trimmed(&etc(f)))
                    .find_map(|line| parse_release_line(&line))
            })
            .then("release-filename", || {
                self.release_files()
                    .iter()
                    .find_map(|f| family_from_filename(f))
                    .and_then(|family| Distro::new(&family, None, None))
            })
            .resolve()
            .value()
    }

    fn release_files(&self) -> Vec<String> {
        self.text
            .list_dir(&self.etc_path(""))
            .into_iter()
            .filter(|f| is_vendor_release_file(f))
            .collect()
    }

    pub(super) fn operating_system(&self) -> OperatingSystemInfo {
        let distro = self.distro();
        let bitness = FallbackChain::new("bitness")
            .then_validated(
                "getconf",
                || self.commands.first_line("getconf", &["LONG_BIT"])?.parse().ok(),
                |bits| *bits == 32 || *bits == 64,
            )
            .then("pointer-width", || {
                Some(if cfg!(target_pointer_width = "64") { 64 } else { 32 })
            })
            .resolve_or(0);
        let hostname = self
            .text
            .read_trimmed(&self.proc_path("sys/kernel/hostname"))
            .or_else(|| hostname::get().ok().map(|h| h.to_string_lossy().into_owned()))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let unknown = || UNKNOWN.to_string();

        OperatingSystemInfo {
            family: distro.as_ref().map_or_else(unknown, |d| d.family.clone()),
            manufacturer: "GNU/Linux".to_string(),
            version: distro
                .as_ref()
                .and_then(|d| d.version.clone())
                .unwrap_or_else(unknown),
            codename: distro
                .as_ref()
                .and_then(|d| d.codename.clone())
                .unwrap_or_else(unknown),
            build_number: self
                .text
                .read_trimmed(&self.proc_path("sys/kernel/osrelease"))
                .unwrap_or_else(unknown),
            bitness,
            hostname,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_os_release() {
        let map = parse_key_values(
            &lines("NAME=\"Ubuntu\"\nVERSION=\"22.04.3 LTS (Jammy Jellyfish)\"\nVERSION_ID=\"22.04\"\n"),
            '=',
        );
        let distro = parse_os_release(&map).unwrap();
        assert_eq!(distro.family, "Ubuntu");
        assert_eq!(distro.version.as_deref(), Some("22.04"));
        assert_eq!(distro.codename.as_deref(), Some("Jammy Jellyfish"));

        let no_name = parse_key_values(&lines("VERSION_ID=1\n"), '=');
        assert!(parse_os_release(&no_name).is_none());
    }

    #[test]
    fn test_lsb_release() {
        let out = lines("Distributor ID:\tDebian\nDescription:\tDebian GNU/Linux 12 (bookworm)\nRelease:\t12\nCodename:\tbookworm\n");
        assert_eq!(
            parse_lsb_release_output(&out),
            Some(Distro {
                family: "Debian".to_string(),
                version: Some("12".to_string()),
                codename: Some("bookworm".to_string()),
            })
        );

        let file = parse_key_values(
            &lines("DISTRIB_ID=LinuxMint\nDISTRIB_RELEASE=21.2\nDISTRIB_CODENAME=victoria\n"),
            '=',
        );
        assert_eq!(parse_lsb_release_file(&file).unwrap().family, "LinuxMint");
    }

    #[test]
    fn test_release_line() {
        let distro = parse_release_line("CentOS Linux release 7.9.2009 (Core)").unwrap();
        assert_eq!(distro.family, "CentOS Linux");
        assert_eq!(distro.version.as_deref(), Some("7.9.2009"));
        assert_eq!(distro.codename.as_deref(), Some("Core"));

        let fedora = parse_release_line("Fedora release 39 (Thirty Nine)").unwrap();
        assert_eq!(fedora.version.as_deref(), Some("39"));
        assert!(parse_release_line("12.4").is_none());
    }

    #[test]
    fn test_release_filenames() {
        assert!(is_vendor_release_file("redhat-release"));
        assert!(is_vendor_release_file("debian_version"));
        assert!(!is_vendor_release_file("os-release"));
        assert!(!is_vendor_release_file("passwd"));
        assert_eq!(family_from_filename("debian_version").as_deref(), Some("Debian"));
        assert_eq!(family_from_filename("mageia-release").as_deref(), Some("Mageia"));
        assert_eq!(family_from_filename("hosts"), None);
    }
}
