//! Stateless unit conversions.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

/// Clock tick rate assumed when the platform does not report one.
pub const DEFAULT_CLOCK_TICKS: u64 = 100;

/// Conventional block-device sector size.
pub const SECTOR_SIZE: u64 = 512;

/// Convert clock ticks to milliseconds. A zero `hz` is treated as
/// [`DEFAULT_CLOCK_TICKS`].
pub fn ticks_to_millis(ticks: u64, hz: u64) -> u64 {
    let hz = if hz == 0 { DEFAULT_CLOCK_TICKS } else { hz };
    u64::try_from(u128::from(ticks) * 1000 / u128::from(hz)).unwrap_or(u64::MAX)
}

/// Clamp a start time that is at or after `now_ms` (clock skew near process
/// birth) to `now_ms - 1`, and return it with the resulting up time.
pub fn clamp_start_time(start_ms: u64, now_ms: u64) -> (u64, u64) {
    let start = if start_ms >= now_ms {
        now_ms.saturating_sub(1)
    } else {
        start_ms
    };
    (start, now_ms - start)
}

/// Convert a sector count to bytes.
pub fn sectors_to_bytes(sectors: u64, sector_size: u64) -> u64 {
    sectors.saturating_mul(sector_size)
}

pub fn khz_to_hz(khz: u64) -> u64 {
    khz.saturating_mul(1000)
}

/// Convert micro-units (µV, µA, µWh) reported by sysfs to milli-units.
pub fn micro_to_milli(micro: i64) -> f64 {
    micro as f64 / 1000.0
}

/// `numerator / denominator` clamped to `[0.0, 1.0]`; 0 when the denominator
/// is not positive.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 || numerator.is_nan() {
        return 0.0;
    }
    (numerator / denominator).clamp(0.0, 1.0)
}

/// Decode a FAT-style packed date: day in bits 0-4, month in bits 5-8 and
/// years since 1980 in bits 9-15.
///
/// Returns `None` for a zero or out-of-range day or month.
pub fn packed_date(bits: u16) -> Option<NaiveDate> {
    let day = u32::from(bits & 0x1F);
    let month = u32::from((bits >> 5) & 0xF);
    let year = 1980 + i32::from((bits >> 9) & 0x7F);
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Inverse of [`packed_date`] for dates between 1980 and 2107.
pub fn pack_date(date: NaiveDate) -> Option<u16> {
    let years = u16::try_from(date.year() - 1980).ok().filter(|y| *y <= 0x7F)?;
    Some((years << 9) | ((date.month() as u16) << 5) | date.day() as u16)
}

/// Pack ARM identification fields into a 32-bit MIDR value.
///
/// Revision occupies bits 0-3 and variant bits 20-23, both taken from an
/// `rNpM` stepping; part number bits 4-15; architecture bits 16-19;
/// implementer bits 24-31. Each numeric input may be hex (`0x41`) or decimal.
pub fn big_endian_midr(vendor: &str, stepping: &str, model: &str, family: &str) -> u32 {
    let mut midr: u32 = 0;
    if let Some((variant, revision)) = stepping
        .strip_prefix('r')
        .and_then(|rest| rest.split_once('p'))
    {
        midr |= last_int(revision) & 0xF;
        midr |= (last_int(variant) & 0xF) << 20;
    }
    midr |= (last_int(model) & 0xFFF) << 4;
    midr |= (last_int(family) & 0xF) << 16;
    midr |= (last_int(vendor) & 0xFF) << 24;
    midr
}

fn last_int(text: &str) -> u32 {
    crate::decode::parse_last_int(text, 0) as u32
}

/// EDX feature-flag bits of CPUID leaf 1, keyed by `/proc/cpuinfo` flag name.
const CPUID_EDX_FLAGS: &[(&str, u32)] = &[
    ("fpu", 0),
    ("vme", 1),
    ("de", 2),
    ("pse", 3),
    ("tsc", 4),
    ("msr", 5),
    ("pae", 6),
    ("mce", 7),
    ("cx8", 8),
    ("apic", 9),
    ("sep", 11),
    ("mtrr", 12),
    ("pge", 13),
    ("mca", 14),
    ("cmov", 15),
    ("pat", 16),
    ("pse-36", 17),
    ("pse36", 17),
    ("psn", 18),
    ("clfsh", 19),
    ("clflush", 19),
    ("ds", 21),
    ("acpi", 22),
    ("mmx", 23),
    ("fxsr", 24),
    ("sse", 25),
    ("sse2", 26),
    ("ss", 27),
    ("htt", 28),
    ("ht", 28),
    ("tm", 29),
    ("ia64", 30),
    ("pbe", 31),
];

/// Encode stepping/model/family and feature flags the way CPUID leaf 1
/// reports them in EAX (low 32 bits) and EDX (high 32 bits), as 16 hex digits.
pub fn synthesized_processor_id(stepping: &str, model: &str, family: &str, flags: &[&str]) -> String {
    let stepping = u64::from(last_int(stepping));
    let model = u64::from(last_int(model));
    let family = u64::from(last_int(family));

    let mut eax: u64 = stepping & 0xF;
    eax |= (model & 0x0F) << 4;
    eax |= (model & 0xF0) << 12;
    eax |= (family & 0x0F) << 8;
    eax |= (family & 0x0FF0) << 16;

    let edx = flags.iter().fold(0u64, |acc, flag| {
        let flag = flag.to_ascii_lowercase();
        CPUID_EDX_FLAGS
            .iter()
            .find(|(name, _)| *name == flag)
            .map_or(acc, |(_, bit)| acc | (1 << bit))
    });

    format!("{:016X}", (edx << 32) | eax)
}

static HERTZ_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*([kKMGT]?)Hz").unwrap());

/// Parse a frequency string such as "2.60GHz" or "800 MHz" into Hz.
pub fn parse_hertz(text: &str) -> Option<u64> {
    let caps = HERTZ_REGEX.captures(text)?;
    let value: f64 = caps[1].parse().ok()?;
    let multiplier = match &caps[2] {
        "k" | "K" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        _ => 1.0,
    };
    Some((value * multiplier).round() as u64)
}

/// Extract the nominal frequency embedded in a marketing name, e.g.
/// "Intel(R) Core(TM) i7-8700 CPU @ 3.20GHz".
pub fn frequency_from_name(name: &str) -> Option<u64> {
    let (_, tail) = name.rsplit_once('@')?;
    parse_hertz(tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_to_millis() {
        for hz in [1, 60, 100, 250, 1000, 1024] {
            assert_eq!(ticks_to_millis(hz, hz), 1000);
            assert_eq!(ticks_to_millis(0, hz), 0);
        }
        assert_eq!(ticks_to_millis(250, 100), 2500);
        assert_eq!(ticks_to_millis(100, 0), 1000);
        assert_eq!(ticks_to_millis(u64::MAX, 1), u64::MAX);
        assert_eq!(ticks_to_millis(u64::MAX, 1000), u64::MAX);
    }

    #[test]
    fn test_clamp_start_time() {
        assert_eq!(clamp_start_time(900, 1_000), (900, 100));
        assert_eq!(clamp_start_time(1_000, 1_000), (999, 1));
        assert_eq!(clamp_start_time(5_000, 1_000), (999, 1));
    }

    #[test]
    fn test_sectors_and_khz() {
        assert_eq!(sectors_to_bytes(4800, SECTOR_SIZE), 2_457_600);
        assert_eq!(sectors_to_bytes(u64::MAX, SECTOR_SIZE), u64::MAX);
        assert_eq!(khz_to_hz(2_600_000), 2_600_000_000);
    }

    #[test]
    fn test_ratio_is_clamped() {
        assert_eq!(ratio(50.0, 100.0), 0.5);
        assert_eq!(ratio(120.0, 100.0), 1.0);
        assert_eq!(ratio(-3.0, 100.0), 0.0);
        assert_eq!(ratio(3.0, 0.0), 0.0);
    }

    #[test]
    fn test_packed_date_roundtrip() {
        for (y, m, d) in [(1980, 1, 1), (2015, 6, 30), (2023, 12, 31), (2107, 2, 28)] {
            let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
            let bits = pack_date(date).unwrap();
            assert_eq!(packed_date(bits), Some(date));
        }
        assert_eq!(pack_date(NaiveDate::from_ymd_opt(2108, 1, 1).unwrap()), None);
    }

    #[test]
    fn test_packed_date_invalid() {
        // day 0
        assert_eq!(packed_date((35 << 9) | (5 << 5)), None);
        // month 0
        assert_eq!(packed_date((35 << 9) | 10), None);
        // month 13
        assert_eq!(packed_date((35 << 9) | (13 << 5) | 10), None);
        // February 30th
        assert_eq!(packed_date((35 << 9) | (2 << 5) | 30), None);
    }

    #[test]
    fn test_big_endian_midr() {
        // Cortex-A72 r0p3: implementer 0x41, part 0xd08, architecture 8
        let midr = big_endian_midr("0x41", "r0p3", "0xd08", "8");
        assert_eq!(format!("{:08X}", midr), "4108D083");

        let midr = big_endian_midr("0x41", "r1p2", "0xd03", "7");
        assert_eq!(format!("{:08X}", midr), "4117D032");

        // no rNpM stepping leaves revision and variant clear
        assert_eq!(big_endian_midr("0x41", "3", "0xd03", "8") & 0x00F0_000F, 0);
    }

    #[test]
    fn test_synthesized_processor_id() {
        let flags = ["fpu", "vme", "de", "pse", "tsc", "sse", "sse2"];
        let id = synthesized_processor_id("10", "158", "6", &flags);
        assert_eq!(id.len(), 16);
        // EAX for family 6 model 158 stepping 10 is 0x000906EA
        assert!(id.ends_with("000906EA"));
        // fpu|vme|de|pse|tsc = 0x1F, sse bit 25, sse2 bit 26
        assert!(id.starts_with("0600001F"));
    }

    #[test]
    fn test_parse_hertz() {
        assert_eq!(parse_hertz("2.60GHz"), Some(2_600_000_000));
        assert_eq!(parse_hertz("800 MHz"), Some(800_000_000));
        assert_eq!(parse_hertz("fast"), None);
        assert_eq!(
            frequency_from_name("Intel(R) Core(TM) i7-8700 CPU @ 3.20GHz"),
            Some(3_200_000_000)
        );
        assert_eq!(frequency_from_name("AMD Ryzen 7 5800X 8-Core Processor"), None);
    }
}
