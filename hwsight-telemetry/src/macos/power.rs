//! Batteries from `AppleSmartBattery` (static) and `pmset -g batt` (live).

use hwsight_common::model::{CapacityUnits, ChargeState, PowerSource};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::MacBackend;
use super::ioreg::IoregEntry;
use crate::power::{BatteryReading, BatteryStatic, build_power_sources};
use crate::units::packed_date;

const IOREG_BATTERY: &[&str] = &["-r", "-c", "AppleSmartBattery", "-l", "-w0"];

static PMSET_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*-(\S+)(?:\s+\(id=\d+\))?\s+(\d+)%;\s*([^;]+);\s*(.*)$").unwrap()
});

static REMAINING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+):(\d{2}) remaining").unwrap());

/// Static fields of the smart battery.
pub fn battery_static(battery: &IoregEntry) -> BatteryStatic {
    let text = |key: &str| battery.string(key).map(|s| s.trim().to_string());
    BatteryStatic {
        device_name: text("DeviceName"),
        manufacturer: text("Manufacturer"),
        serial_number: text("BatterySerialNumber").or_else(|| text("Serial")),
        chemistry: None,
        design_capacity: battery
            .int("DesignCapacity")
            .filter(|c| *c > 0)
            .map(|c| c as u32),
        manufacture_date: battery
            .int("ManufactureDate")
            .and_then(|bits| u16::try_from(bits).ok())
            .and_then(packed_date),
        cycle_count: battery.int("CycleCount").map(|c| c as i32),
    }
}

/// Live readings from `pmset -g batt`.
pub fn parse_pmset(lines: &[String]) -> Vec<BatteryReading> {
    let power_on_line = lines
        .first()
        .is_some_and(|l| l.contains("'AC Power'"));
    lines
        .iter()
        .skip(1)
        .filter_map(|line| {
            let caps = PMSET_ENTRY.captures(line)?;
            let state = match caps[3].trim() {
                "discharging" => ChargeState::Discharging,
                "charging" => ChargeState::Charging,
                _ => ChargeState::Idle,
            };
            let rest = &caps[4];
            let time_to_empty_secs = REMAINING.captures(rest).and_then(|t| {
                let hours: f64 = t[1].parse().ok()?;
                let minutes: f64 = t[2].parse().ok()?;
                Some(hours * 3600.0 + minutes * 60.0)
            });
            Some(BatteryReading {
                name: caps[1].to_string(),
                present: !rest.contains("present: false"),
                capacity_units: CapacityUnits::Relative,
                current_capacity: caps[2].parse::<u32>().unwrap_or(0).min(100),
                max_capacity: 100,
                state,
                power_on_line,
                time_to_empty_secs,
                ..Default::default()
            })
        })
        .collect()
}

/// Upgrade the internal battery reading with the registry's absolute
/// capacities and electrical values.
pub fn merge_registry(reading: &mut BatteryReading, battery: &IoregEntry) {
    let capacity = |raw: &str, relative: &str| {
        battery
            .int(raw)
            .or_else(|| battery.int(relative))
            .filter(|c| *c >= 0)
    };
    if let (Some(current), Some(max)) = (
        capacity("AppleRawCurrentCapacity", "CurrentCapacity"),
        capacity("AppleRawMaxCapacity", "MaxCapacity"),
    ) {
        if max > 100 {
            reading.capacity_units = CapacityUnits::MilliAmpHours;
            reading.current_capacity = current as u32;
            reading.max_capacity = max as u32;
        }
    }
    reading.voltage = battery.int("Voltage").map(|mv| mv as f64 / 1000.0);
    reading.amperage = battery
        .int("InstantAmperage")
        .or_else(|| battery.int("Amperage"))
        .map(|ma| ma as f64);
    reading.temperature = battery.int("Temperature").map(|t| t as f64 / 100.0);
}

impl MacBackend {
    pub(super) fn power_sources(&self) -> Vec<PowerSource> {
        let registry = self.ioreg(IOREG_BATTERY);
        let battery = registry.iter().find(|e| e.class == "AppleSmartBattery");
        let static_info = battery.map(battery_static).unwrap_or_default();

        let mut readings = parse_pmset(&self.commands.run("pmset", &["-g", "batt"]));
        if let Some(battery) = battery {
            for reading in readings
                .iter_mut()
                .filter(|r| r.name.starts_with("InternalBattery"))
            {
                merge_registry(reading, battery);
            }
        }
        debug!("Found {} power source readings", readings.len());
        build_power_sources(&static_info, readings)
    }
}
