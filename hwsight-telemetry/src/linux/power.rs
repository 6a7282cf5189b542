//! Power supplies from `/sys/class/power_supply`.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use hwsight_common::model::{CapacityUnits, ChargeState, PowerSource};
use tracing::trace;

use super::LinuxBackend;
use crate::decode::parse_long_or;
use crate::power::{BatteryReading, BatteryStatic, build_power_source};

/// One `POWER_SUPPLY_*` uevent with the prefix removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupplyUevent(BTreeMap<String, String>);

impl SupplyUevent {
    pub fn new(uevent: BTreeMap<String, String>) -> Self {
        Self(
            uevent
                .into_iter()
                .filter_map(|(k, v)| Some((k.strip_prefix("POWER_SUPPLY_")?.to_string(), v)))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    fn int(&self, key: &str) -> Option<i64> {
        self.get(key).map(|v| parse_long_or(v, 0))
    }

    fn micro(&self, key: &str) -> Option<u32> {
        self.int(key).map(|v| (v.max(0) / 1000) as u32)
    }

    pub fn supply_type(&self) -> &str {
        self.get("TYPE").unwrap_or("")
    }

    /// Battery-like supplies become power sources.
    pub fn is_battery(&self) -> bool {
        matches!(self.supply_type(), "Battery" | "UPS")
    }

    /// A line supply (AC adapter or USB charger) that is delivering power.
    pub fn is_online_line(&self) -> bool {
        matches!(self.supply_type(), "Mains" | "USB" | "USB_C" | "USB_PD")
            && self.get("ONLINE") == Some("1")
    }
}

/// Split a battery uevent into static and live fields.
pub fn parse_battery(
    dir_name: &str,
    supply: &SupplyUevent,
    power_on_line: bool,
) -> (BatteryStatic, BatteryReading) {
    let text = |key: &str| supply.get(key).map(|v| v.trim().to_string());

    let (capacity_units, current, max, design) = if supply.get("ENERGY_NOW").is_some() {
        (
            CapacityUnits::MilliWattHours,
            supply.micro("ENERGY_NOW"),
            supply.micro("ENERGY_FULL"),
            supply.micro("ENERGY_FULL_DESIGN"),
        )
    } else if supply.get("CHARGE_NOW").is_some() {
        (
            CapacityUnits::MilliAmpHours,
            supply.micro("CHARGE_NOW"),
            supply.micro("CHARGE_FULL"),
            supply.micro("CHARGE_FULL_DESIGN"),
        )
    } else {
        let percent = supply.int("CAPACITY").map(|p| p.clamp(0, 100) as u32);
        (CapacityUnits::Relative, percent, Some(100), None)
    };

    let state = match supply.get("STATUS") {
        Some("Charging") => ChargeState::Charging,
        Some("Discharging") => ChargeState::Discharging,
        _ => ChargeState::Idle,
    };

    let manufacture_date = match (
        supply.int("MANUFACTURE_YEAR"),
        supply.int("MANUFACTURE_MONTH"),
        supply.int("MANUFACTURE_DAY"),
    ) {
        (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32),
        _ => None,
    };

    let static_info = BatteryStatic {
        device_name: text("MODEL_NAME"),
        manufacturer: text("MANUFACTURER"),
        serial_number: text("SERIAL_NUMBER"),
        chemistry: text("TECHNOLOGY"),
        design_capacity: design,
        manufacture_date,
        cycle_count: supply.int("CYCLE_COUNT").map(|c| c as i32),
    };

    let reading = BatteryReading {
        name: text("NAME").unwrap_or_else(|| dir_name.to_string()),
        present: supply.get("PRESENT") != Some("0"),
        capacity_units,
        current_capacity: current.unwrap_or(0),
        max_capacity: max.filter(|m| *m > 0).unwrap_or(1),
        voltage: supply.int("VOLTAGE_NOW").map(|uv| uv as f64 / 1e6),
        amperage: supply.int("CURRENT_NOW").map(|ua| ua as f64 / 1e3),
        power_usage_rate: supply.int("POWER_NOW").map(|uw| uw as f64 / 1e3),
        state,
        power_on_line,
        time_to_empty_secs: supply.int("TIME_TO_EMPTY_NOW").map(|s| s as f64),
        temperature: supply.int("TEMP").map(|t| t as f64 / 10.0),
    };

    (static_info, reading)
}

impl LinuxBackend {
    pub(super) fn power_sources(&self) -> Vec<PowerSource> {
        let dir = self.sys_path("class/power_supply");
        let supplies: Vec<(String, SupplyUevent)> = self
            .text
            .list_dir(&dir)
            .into_iter()
            .map(|name| {
                let uevent = self.text.read_key_values(&dir.join(&name).join("uevent"), '=');
                (name, SupplyUevent::new(uevent))
            })
            .collect();

        let power_on_line = supplies.iter().any(|(_, s)| s.is_online_line());

        supplies
            .iter()
            .filter(|(name, s)| {
                if !s.is_battery() {
                    trace!("Skipping power supply {} of type {}", name, s.supply_type());
                }
                s.is_battery()
            })
            .map(|(name, s)| parse_battery(name, s, power_on_line))
            .filter(|(_, reading)| reading.present)
            .map(|(static_info, reading)| build_power_source(&static_info, reading))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::parse_key_values;

    fn uevent(text: &str) -> SupplyUevent {
        let lines: Vec<&str> = text.lines().collect();
        SupplyUevent::new(parse_key_values(&lines, '='))
    }

    const BAT0: &str = "\
POWER_SUPPLY_NAME=BAT0
POWER_SUPPLY_TYPE=Battery
POWER_SUPPLY_STATUS=Discharging
POWER_SUPPLY_PRESENT=1
POWER_SUPPLY_TECHNOLOGY=Li-ion
POWER_SUPPLY_CYCLE_COUNT=87
POWER_SUPPLY_VOLTAGE_NOW=12000000
POWER_SUPPLY_POWER_NOW=10000000
POWER_SUPPLY_ENERGY_FULL_DESIGN=57000000
POWER_SUPPLY_ENERGY_FULL=50000000
POWER_SUPPLY_ENERGY_NOW=30000000
POWER_SUPPLY_CAPACITY=60
POWER_SUPPLY_MODEL_NAME=5B10W13930
POWER_SUPPLY_MANUFACTURER=SMP
POWER_SUPPLY_SERIAL_NUMBER=1234
";

    #[test]
    fn test_energy_battery() {
        let (static_info, reading) = parse_battery("BAT0", &uevent(BAT0), false);
        assert_eq!(reading.capacity_units, CapacityUnits::MilliWattHours);
        assert_eq!(reading.current_capacity, 30_000);
        assert_eq!(reading.max_capacity, 50_000);
        assert_eq!(static_info.design_capacity, Some(57_000));
        assert_eq!(static_info.cycle_count, Some(87));

        let ps = build_power_source(&static_info, reading);
        assert_eq!(ps.name, "BAT0");
        assert_eq!(ps.device_name, "5B10W13930");
        assert_eq!(ps.chemistry, "Li-ion");
        assert_eq!(ps.voltage, 12.0);
        assert_eq!(ps.power_usage_rate, -10_000.0);
        assert_eq!(ps.time_remaining_instant, 10_800.0);
        assert!(ps.discharging);
    }

    #[test]
    fn test_capacity_only_battery() {
        let supply = uevent(
            "POWER_SUPPLY_TYPE=Battery\nPOWER_SUPPLY_STATUS=Full\nPOWER_SUPPLY_CAPACITY=100\n",
        );
        let (_, reading) = parse_battery("hid-battery", &supply, true);
        assert_eq!(reading.name, "hid-battery");
        assert_eq!(reading.capacity_units, CapacityUnits::Relative);
        assert_eq!((reading.current_capacity, reading.max_capacity), (100, 100));
        assert_eq!(reading.state, ChargeState::Idle);
    }

    #[test]
    fn test_supply_kinds() {
        let ac = uevent("POWER_SUPPLY_TYPE=Mains\nPOWER_SUPPLY_ONLINE=1\n");
        assert!(ac.is_online_line());
        assert!(!ac.is_battery());
        let absent = uevent("POWER_SUPPLY_TYPE=Battery\nPOWER_SUPPLY_PRESENT=0\n");
        assert!(!parse_battery("BAT1", &absent, false).1.present);
    }
}
