//! Batteries from `Win32_Battery`.

use hwsight_common::model::{CapacityUnits, ChargeState, PowerSource};
use serde::Deserialize;

use super::WindowsBackend;
use super::cim::lenient_u64;
use crate::power::{BatteryReading, BatteryStatic, build_power_source};

const BATTERY_PROPERTIES: &[&str] = &[
    "Name",
    "DeviceID",
    "EstimatedChargeRemaining",
    "EstimatedRunTime",
    "BatteryStatus",
    "Chemistry",
    "DesignCapacity",
    "FullChargeCapacity",
    "DesignVoltage",
];

/// Run time reported while on external power.
const RUN_TIME_ON_AC: u64 = 71_582_788;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Win32Battery {
    pub name: Option<String>,
    #[serde(rename = "DeviceID")]
    pub device_id: Option<String>,
    pub estimated_charge_remaining: Option<u32>,
    /// Minutes.
    #[serde(deserialize_with = "lenient_u64")]
    pub estimated_run_time: Option<u64>,
    pub battery_status: Option<u16>,
    pub chemistry: Option<u16>,
    /// mWh.
    pub design_capacity: Option<u32>,
    /// mWh.
    pub full_charge_capacity: Option<u32>,
    /// mV.
    #[serde(deserialize_with = "lenient_u64")]
    pub design_voltage: Option<u64>,
}

/// Name of a `Chemistry` code.
pub fn chemistry_name(code: u16) -> Option<&'static str> {
    Some(match code {
        3 => "Lead Acid",
        4 => "Nickel Cadmium",
        5 => "Nickel Metal Hydride",
        6 => "Lithium-ion",
        7 => "Zinc air",
        8 => "Lithium Polymer",
        _ => return None,
    })
}

/// Charge state and whether external power is connected, from a
/// `BatteryStatus` code.
pub fn battery_status(code: u16) -> (ChargeState, bool) {
    match code {
        1 | 4 | 5 => (ChargeState::Discharging, false),
        6..=9 => (ChargeState::Charging, true),
        2 | 3 | 11 => (ChargeState::Idle, true),
        _ => (ChargeState::Idle, false),
    }
}

/// Merge one battery row into a power source.
pub fn build_battery(battery: &Win32Battery) -> PowerSource {
    let (state, power_on_line) = battery_status(battery.battery_status.unwrap_or(0));
    let static_info = BatteryStatic {
        device_name: battery.device_id.clone(),
        chemistry: battery
            .chemistry
            .and_then(chemistry_name)
            .map(str::to_string),
        design_capacity: battery.design_capacity.filter(|c| *c > 0),
        ..Default::default()
    };
    let percent = battery.estimated_charge_remaining.unwrap_or(0).min(100);
    let reading = match battery.full_charge_capacity.filter(|c| *c > 0) {
        Some(full) => BatteryReading {
            capacity_units: CapacityUnits::MilliWattHours,
            current_capacity: (u64::from(full) * u64::from(percent) / 100) as u32,
            max_capacity: full,
            ..Default::default()
        },
        None => BatteryReading {
            current_capacity: percent,
            ..Default::default()
        },
    };
    let time_to_empty_secs = battery
        .estimated_run_time
        .filter(|m| *m != RUN_TIME_ON_AC)
        .map(|minutes| minutes as f64 * 60.0);
    build_power_source(
        &static_info,
        BatteryReading {
            name: battery
                .name
                .clone()
                .unwrap_or_else(|| "Battery".to_string()),
            voltage: battery
                .design_voltage
                .filter(|mv| *mv > 0)
                .map(|mv| mv as f64 / 1000.0),
            state,
            power_on_line: power_on_line
                || battery.estimated_run_time == Some(RUN_TIME_ON_AC),
            time_to_empty_secs,
            ..reading
        },
    )
}

impl WindowsBackend {
    pub(super) fn power_sources(&self) -> Vec<PowerSource> {
        self.cim::<Win32Battery>("Win32_Battery", BATTERY_PROPERTIES)
            .iter()
            .map(build_battery)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hwsight_common::config::TelemetryConfig;
    use hwsight_common::model::TIME_REMAINING_UNKNOWN;

    use super::*;
    use crate::backend::PlatformTelemetryBackend;
    use crate::source::{CannedCommandRunner, FixedCounters};
    use crate::windows::cim::cim_command;

    #[test]
    fn test_status_codes() {
        assert_eq!(battery_status(1), (ChargeState::Discharging, false));
        assert_eq!(battery_status(6), (ChargeState::Charging, true));
        assert_eq!(battery_status(2), (ChargeState::Idle, true));
        assert_eq!(chemistry_name(6), Some("Lithium-ion"));
        assert_eq!(chemistry_name(2), None);
    }

    #[test]
    fn test_discharging_battery() {
        let ps = build_battery(&Win32Battery {
            name: Some("DELL 7FHHV".to_string()),
            device_id: Some("1234SMPDELL 7FHHV".to_string()),
            estimated_charge_remaining: Some(50),
            estimated_run_time: Some(120),
            battery_status: Some(1),
            chemistry: Some(6),
            full_charge_capacity: Some(60_000),
            design_capacity: Some(68_000),
            ..Default::default()
        });
        assert!(ps.discharging);
        assert_eq!(ps.capacity_units, CapacityUnits::MilliWattHours);
        assert_eq!(ps.current_capacity, 30_000);
        assert_eq!(ps.design_capacity, 68_000);
        assert_eq!(ps.remaining_capacity_ratio, 0.5);
        assert_eq!(ps.time_remaining_estimated, 7_200.0);
        assert_eq!(ps.time_remaining_instant, TIME_REMAINING_UNKNOWN);
        assert_eq!(ps.chemistry, "Lithium-ion");
    }

    #[test]
    fn test_on_ac_run_time_sentinel() {
        let runner = CannedCommandRunner::new().with(
            &format!(
                "powershell -NoProfile -NonInteractive -Command {}",
                cim_command("Win32_Battery", BATTERY_PROPERTIES)
            ),
            r#"{"Name":"Primary","EstimatedChargeRemaining":100,"EstimatedRunTime":71582788,"BatteryStatus":10}"#,
        );
        let win = WindowsBackend::with_sources(
            &TelemetryConfig::default(),
            Arc::new(runner),
            Arc::new(FixedCounters::default()),
        );
        let sources = win.query_power_sources();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].power_on_line);
        assert_eq!(sources[0].capacity_units, CapacityUnits::Relative);
        assert_eq!(sources[0].remaining_capacity_ratio, 1.0);
    }
}
