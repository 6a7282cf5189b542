//! Power source assembly shared by every platform.
//!
//! Platforms provide one [`BatteryStatic`] (fields that do not change while
//! the battery is installed) and a list of live [`BatteryReading`]s. Each
//! present reading is merged with the static fields into a [`PowerSource`].

use chrono::NaiveDate;
use hwsight_common::model::{
    CapacityUnits, ChargeState, PowerSource, TIME_REMAINING_UNKNOWN, TIME_REMAINING_UNLIMITED,
    UNKNOWN,
};
use tracing::trace;

use crate::units::ratio;

/// Fields read once per collection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatteryStatic {
    pub device_name: Option<String>,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub chemistry: Option<String>,
    pub design_capacity: Option<u32>,
    pub manufacture_date: Option<NaiveDate>,
    pub cycle_count: Option<i32>,
}

/// Live values of one power source.
///
/// Relative units carry a percentage as `current_capacity` over a
/// `max_capacity` of 100.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryReading {
    pub name: String,
    pub present: bool,
    pub capacity_units: CapacityUnits,
    pub current_capacity: u32,
    pub max_capacity: u32,
    /// Volts.
    pub voltage: Option<f64>,
    /// Milliamps, negative while discharging.
    pub amperage: Option<f64>,
    /// Milliwatts, negative while discharging.
    pub power_usage_rate: Option<f64>,
    pub state: ChargeState,
    pub power_on_line: bool,
    /// Platform estimate of seconds to empty.
    pub time_to_empty_secs: Option<f64>,
    /// Degrees Celsius.
    pub temperature: Option<f64>,
}

impl Default for BatteryReading {
    fn default() -> Self {
        Self {
            name: UNKNOWN.to_string(),
            present: true,
            capacity_units: CapacityUnits::Relative,
            current_capacity: 0,
            max_capacity: 100,
            voltage: None,
            amperage: None,
            power_usage_rate: None,
            state: ChargeState::Idle,
            power_on_line: false,
            time_to_empty_secs: None,
            temperature: None,
        }
    }
}

/// Merge the static fields into every present reading.
pub fn build_power_sources(
    static_info: &BatteryStatic,
    readings: Vec<BatteryReading>,
) -> Vec<PowerSource> {
    readings
        .into_iter()
        .filter(|r| {
            if !r.present {
                trace!("Skipping power source {} (not present)", r.name);
            }
            r.present
        })
        .map(|r| build_power_source(static_info, r))
        .collect()
}

/// Build one power source from its static and live fields.
pub fn build_power_source(static_info: &BatteryStatic, reading: BatteryReading) -> PowerSource {
    let discharging = reading.state == ChargeState::Discharging;
    let sign = if discharging { -1.0 } else { 1.0 };

    let amperage = reading.amperage.map(|a| sign * a.abs());
    let power_usage_rate = reading
        .power_usage_rate
        .map(|p| sign * p.abs())
        .or_else(|| Some(reading.voltage? * amperage?));

    let time_remaining_instant = if discharging {
        let drain = match reading.capacity_units {
            CapacityUnits::MilliWattHours => power_usage_rate,
            CapacityUnits::MilliAmpHours => amperage,
            CapacityUnits::Relative => None,
        };
        match drain {
            Some(d) if d < 0.0 => f64::from(reading.current_capacity) / -d * 3600.0,
            _ => TIME_REMAINING_UNKNOWN,
        }
    } else if reading.power_on_line {
        TIME_REMAINING_UNLIMITED
    } else {
        TIME_REMAINING_UNKNOWN
    };

    let time_remaining_estimated = match reading.time_to_empty_secs {
        Some(secs) if discharging && secs >= 0.0 => secs,
        _ => time_remaining_instant,
    };

    let or_unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| UNKNOWN.to_string());

    let mut ps = PowerSource {
        name: reading.name,
        device_name: or_unknown(&static_info.device_name),
        remaining_capacity_ratio: ratio(
            f64::from(reading.current_capacity),
            f64::from(reading.max_capacity),
        ),
        time_remaining_estimated,
        time_remaining_instant,
        power_usage_rate: power_usage_rate.unwrap_or(0.0),
        voltage: reading.voltage.unwrap_or(-1.0),
        amperage: amperage.unwrap_or(0.0),
        power_on_line: reading.power_on_line,
        capacity_units: reading.capacity_units,
        current_capacity: reading.current_capacity,
        max_capacity: reading.max_capacity,
        design_capacity: static_info.design_capacity.unwrap_or(reading.max_capacity),
        cycle_count: static_info.cycle_count.unwrap_or(-1),
        chemistry: or_unknown(&static_info.chemistry),
        manufacture_date: static_info.manufacture_date,
        manufacturer: or_unknown(&static_info.manufacturer),
        serial_number: or_unknown(&static_info.serial_number),
        temperature: reading.temperature.unwrap_or(0.0),
        ..PowerSource::default()
    };
    ps.set_charge_state(reading.state);
    ps
}
