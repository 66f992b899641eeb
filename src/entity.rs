//! Home Assistant sensor entities derived from a [`Snapshot`].

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    config::DeviceConfig,
    coordinator::Snapshot,
    message::registers_message::{CELL_COUNT, CELL_TEMPERATURE_COUNT},
    temperature::{Celsius, TemperatureUnit},
};

pub const MANUFACTURER: &str = "EG4";
pub const MODEL: &str = "LiFePO4 Battery";

const UNKNOWN: &str = "unknown";
const UNAVAILABLE: &str = "unavailable";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Battery,
    Current,
    Energy,
    EnergyStorage,
    Power,
    Temperature,
    Voltage,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    TotalIncreasing,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sensor {
    TotalVoltage,
    Current,
    BatteryPercent,
    State,
    PcbTemperature,
    /// Zero-based probe index.
    CellTemperature(usize),
    /// Zero-based cell index.
    CellVoltage(usize),
    CellVoltageMin,
    CellVoltageMax,
    CellVoltageDiff,
    Power,
    StoredEnergy,
    EnergyCharged,
    EnergyDischarged,
}

impl Sensor {
    pub fn all() -> Vec<Self> {
        let mut sensors = vec![
            Self::TotalVoltage,
            Self::Current,
            Self::BatteryPercent,
            Self::State,
            Self::PcbTemperature,
        ];
        sensors.extend((0..CELL_TEMPERATURE_COUNT).map(Self::CellTemperature));
        sensors.extend((0..CELL_COUNT).map(Self::CellVoltage));
        sensors.extend([
            Self::CellVoltageMin,
            Self::CellVoltageMax,
            Self::CellVoltageDiff,
            Self::Power,
            Self::StoredEnergy,
            Self::EnergyCharged,
            Self::EnergyDischarged,
        ]);
        sensors
    }

    pub fn key(self) -> String {
        match self {
            Self::TotalVoltage => "total_voltage".to_owned(),
            Self::Current => "current".to_owned(),
            Self::BatteryPercent => "battery_pct".to_owned(),
            Self::State => "state".to_owned(),
            Self::PcbTemperature => "pcb_temp".to_owned(),
            Self::CellTemperature(index) => format!("cell_temp_{}", index + 1),
            Self::CellVoltage(index) => format!("cell_{}_voltage", index + 1),
            Self::CellVoltageMin => "cell_voltage_min".to_owned(),
            Self::CellVoltageMax => "cell_voltage_max".to_owned(),
            Self::CellVoltageDiff => "cell_voltage_diff".to_owned(),
            Self::Power => "power".to_owned(),
            Self::StoredEnergy => "stored_energy".to_owned(),
            Self::EnergyCharged => "energy_charged".to_owned(),
            Self::EnergyDischarged => "energy_discharged".to_owned(),
        }
    }

    pub fn name(self) -> String {
        match self {
            Self::TotalVoltage => "Total Voltage".to_owned(),
            Self::Current => "Current".to_owned(),
            Self::BatteryPercent => "Battery".to_owned(),
            Self::State => "State".to_owned(),
            Self::PcbTemperature => "PCB Temperature".to_owned(),
            Self::CellTemperature(index) => format!("Cell Temperature {}", index + 1),
            Self::CellVoltage(index) => format!("Cell {} Voltage", index + 1),
            Self::CellVoltageMin => "Cell Voltage Min".to_owned(),
            Self::CellVoltageMax => "Cell Voltage Max".to_owned(),
            Self::CellVoltageDiff => "Cell Voltage Difference".to_owned(),
            Self::Power => "Power".to_owned(),
            Self::StoredEnergy => "Stored Energy".to_owned(),
            Self::EnergyCharged => "Energy Charged".to_owned(),
            Self::EnergyDischarged => "Energy Discharged".to_owned(),
        }
    }

    pub const fn unit(self, temperature_unit: TemperatureUnit) -> Option<&'static str> {
        match self {
            Self::TotalVoltage
            | Self::CellVoltage(_)
            | Self::CellVoltageMin
            | Self::CellVoltageMax
            | Self::CellVoltageDiff => Some("V"),
            Self::Current => Some("A"),
            Self::BatteryPercent => Some("%"),
            Self::State => None,
            Self::PcbTemperature | Self::CellTemperature(_) => Some(temperature_unit.symbol()),
            Self::Power => Some("W"),
            Self::StoredEnergy | Self::EnergyCharged | Self::EnergyDischarged => Some("kWh"),
        }
    }

    pub const fn device_class(self) -> Option<DeviceClass> {
        match self {
            Self::TotalVoltage
            | Self::CellVoltage(_)
            | Self::CellVoltageMin
            | Self::CellVoltageMax
            | Self::CellVoltageDiff => Some(DeviceClass::Voltage),
            Self::Current => Some(DeviceClass::Current),
            Self::BatteryPercent => Some(DeviceClass::Battery),
            Self::State => None,
            Self::PcbTemperature | Self::CellTemperature(_) => Some(DeviceClass::Temperature),
            Self::Power => Some(DeviceClass::Power),
            Self::StoredEnergy => Some(DeviceClass::EnergyStorage),
            Self::EnergyCharged | Self::EnergyDischarged => Some(DeviceClass::Energy),
        }
    }

    /// Counters are `total_increasing`, everything else with a device class is a measurement.
    pub const fn state_class(self) -> Option<StateClass> {
        match self {
            Self::EnergyCharged | Self::EnergyDischarged => Some(StateClass::TotalIncreasing),
            Self::State => None,
            _ => Some(StateClass::Measurement),
        }
    }

    /// The state as Home Assistant expects it, `None` when the value is unknown.
    pub fn state(self, snapshot: &Snapshot, temperature_unit: TemperatureUnit) -> Option<String> {
        let battery = &snapshot.battery;
        let temperature =
            |celsius: Option<Celsius>| celsius.map(|celsius| celsius.in_unit(temperature_unit));
        let number = match self {
            Self::TotalVoltage => Some(battery.total_voltage_v),
            Self::Current => Some(battery.current_a),
            Self::BatteryPercent => battery.state_of_charge_pct.map(f64::from),
            Self::State => return Some(battery.status.to_string()),
            Self::PcbTemperature => temperature(battery.pcb_temperature),
            Self::CellTemperature(index) => temperature(battery.cell_temperature[index]),
            Self::CellVoltage(index) => Some(battery.cell_voltage_v[index]),
            Self::CellVoltageMin => Some(battery.cell_voltage_min_v()),
            Self::CellVoltageMax => Some(battery.cell_voltage_max_v()),
            Self::CellVoltageDiff => Some(battery.cell_voltage_diff_v()),
            Self::Power => Some(round(battery.power().watts(), 1)),
            Self::StoredEnergy => snapshot.energy.stored.map(|stored| round(stored.0, 3)),
            Self::EnergyCharged => Some(round(snapshot.energy.charged.0, 3)),
            Self::EnergyDischarged => Some(round(snapshot.energy.discharged.0, 3)),
        };
        number.map(|number| number.to_string())
    }

    /// Additional, snapshot-dependent attributes.
    fn extra_attributes(self, snapshot: &Snapshot) -> Map<String, Value> {
        let mut attributes = Map::new();
        if self == Self::State {
            let battery = &snapshot.battery;
            if let Some(reason) = battery.status.protect_reason() {
                attributes.insert("protect_reason".to_owned(), reason.into());
            }
            attributes.insert("balancing".to_owned(), battery.is_balancing.into());
            attributes.insert("status_bits".to_owned(), battery.status_bits.into());
        }
        attributes
    }
}

fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// A state update for a single entity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityState {
    #[serde(skip)]
    pub entity_id: String,

    pub state: String,

    pub attributes: Map<String, Value>,
}

/// Lowercase ASCII with runs of anything else collapsed into a single underscore.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').to_owned()
}

pub fn entity_id(config: &DeviceConfig, sensor: Sensor) -> String {
    format!("sensor.eg4_battery_{}_{}", slugify(&config.name), sensor.key())
}

fn base_attributes(config: &DeviceConfig, sensor: Sensor) -> Map<String, Value> {
    let mut attributes = Map::new();
    attributes
        .insert("friendly_name".to_owned(), format!("{} {}", config.name, sensor.name()).into());
    if let Some(unit) = sensor.unit(config.temperature_unit) {
        attributes.insert("unit_of_measurement".to_owned(), unit.into());
    }
    if let Some(device_class) = sensor.device_class() {
        attributes.insert("device_class".to_owned(), serde_json::json!(device_class));
    }
    if let Some(state_class) = sensor.state_class() {
        attributes.insert("state_class".to_owned(), serde_json::json!(state_class));
    }
    attributes.insert("manufacturer".to_owned(), MANUFACTURER.into());
    attributes.insert("model".to_owned(), MODEL.into());
    if let Some(ble_name) = &config.ble_name {
        attributes.insert("ble_name".to_owned(), ble_name.clone().into());
    }
    attributes
}

/// States of every sensor for a successful refresh.
pub fn render(config: &DeviceConfig, snapshot: &Snapshot) -> Vec<EntityState> {
    Sensor::all()
        .into_iter()
        .map(|sensor| {
            let mut attributes = base_attributes(config, sensor);
            attributes.extend(sensor.extra_attributes(snapshot));
            EntityState {
                entity_id: entity_id(config, sensor),
                state: sensor
                    .state(snapshot, config.temperature_unit)
                    .unwrap_or_else(|| UNKNOWN.to_owned()),
                attributes,
            }
        })
        .collect()
}

/// States of every sensor when the battery could not be reached.
pub fn unavailable(config: &DeviceConfig) -> Vec<EntityState> {
    Sensor::all()
        .into_iter()
        .map(|sensor| EntityState {
            entity_id: entity_id(config, sensor),
            state: UNAVAILABLE.to_owned(),
            attributes: base_attributes(config, sensor),
        })
        .collect()
}
