use std::{path::PathBuf, time::Duration};

use chrono::TimeDelta;

use crate::{
    entity::slugify,
    prelude::*,
    quantity::KilowattHours,
    temperature::TemperatureUnit,
};

pub const DEFAULT_CAPACITY: KilowattHours = KilowattHours(5.12);
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_MAX_INTEGRATION_GAP: Duration = Duration::from_secs(5 * 60);

/// Everything the coordinator needs to know about one battery.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Name shown in Home Assistant and used for entity ids.
    pub name: String,

    /// Advertised BLE name, if it differs from [`DeviceConfig::name`].
    pub ble_name: Option<String>,

    /// Usable capacity of the pack.
    pub capacity: KilowattHours,

    pub temperature_unit: TemperatureUnit,
    pub polling_interval: Duration,

    /// Connection attempts per refresh.
    pub attempts: u32,

    /// Intervals longer than this are not integrated into the energy counters.
    pub max_integration_gap: Duration,

    /// Where the energy counters are persisted.
    pub state_file: PathBuf,
}

impl DeviceConfig {
    pub fn validate(self) -> Result<Self> {
        ensure!(
            self.capacity.0.is_finite() && self.capacity.0 > 0.0,
            "battery capacity must be positive, got {}",
            self.capacity,
        );
        ensure!(self.attempts > 0, "at least one connection attempt is required");
        ensure!(!self.polling_interval.is_zero(), "polling interval must be positive");
        ensure!(
            !slugify(&self.name).is_empty(),
            "device name `{}` must contain a letter or a digit",
            self.name,
        );
        Ok(self)
    }

    pub fn max_integration_gap(&self) -> Result<TimeDelta> {
        TimeDelta::from_std(self.max_integration_gap).context("integration gap is out of range")
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "EG4 Battery".to_owned(),
            ble_name: None,
            capacity: DEFAULT_CAPACITY,
            temperature_unit: TemperatureUnit::default(),
            polling_interval: DEFAULT_POLLING_INTERVAL,
            attempts: DEFAULT_ATTEMPTS,
            max_integration_gap: DEFAULT_MAX_INTEGRATION_GAP,
            state_file: PathBuf::from("eg4-battery.toml"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = DeviceConfig::default().validate().unwrap();
        assert_eq!(config.capacity, KilowattHours(5.12));
        assert_eq!(config.polling_interval, Duration::from_secs(15));
        assert_eq!(config.attempts, 3);
    }

    #[test]
    fn test_capacity_must_be_positive() {
        for capacity in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = DeviceConfig { capacity: KilowattHours(capacity), ..Default::default() };
            assert!(config.validate().is_err(), "{capacity} must be rejected");
        }
    }

    #[test]
    fn test_attempts_must_be_positive() {
        let config = DeviceConfig { attempts: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_name_must_have_a_slug() {
        for name in ["", "   ", "###", "ü"] {
            let config = DeviceConfig { name: name.to_owned(), ..Default::default() };
            assert!(config.validate().is_err(), "`{name}` must be rejected");
        }
        let config = DeviceConfig { name: "Rack #1".to_owned(), ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_integration_gap() -> Result {
        assert_eq!(DeviceConfig::default().max_integration_gap()?, TimeDelta::minutes(5));
        Ok(())
    }
}
