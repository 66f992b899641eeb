use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Temperatures outside of this range are probe faults.
const PLAUSIBLE_CELSIUS: std::ops::RangeInclusive<i16> = -40..=200;

/// A temperature as reported by the BMS, in whole degrees Celsius.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Celsius(pub i16);

impl Celsius {
    /// Discard readings that cannot come from a working probe.
    pub fn plausible(raw: i16) -> Option<Self> {
        PLAUSIBLE_CELSIUS.contains(&raw).then_some(Self(raw))
    }

    /// The value in the given unit, rounded to one decimal.
    pub fn in_unit(self, unit: TemperatureUnit) -> f64 {
        let celsius = f64::from(self.0);
        match unit {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => ((celsius * 9.0 / 5.0 + 32.0) * 10.0).round() / 10.0,
        }
    }
}

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum TemperatureUnit {
    #[default]
    #[serde(rename = "C")]
    #[value(name = "C", alias = "c")]
    Celsius,

    #[serde(rename = "F")]
    #[value(name = "F", alias = "f")]
    Fahrenheit,
}

impl TemperatureUnit {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Celsius => "°C",
            Self::Fahrenheit => "°F",
        }
    }
}

impl Display for TemperatureUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}
