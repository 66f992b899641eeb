use std::fmt::{Display, Formatter};

use enumset::{EnumSet, EnumSetType};
use itertools::Itertools;

const CHARGING_BIT: u16 = 0x0001;
const DISCHARGING_BIT: u16 = 0x0002;
const BALANCING_BIT: u16 = 0x0004;

/// Current above which the pack is considered to be moving energy, in A.
const ACTIVITY_THRESHOLD_A: f64 = 0.1;

/// A protection the BMS may have engaged, in status bit order starting at `0x0008`.
#[derive(Debug, EnumSetType)]
pub enum Protection {
    CellOverVoltage,
    CellUnderVoltage,
    PackOverVoltage,
    PackUnderVoltage,
    ChargeOverTemperature,
    ChargeUnderTemperature,
    DischargeOverTemperature,
    DischargeUnderTemperature,
    ChargeOverCurrent,
    DischargeOverCurrent,
    ShortCircuit,
    FrontEnd,
}

impl Protection {
    pub const fn mask(self) -> u16 {
        0x0008 << self as u16
    }

    /// The short code the BMS vendor uses for the protection.
    pub const fn code(self) -> &'static str {
        match self {
            Self::CellOverVoltage => "COV",
            Self::CellUnderVoltage => "CUV",
            Self::PackOverVoltage => "POV",
            Self::PackUnderVoltage => "PUV",
            Self::ChargeOverTemperature => "CHG_OT",
            Self::ChargeUnderTemperature => "CHG_UT",
            Self::DischargeOverTemperature => "DSG_OT",
            Self::DischargeUnderTemperature => "DSG_UT",
            Self::ChargeOverCurrent => "CHG_OC",
            Self::DischargeOverCurrent => "DSG_OC",
            Self::ShortCircuit => "SCD",
            Self::FrontEnd => "AFE",
        }
    }

    pub fn from_status_bits(bits: u16) -> EnumSet<Self> {
        EnumSet::<Self>::all().iter().filter(|protection| bits & protection.mask() != 0).collect()
    }
}

/// What the battery is doing, as shown on the `state` entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStatus {
    Charging,
    Discharging,
    Idle,
    Protect(EnumSet<Protection>),
}

impl BatteryStatus {
    /// Classify the status word together with the measured current and state of charge.
    ///
    /// Protection bits are only trusted while the BMS reports neither charging nor
    /// discharging; a full pack with protections engaged reports `protect` even if
    /// current still flows.
    pub fn classify(bits: u16, current_a: f64, state_of_charge_pct: Option<u16>) -> Self {
        let is_charging = bits & CHARGING_BIT != 0;
        let is_discharging = bits & DISCHARGING_BIT != 0;
        let protections = if is_charging || is_discharging {
            EnumSet::empty()
        } else {
            Protection::from_status_bits(bits)
        };

        if state_of_charge_pct == Some(100) && !protections.is_empty() {
            Self::Protect(protections)
        } else if is_charging || current_a > ACTIVITY_THRESHOLD_A {
            Self::Charging
        } else if is_discharging || current_a < -ACTIVITY_THRESHOLD_A {
            Self::Discharging
        } else if !protections.is_empty() {
            Self::Protect(protections)
        } else {
            Self::Idle
        }
    }

    pub const fn is_balancing(bits: u16) -> bool {
        bits & BALANCING_BIT != 0
    }

    /// Comma-separated protection codes, if any protection is engaged.
    pub fn protect_reason(&self) -> Option<String> {
        match self {
            Self::Protect(protections) => Some(protections.iter().map(Protection::code).join(",")),
            _ => None,
        }
    }
}

impl Display for BatteryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Charging => "charging",
            Self::Discharging => "discharging",
            Self::Idle => "idle",
            Self::Protect(_) => "protect",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protection_masks() {
        assert_eq!(Protection::CellOverVoltage.mask(), 0x0008);
        assert_eq!(Protection::ChargeOverTemperature.mask(), 0x0080);
        assert_eq!(Protection::FrontEnd.mask(), 0x4000);
    }

    #[test]
    fn test_protections_from_bits() {
        let protections = Protection::from_status_bits(0x0008 | 0x0200 | 0x8000);
        assert_eq!(
            protections,
            Protection::CellOverVoltage | Protection::DischargeOverTemperature
        );
    }

    #[test]
    fn test_charging_bit_wins() {
        assert_eq!(BatteryStatus::classify(0x0001, 0.0, Some(50)), BatteryStatus::Charging);
    }

    #[test]
    fn test_current_direction_without_bits() {
        assert_eq!(BatteryStatus::classify(0, 3.2, None), BatteryStatus::Charging);
        assert_eq!(BatteryStatus::classify(0, -3.2, None), BatteryStatus::Discharging);
        assert_eq!(BatteryStatus::classify(0, 0.05, None), BatteryStatus::Idle);
    }

    #[test]
    fn test_protect_ignored_while_discharging() {
        let status = BatteryStatus::classify(0x0002 | 0x0010, -5.0, Some(20));
        assert_eq!(status, BatteryStatus::Discharging);
        assert_eq!(status.protect_reason(), None);
    }

    #[test]
    fn test_full_pack_protect_beats_current() {
        let status = BatteryStatus::classify(0x0008 | 0x0020, 0.5, Some(100));
        assert_eq!(status.to_string(), "protect");
        assert_eq!(status.protect_reason().as_deref(), Some("COV,POV"));
    }

    #[test]
    fn test_protect_when_quiet() {
        let status = BatteryStatus::classify(0x0800, 0.0, Some(60));
        assert_eq!(status, BatteryStatus::Protect(Protection::ChargeOverCurrent.into()));
    }

    #[test]
    fn test_current_beats_protect_below_full() {
        assert_eq!(BatteryStatus::classify(0x0800, 2.0, Some(60)), BatteryStatus::Charging);
    }

    #[test]
    fn test_balancing() {
        assert!(BatteryStatus::is_balancing(0x0005));
        assert!(!BatteryStatus::is_balancing(0x0003));
    }
}
