use chrono::{DateTime, Local};

use crate::{
    message::registers_message::{RegistersMessage, CELL_COUNT, CELL_TEMPERATURE_COUNT},
    quantity::Kilowatts,
    status::BatteryStatus,
    temperature::Celsius,
};

/// The reported state of the battery
#[derive(Debug, Clone)]
pub struct BatteryState {
    /// When the frame was received
    pub measured_at: DateTime<Local>,
    /// The pack voltage in V
    pub total_voltage_v: f64,
    /// The pack current in A, positive while charging
    pub current_a: f64,
    /// The voltage of each cell in V
    pub cell_voltage_v: [f64; CELL_COUNT],
    pub pcb_temperature: Option<Celsius>,
    pub cell_temperature: [Option<Celsius>; CELL_TEMPERATURE_COUNT],
    /// The state of charge in %, if the BMS reported one
    pub state_of_charge_pct: Option<u16>,
    pub status: BatteryStatus,
    pub is_balancing: bool,
    /// The raw status bit field
    pub status_bits: u16,
}

impl BatteryState {
    pub fn from_message(message: &RegistersMessage, measured_at: DateTime<Local>) -> Self {
        let current_a = f64::from(message.current_da()) / 10.0;
        let state_of_charge_pct = message.state_of_charge_pct().map(|soc| soc.min(100));
        let status_bits = message.status_bits();
        Self {
            measured_at,
            total_voltage_v: f64::from(message.total_voltage_cv()) / 100.0,
            current_a,
            cell_voltage_v: message.cell_voltage_mv().map(|mv| f64::from(mv) / 1000.0),
            pcb_temperature: Celsius::plausible(message.pcb_temperature_c()),
            cell_temperature: message.cell_temperature_c().map(Celsius::plausible),
            state_of_charge_pct,
            status: BatteryStatus::classify(status_bits, current_a, state_of_charge_pct),
            is_balancing: BatteryStatus::is_balancing(status_bits),
            status_bits,
        }
    }

    /// Power flowing into the pack, negative while discharging.
    pub fn power(&self) -> Kilowatts {
        Kilowatts::from_volt_amperes(self.total_voltage_v, self.current_a)
    }

    pub fn cell_voltage_min_v(&self) -> f64 {
        self.cell_voltage_v.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn cell_voltage_max_v(&self) -> f64 {
        self.cell_voltage_v.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Spread between the highest and the lowest cell, rounded to millivolts.
    pub fn cell_voltage_diff_v(&self) -> f64 {
        ((self.cell_voltage_max_v() - self.cell_voltage_min_v()) * 1000.0).round() / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    use super::*;
    use crate::{
        message::registers_message::tests::discharging_message,
        status::Protection,
    };

    fn discharging_state() -> BatteryState {
        let measured_at = Local.timestamp_opt(1_760_000_000, 0).unwrap();
        BatteryState::from_message(&discharging_message(), measured_at)
    }

    #[test]
    fn test_scaling() {
        let state = discharging_state();
        assert_abs_diff_eq!(state.total_voltage_v, 53.12);
        assert_abs_diff_eq!(state.current_a, -12.5);
        assert_abs_diff_eq!(state.cell_voltage_v[0], 3.320);
        assert_abs_diff_eq!(state.cell_voltage_v[3], 3.323);
        assert_eq!(state.state_of_charge_pct, Some(87));
        assert_eq!(state.pcb_temperature, Some(Celsius(25)));
        assert_eq!(state.cell_temperature, [Some(Celsius(24)), Some(Celsius(-5))]);
    }

    #[test]
    fn test_derived_values() {
        let state = discharging_state();
        assert_abs_diff_eq!(state.cell_voltage_min_v(), 3.318);
        assert_abs_diff_eq!(state.cell_voltage_max_v(), 3.323);
        assert_abs_diff_eq!(state.cell_voltage_diff_v(), 0.005);
        assert_abs_diff_eq!(state.power().watts(), -664.0, epsilon = 1e-9);
    }

    #[test]
    fn test_status() {
        let state = discharging_state();
        assert_eq!(state.status, BatteryStatus::Discharging);
        assert!(!state.is_balancing);
        assert_eq!(state.status_bits, 0x0002);
    }

    /// A quiet, full pack: state of charge reported as 150 % and cell over-voltage engaged.
    fn overfull_state() -> BatteryState {
        let mut payload = vec![0; 80];
        payload[16..22].copy_from_slice(&[0x08, 0x98, 0x00, 0x64, 0x00, 0x96]);
        payload[48..50].copy_from_slice(&0x0008_u16.to_be_bytes());
        let message = RegistersMessage::new(payload).unwrap();
        BatteryState::from_message(&message, Local.timestamp_opt(1_760_000_000, 0).unwrap())
    }

    #[test]
    fn test_state_of_charge_is_clamped() {
        assert_eq!(overfull_state().state_of_charge_pct, Some(100));
    }

    #[test]
    fn test_full_pack_protection() {
        let state = overfull_state();
        assert_eq!(state.status, BatteryStatus::Protect(Protection::CellOverVoltage.into()));
        assert_eq!(state.status.protect_reason().as_deref(), Some("COV"));
    }
}
