use crate::prelude::*;

use super::TELEMETRY_REGISTER_COUNT;

const REG_TOTAL_VOLTAGE: usize = 0;
const REG_CURRENT: usize = 1;
const REG_CELL_VOLTAGE: usize = 2;
const REG_TEMPERATURE: usize = 19;
const REG_STATUS: usize = 24;

/// Number of cells in the pack.
pub const CELL_COUNT: usize = 4;

/// Number of cell temperature probes.
pub const CELL_TEMPERATURE_COUNT: usize = 2;

/// Marker which precedes the state of charge somewhere in the payload.
const SOC_MARKER: [u8; 2] = [0x08, 0x98];

/// A message type which contains the telemetry register block.
#[derive(Debug, Clone)]
pub struct RegistersMessage {
    payload: Vec<u8>,
    registers: Vec<u16>,
}

impl RegistersMessage {
    pub fn new(payload: Vec<u8>) -> Result<Self> {
        let expected_len = TELEMETRY_REGISTER_COUNT as usize * 2;
        ensure!(
            payload.len() >= expected_len,
            "telemetry payload too short: {} bytes, expected at least {expected_len}",
            payload.len(),
        );
        let registers: Vec<u16> = payload
            .chunks_exact(2)
            .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
            .collect();
        debug!(?registers, "decoded telemetry registers");
        Ok(Self { payload, registers })
    }

    /// The pack voltage in V/100
    pub fn total_voltage_cv(&self) -> u16 {
        self.registers[REG_TOTAL_VOLTAGE]
    }

    /// The pack current in A/10, positive when charging
    pub fn current_da(&self) -> i16 {
        self.signed(REG_CURRENT)
    }

    /// The voltage of each cell in mV
    pub fn cell_voltage_mv(&self) -> [u16; CELL_COUNT] {
        let mut voltages = [0; CELL_COUNT];
        voltages.copy_from_slice(&self.registers[REG_CELL_VOLTAGE..REG_CELL_VOLTAGE + CELL_COUNT]);
        voltages
    }

    /// The BMS board temperature in °C
    ///
    /// Temperature registers are signed: below freezing they read as e.g. `0xfffb` for −5 °C.
    pub fn pcb_temperature_c(&self) -> i16 {
        self.signed(REG_TEMPERATURE)
    }

    /// The cell probe temperatures in °C
    pub fn cell_temperature_c(&self) -> [i16; CELL_TEMPERATURE_COUNT] {
        [self.signed(REG_TEMPERATURE + 1), self.signed(REG_TEMPERATURE + 2)]
    }

    pub fn status_bits(&self) -> u16 {
        self.registers[REG_STATUS]
    }

    /// The state of charge in %, unclamped.
    ///
    /// The BMS does not keep it at a fixed register: it follows the `08 98` marker,
    /// after another 16-bit word.
    pub fn state_of_charge_pct(&self) -> Option<u16> {
        self.payload
            .windows(6)
            .find(|window| window[0..2] == SOC_MARKER)
            .map(|window| u16::from_be_bytes([window[4], window[5]]))
    }

    fn signed(&self, register: usize) -> i16 {
        self.registers[register] as i16
    }
}
