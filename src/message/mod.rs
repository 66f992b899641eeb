//! Modbus RTU framing as spoken over the battery's GATT characteristics.

pub mod registers_message;

use crc16::{State, MODBUS};

pub use registers_message::RegistersMessage;

/// Address of the BMS on its internal Modbus.
pub const SLAVE_ADDRESS: u8 = 0x01;

/// Function code "read holding registers".
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// First register of the telemetry block.
pub const TELEMETRY_START_REGISTER: u16 = 0x0000;

/// Number of registers in the telemetry block.
pub const TELEMETRY_REGISTER_COUNT: u16 = 40;

const MSG_HEADER: [u8; 2] = [SLAVE_ADDRESS, READ_HOLDING_REGISTERS];

/// Build a "read holding registers" request with its CRC appended.
pub fn read_request(start: u16, count: u16) -> [u8; 8] {
    let mut request = [0; 8];
    request[0..2].copy_from_slice(&MSG_HEADER);
    request[2..4].copy_from_slice(&start.to_be_bytes());
    request[4..6].copy_from_slice(&count.to_be_bytes());
    let crc = crc(&request[0..6]);
    request[6..8].copy_from_slice(&crc);
    request
}

/// The request for the whole telemetry block.
pub fn telemetry_request() -> [u8; 8] {
    read_request(TELEMETRY_START_REGISTER, TELEMETRY_REGISTER_COUNT)
}

#[derive(PartialEq, Eq, Debug)]
pub enum TryParseMessageResult {
    Ok(Vec<u8>),
    Incomplete,
    Invalid(&'static str),
}

/// Attempt to parse the given message bytes returning the payload.
///
/// The message format is:
///
/// Start Byte | End Byte     | Meaning
/// 0          | 1            | A constant header with value [0x01, 0x03]
/// 2          | 2            | The length in bytes of the payload
/// 3          | x            | The payload
/// x+1        | x+2          | A MODBUS CRC over the bytes 0-x, little endian
pub fn try_parse_msg(buffer: &[u8]) -> TryParseMessageResult {
    if buffer.len() < 3 {
        return TryParseMessageResult::Incomplete;
    }

    if buffer[0..2] != MSG_HEADER {
        return TryParseMessageResult::Invalid("Unexpected header");
    }

    let expected_len = buffer[2] as usize + 5;
    if buffer.len() < expected_len {
        return TryParseMessageResult::Incomplete;
    }

    if buffer.len() > expected_len {
        return TryParseMessageResult::Invalid("Too long");
    }

    let crc_actual = &buffer[buffer.len() - 2..];
    let crc_expected = crc(&buffer[0..buffer.len() - 2]);
    if crc_actual != crc_expected {
        return TryParseMessageResult::Invalid("CRC check failed");
    }

    TryParseMessageResult::Ok(buffer[3..buffer.len() - 2].to_vec())
}

/// Whether a notification looks like the start of a new response frame.
pub fn starts_frame(chunk: &[u8]) -> bool {
    chunk.starts_with(&MSG_HEADER)
}

/// Compute the CRC check value for the given bytes
pub fn crc(data: &[u8]) -> [u8; 2] {
    State::<MODBUS>::calculate(data).to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_request() {
        let expected = hex::decode("01030000002845d4").unwrap();
        assert_eq!(telemetry_request().to_vec(), expected);
    }

    #[test]
    fn test_read_request_encodes_big_endian_fields() {
        let request = read_request(0x1234, 0x0002);
        assert_eq!(&request[0..6], &[0x01, 0x03, 0x12, 0x34, 0x00, 0x02]);
        assert_eq!(request[6..8], crc(&request[0..6]));
    }

    #[test]
    fn test_try_parse_message_happy() {
        let message =
            hex::decode("010318240c000002a7000000000000000000000000000000000000bc90").unwrap();
        let payload = hex::decode("240c000002a7000000000000000000000000000000000000").unwrap();
        assert_eq!(try_parse_msg(&message), TryParseMessageResult::Ok(payload));
    }

    #[test]
    fn test_try_parse_message_no_length() {
        let message = hex::decode("0103").unwrap();
        assert_eq!(try_parse_msg(&message), TryParseMessageResult::Incomplete);
    }

    #[test]
    fn test_try_parse_message_incomplete() {
        let message = hex::decode("010318240c000002a700000000000000000000000000000000bc").unwrap();
        assert_eq!(try_parse_msg(&message), TryParseMessageResult::Incomplete);
    }

    #[test]
    fn test_try_parse_message_bad_crc() {
        let message =
            hex::decode("010318240c000002a7000000000000000000000000000000000000bc91").unwrap();
        assert_eq!(try_parse_msg(&message), TryParseMessageResult::Invalid("CRC check failed"));
    }

    #[test]
    fn test_try_parse_message_bad_header() {
        let message = hex::decode("0106001122").unwrap();
        assert_eq!(try_parse_msg(&message), TryParseMessageResult::Invalid("Unexpected header"));
    }

    #[test]
    fn test_try_parse_message_trailing_bytes() {
        let message =
            hex::decode("010318240c000002a7000000000000000000000000000000000000bc9000").unwrap();
        assert_eq!(try_parse_msg(&message), TryParseMessageResult::Invalid("Too long"));
    }

    #[test]
    fn test_checksum() {
        let payload = [
            0x01, 0x03, 0x18, 0x24, 0x0c, 0x00, 0x00, 0x02, 0xa7, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        assert_eq!(State::<MODBUS>::calculate(&payload), 0x90bc);
        assert_eq!(crc(&payload), [0xbc, 0x90]);
    }
}
