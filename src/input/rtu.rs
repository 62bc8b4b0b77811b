//! Modbus RTU framing for function 0x02 (Read Discrete Inputs)
//!
//! Only the subset needed to read one byte of discrete inputs is
//! implemented. The codec is pure so it can be tested without a port.

use super::traits::{RawInputFrame, TransportError, FRAME_WIDTH};

pub const FN_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Request is unit, fn, addr hi/lo, qty hi/lo, crc lo/hi
pub const REQUEST_LEN: usize = 8;

/// Response for up to 8 inputs is unit, fn, byte count, data, crc lo/hi
pub const RESPONSE_LEN: usize = 6;

/// Exception responses are unit, fn|0x80, code, crc lo/hi
pub const EXCEPTION_LEN: usize = 5;

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Build a read-discrete-inputs request for `FRAME_WIDTH` inputs at `start`
pub fn encode_read_request(unit_id: u8, start: u16) -> [u8; REQUEST_LEN] {
    let qty = FRAME_WIDTH as u16;
    let mut frame = [
        unit_id,
        FN_READ_DISCRETE_INPUTS,
        (start >> 8) as u8,
        start as u8,
        (qty >> 8) as u8,
        qty as u8,
        0,
        0,
    ];
    let crc = crc16(&frame[..6]);
    frame[6] = crc as u8;
    frame[7] = (crc >> 8) as u8;
    frame
}

fn check_crc(frame: &[u8]) -> Result<(), TransportError> {
    let (body, tail) = frame.split_at(frame.len() - 2);
    let expected = crc16(body);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    if expected != received {
        return Err(TransportError::Protocol(format!(
            "crc mismatch: expected {:#06x}, got {:#06x}",
            expected, received
        )));
    }
    Ok(())
}

/// Decode a response to [`encode_read_request`].
pub fn decode_read_response(unit_id: u8, frame: &[u8]) -> Result<RawInputFrame, TransportError> {
    if frame.len() == EXCEPTION_LEN && frame.get(1) == Some(&(FN_READ_DISCRETE_INPUTS | 0x80)) {
        check_crc(frame)?;
        return Err(TransportError::Protocol(format!(
            "device exception code {:#04x}",
            frame[2]
        )));
    }

    if frame.len() != RESPONSE_LEN {
        return Err(TransportError::Protocol(format!(
            "unexpected response length {}",
            frame.len()
        )));
    }
    check_crc(frame)?;

    if frame[0] != unit_id {
        return Err(TransportError::Protocol(format!(
            "response from unit {} (expected {})",
            frame[0], unit_id
        )));
    }
    if frame[1] != FN_READ_DISCRETE_INPUTS {
        return Err(TransportError::Protocol(format!(
            "unexpected function code {:#04x}",
            frame[1]
        )));
    }
    if frame[2] != 1 {
        return Err(TransportError::Protocol(format!(
            "unexpected byte count {}",
            frame[2]
        )));
    }

    Ok(RawInputFrame::from_byte(frame[3]))
}
