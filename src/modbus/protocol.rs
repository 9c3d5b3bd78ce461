//! Modbus RTU frame codec.
//!
//! A frame on the wire is `address(1) + function(1) + payload(n) + crc(2)`, the CRC
//! being appended low byte first. Everything in here is pure: nothing touches the
//! transport.

use bytes::BufMut;
use std::fmt;

use super::crc::{append_crc, crc16_modbus};
use crate::utils::error::FrameError;

/// High bit of the function code in an exception reply.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Write-single-coil value for ON.
pub const COIL_ON: u16 = 0xFF00;
/// Write-single-coil value for OFF.
pub const COIL_OFF: u16 = 0x0000;

/// Slave address that every board on the bus accepts without replying.
pub const BROADCAST_ADDRESS: u8 = 0;

// address + function + crc
const MIN_FRAME_LEN: usize = 4;
/// Address, function, exception code and CRC.
pub const EXCEPTION_FRAME_LEN: usize = 5;

/// Largest quantities a single request may carry.
pub const MAX_READ_COILS: u16 = 2000;
pub const MAX_WRITE_COILS: u16 = 1968;
pub const MAX_READ_REGISTERS: u16 = 125;

// address + function + 4 byte echo + crc
const WRITE_ACK_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadHoldingRegisters = 0x03,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} ({:#04x})", name, self.code())
    }
}

/// A request as it will be transmitted, minus the CRC which is derived from the
/// other fields on serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub slave_address: u8,
    pub function: FunctionCode,
    pub payload: Vec<u8>,
}

impl RequestFrame {
    pub fn new(slave_address: u8, function: FunctionCode, payload: Vec<u8>) -> Self {
        Self {
            slave_address,
            function,
            payload,
        }
    }

    /// Channels are 1-based; coil offsets on the wire are 0-based.
    pub fn read_coils(slave_address: u8, start_channel: u16, count: u16) -> Self {
        let mut payload = Vec::with_capacity(4);
        payload.put_u16(start_channel.saturating_sub(1));
        payload.put_u16(count);
        Self::new(slave_address, FunctionCode::ReadCoils, payload)
    }

    pub fn read_holding_registers(slave_address: u8, start_register: u16, count: u16) -> Self {
        let mut payload = Vec::with_capacity(4);
        payload.put_u16(start_register);
        payload.put_u16(count);
        Self::new(slave_address, FunctionCode::ReadHoldingRegisters, payload)
    }

    pub fn write_single_coil(slave_address: u8, channel: u16, state: bool) -> Self {
        let mut payload = Vec::with_capacity(4);
        payload.put_u16(channel.saturating_sub(1));
        payload.put_u16(if state { COIL_ON } else { COIL_OFF });
        Self::new(slave_address, FunctionCode::WriteSingleCoil, payload)
    }

    pub fn write_single_register(slave_address: u8, register: u16, value: u16) -> Self {
        let mut payload = Vec::with_capacity(4);
        payload.put_u16(register);
        payload.put_u16(value);
        Self::new(slave_address, FunctionCode::WriteSingleRegister, payload)
    }

    pub fn write_multiple_coils(slave_address: u8, start_channel: u16, states: &[bool]) -> Self {
        let packed = pack_bits(states);
        let mut payload = Vec::with_capacity(5 + packed.len());
        payload.put_u16(start_channel.saturating_sub(1));
        payload.put_u16(states.len() as u16);
        payload.put_u8(packed.len() as u8);
        payload.put_slice(&packed);
        Self::new(slave_address, FunctionCode::WriteMultipleCoils, payload)
    }

    pub fn write_multiple_registers(slave_address: u8, start_register: u16, values: &[u16]) -> Self {
        let mut payload = Vec::with_capacity(5 + values.len() * 2);
        payload.put_u16(start_register);
        payload.put_u16(values.len() as u16);
        payload.put_u8((values.len() * 2) as u8);
        for value in values {
            payload.put_u16(*value);
        }
        Self::new(slave_address, FunctionCode::WriteMultipleRegisters, payload)
    }

    /// CRC over address, function and payload exactly as transmitted.
    pub fn crc(&self) -> u16 {
        crc16_modbus(&self.header_and_payload())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header_and_payload();
        append_crc(&mut bytes);
        bytes
    }

    pub fn is_broadcast(&self) -> bool {
        self.slave_address == BROADCAST_ADDRESS
    }

    /// Quantity field of read and multi-write requests.
    pub fn quantity(&self) -> u16 {
        match self.payload.get(2..4) {
            Some(&[hi, lo]) => u16::from_be_bytes([hi, lo]),
            _ => 0,
        }
    }

    /// Length of a complete, non-exception reply to this request.
    pub fn expected_response_len(&self) -> usize {
        let quantity = self.quantity() as usize;
        match self.function {
            FunctionCode::ReadCoils => EXCEPTION_FRAME_LEN + quantity.div_ceil(8),
            FunctionCode::ReadHoldingRegisters => EXCEPTION_FRAME_LEN + quantity * 2,
            _ => WRITE_ACK_LEN,
        }
    }

    fn header_and_payload(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + self.payload.len() + 2);
        bytes.put_u8(self.slave_address);
        bytes.put_u8(self.function.code());
        bytes.put_slice(&self.payload);
        bytes
    }
}

pub fn encode_read_coils(slave_address: u8, start_channel: u16, count: u16) -> Vec<u8> {
    RequestFrame::read_coils(slave_address, start_channel, count).to_bytes()
}

pub fn encode_read_holding_registers(slave_address: u8, start_register: u16, count: u16) -> Vec<u8> {
    RequestFrame::read_holding_registers(slave_address, start_register, count).to_bytes()
}

pub fn encode_write_single_coil(slave_address: u8, channel: u16, state: bool) -> Vec<u8> {
    RequestFrame::write_single_coil(slave_address, channel, state).to_bytes()
}

pub fn encode_write_single_register(slave_address: u8, register: u16, value: u16) -> Vec<u8> {
    RequestFrame::write_single_register(slave_address, register, value).to_bytes()
}

pub fn encode_write_multiple_coils(slave_address: u8, start_channel: u16, states: &[bool]) -> Vec<u8> {
    RequestFrame::write_multiple_coils(slave_address, start_channel, states).to_bytes()
}

pub fn encode_write_multi_register(slave_address: u8, start_register: u16, values: &[u16]) -> Vec<u8> {
    RequestFrame::write_multiple_registers(slave_address, start_register, values).to_bytes()
}

/// A reply split into its fields. Only the CRC has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub slave_address: u8,
    pub function: u8,
    pub payload: Vec<u8>,
    pub crc: u16,
}

impl ResponseFrame {
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        let (slave_address, function, payload, crc) = split_frame(raw)?;
        Ok(Self {
            slave_address,
            function,
            payload: payload.to_vec(),
            crc,
        })
    }

    pub fn is_exception(&self) -> bool {
        self.function & EXCEPTION_FLAG != 0
    }
}

fn split_frame(raw: &[u8]) -> Result<(u8, u8, &[u8], u16), FrameError> {
    if raw.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort(raw.len()));
    }

    let data_len = raw.len() - 2;
    let received = u16::from_le_bytes([raw[data_len], raw[data_len + 1]]);
    let expected = crc16_modbus(&raw[..data_len]);
    if received != expected {
        return Err(FrameError::CrcMismatch { expected, received });
    }

    Ok((raw[0], raw[1], &raw[2..data_len], received))
}

/// Validates a raw reply and returns its payload.
///
/// Checks run in wire order of trust: CRC first, then the echoed slave address,
/// then the function code (an exception reply surfaces its code).
pub fn decode_response(
    raw: &[u8],
    expected_address: u8,
    expected_function: FunctionCode,
) -> Result<&[u8], FrameError> {
    let (address, function, payload, _) = split_frame(raw)?;

    if address != expected_address {
        return Err(FrameError::AddressMismatch {
            expected: expected_address,
            received: address,
        });
    }

    if function == expected_function.code() | EXCEPTION_FLAG {
        return match payload.first() {
            Some(&code) => Err(FrameError::Exception(code)),
            None => Err(FrameError::TooShort(raw.len())),
        };
    }

    if function != expected_function.code() {
        return Err(FrameError::FunctionMismatch {
            expected: expected_function.code(),
            received: function,
        });
    }

    Ok(payload)
}

/// Checks that a write acknowledgement echoes what was written.
///
/// Single writes echo the full request payload, multiple writes echo the start
/// address and quantity only.
pub fn check_echo(request: &RequestFrame, payload: &[u8]) -> Result<(), FrameError> {
    let expected = match request.function {
        FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => &request.payload[..],
        FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
            request.payload.get(..4).unwrap_or(&request.payload[..])
        }
        FunctionCode::ReadCoils | FunctionCode::ReadHoldingRegisters => return Ok(()),
    };

    if payload == expected {
        Ok(())
    } else {
        Err(FrameError::EchoMismatch)
    }
}

/// Packs states LSB-first, eight per byte.
pub fn pack_bits(states: &[bool]) -> Vec<u8> {
    let mut packed = vec![0u8; states.len().div_ceil(8)];
    for (i, &state) in states.iter().enumerate() {
        if state {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    packed
}

/// Decodes a byte-count prefixed read-coils payload into `count` states.
pub fn decode_bits(payload: &[u8], count: u16) -> Result<Vec<bool>, FrameError> {
    let expected_bytes = (count as usize).div_ceil(8);
    let (byte_count, data) = payload
        .split_first()
        .ok_or_else(|| FrameError::InvalidPayload("missing byte count".to_string()))?;

    if *byte_count as usize != expected_bytes || data.len() != expected_bytes {
        return Err(FrameError::InvalidPayload(format!(
            "expected {} data bytes for {} coils, got byte count {} and {} bytes",
            expected_bytes,
            count,
            byte_count,
            data.len()
        )));
    }

    Ok((0..count as usize)
        .map(|i| data[i / 8] & (1 << (i % 8)) != 0)
        .collect())
}

/// Decodes a byte-count prefixed read-registers payload into `count` words.
pub fn decode_registers(payload: &[u8], count: u16) -> Result<Vec<u16>, FrameError> {
    let expected_bytes = count as usize * 2;
    let (byte_count, data) = payload
        .split_first()
        .ok_or_else(|| FrameError::InvalidPayload("missing byte count".to_string()))?;

    if *byte_count as usize != expected_bytes || data.len() != expected_bytes {
        return Err(FrameError::InvalidPayload(format!(
            "expected {} data bytes for {} registers, got byte count {} and {} bytes",
            expected_bytes,
            count,
            byte_count,
            data.len()
        )));
    }

    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}
