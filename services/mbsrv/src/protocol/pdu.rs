//! Modbus PDU types
//!
//! Requests and responses are tagged unions over the supported function
//! codes. Parsing follows the server-side rules of the Modbus application
//! protocol:
//!
//! - a payload whose size does not match the function's fixed layout is
//!   malformed, and the byte stream can no longer be trusted
//! - a well-framed payload with an out-of-range quantity or value is answered
//!   with an `IllegalDataValue` exception
//! - an unknown function code is answered with `IllegalFunction`

use std::fmt;

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use super::constants::{
    COIL_OFF, COIL_ON, EXCEPTION_FLAG, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS,
    MAX_WRITE_REGISTERS,
};

/// Supported Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            0x0F => Some(Self::WriteMultipleCoils),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable function name
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.as_u8())
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::ServerDeviceFailure),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal Function",
            Self::IllegalDataAddress => "Illegal Data Address",
            Self::IllegalDataValue => "Illegal Data Value",
            Self::ServerDeviceFailure => "Server Device Failure",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), *self as u8)
    }
}

/// Exception reply for a single request
///
/// `function_code` is stored without the exception flag; the flag is added
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exception {
    pub function_code: u8,
    pub code: ExceptionCode,
}

impl Exception {
    pub fn new(function_code: u8, code: ExceptionCode) -> Self {
        Self {
            function_code: function_code & !EXCEPTION_FLAG,
            code,
        }
    }
}

/// Why a PDU could not be turned into a request or response
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PduError {
    /// Payload layout is wrong; framing can no longer be trusted
    #[error("malformed PDU for function 0x{function_code:02X}: {reason}")]
    Malformed { function_code: u8, reason: String },

    /// Well-framed request that must be answered with an exception
    #[error("request for function 0x{:02X} rejected: {}", .0.function_code, .0.code)]
    Exception(Exception),
}

fn malformed(function_code: u8, reason: impl Into<String>) -> PduError {
    PduError::Malformed {
        function_code,
        reason: reason.into(),
    }
}

fn rejected(function_code: u8, code: ExceptionCode) -> PduError {
    PduError::Exception(Exception::new(function_code, code))
}

/// Anything that serializes into a PDU (function code + payload)
pub trait Pdu {
    /// Function code byte as it appears on the wire
    fn function_code(&self) -> u8;

    /// Append the PDU bytes to `dst`
    fn encode_pdu(&self, dst: &mut BytesMut);
}

// ============================================================================
// Requests
// ============================================================================

/// Decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl Request {
    pub fn function(&self) -> FunctionCode {
        match self {
            Self::ReadCoils { .. } => FunctionCode::ReadCoils,
            Self::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            Self::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Self::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            Self::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Self::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            Self::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }

    /// Parse a request PDU (function code + payload)
    pub fn parse(pdu: &[u8]) -> Result<Self, PduError> {
        let (&fc, body) = pdu
            .split_first()
            .ok_or_else(|| malformed(0, "empty PDU"))?;

        let Some(function) = FunctionCode::from_u8(fc) else {
            return Err(rejected(fc, ExceptionCode::IllegalFunction));
        };

        match function {
            FunctionCode::ReadCoils => {
                let (address, quantity) = read_range(fc, body, MAX_READ_COILS)?;
                Ok(Self::ReadCoils { address, quantity })
            },
            FunctionCode::ReadDiscreteInputs => {
                let (address, quantity) = read_range(fc, body, MAX_READ_COILS)?;
                Ok(Self::ReadDiscreteInputs { address, quantity })
            },
            FunctionCode::ReadHoldingRegisters => {
                let (address, quantity) = read_range(fc, body, MAX_READ_REGISTERS)?;
                Ok(Self::ReadHoldingRegisters { address, quantity })
            },
            FunctionCode::ReadInputRegisters => {
                let (address, quantity) = read_range(fc, body, MAX_READ_REGISTERS)?;
                Ok(Self::ReadInputRegisters { address, quantity })
            },
            FunctionCode::WriteSingleCoil => {
                let (address, raw) = fixed_pair(fc, body)?;
                let value = match raw {
                    COIL_ON => true,
                    COIL_OFF => false,
                    _ => return Err(rejected(fc, ExceptionCode::IllegalDataValue)),
                };
                Ok(Self::WriteSingleCoil { address, value })
            },
            FunctionCode::WriteSingleRegister => {
                let (address, value) = fixed_pair(fc, body)?;
                Ok(Self::WriteSingleRegister { address, value })
            },
            FunctionCode::WriteMultipleCoils => {
                let (address, quantity, data) = counted_write(fc, body, 1, |quantity| {
                    (1..=MAX_WRITE_COILS)
                        .contains(&quantity)
                        .then(|| usize::from(quantity.div_ceil(8)))
                })?;
                let values = unpack_bits(data, usize::from(quantity));
                Ok(Self::WriteMultipleCoils { address, values })
            },
            FunctionCode::WriteMultipleRegisters => {
                let (address, _, data) = counted_write(fc, body, 2, |quantity| {
                    (1..=MAX_WRITE_REGISTERS)
                        .contains(&quantity)
                        .then(|| usize::from(quantity) * 2)
                })?;
                let values = data
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Ok(Self::WriteMultipleRegisters { address, values })
            },
        }
    }
}

impl Pdu for Request {
    fn function_code(&self) -> u8 {
        self.function().as_u8()
    }

    fn encode_pdu(&self, dst: &mut BytesMut) {
        dst.put_u8(self.function_code());
        match self {
            Self::ReadCoils { address, quantity }
            | Self::ReadDiscreteInputs { address, quantity }
            | Self::ReadHoldingRegisters { address, quantity }
            | Self::ReadInputRegisters { address, quantity } => {
                dst.put_u16(*address);
                dst.put_u16(*quantity);
            },
            Self::WriteSingleCoil { address, value } => {
                dst.put_u16(*address);
                dst.put_u16(if *value { COIL_ON } else { COIL_OFF });
            },
            Self::WriteSingleRegister { address, value } => {
                dst.put_u16(*address);
                dst.put_u16(*value);
            },
            Self::WriteMultipleCoils { address, values } => {
                dst.put_u16(*address);
                dst.put_u16(values.len() as u16);
                dst.put_u8(packed_len(values.len()) as u8);
                pack_bits(values, dst);
            },
            Self::WriteMultipleRegisters { address, values } => {
                dst.put_u16(*address);
                dst.put_u16(values.len() as u16);
                dst.put_u8((values.len() * 2) as u8);
                for value in values {
                    dst.put_u16(*value);
                }
            },
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Server reply to a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Bit values; a decoded response is padded to whole bytes
    ReadCoils(Vec<bool>),
    /// Bit values; a decoded response is padded to whole bytes
    ReadDiscreteInputs(Vec<bool>),
    ReadHoldingRegisters(Vec<u16>),
    ReadInputRegisters(Vec<u16>),
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, quantity: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
    Exception(Exception),
}

impl Response {
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception(_))
    }

    /// Parse a response PDU (client side)
    pub fn parse(pdu: &[u8]) -> Result<Self, PduError> {
        let (&fc, body) = pdu
            .split_first()
            .ok_or_else(|| malformed(0, "empty PDU"))?;

        if fc & EXCEPTION_FLAG != 0 {
            let [raw] = body else {
                return Err(malformed(fc, "exception PDU must carry exactly one code"));
            };
            let code = ExceptionCode::from_u8(*raw)
                .ok_or_else(|| malformed(fc, format!("unknown exception code {}", raw)))?;
            return Ok(Self::Exception(Exception::new(fc, code)));
        }

        let function = FunctionCode::from_u8(fc)
            .ok_or_else(|| malformed(fc, "unknown function code"))?;

        match function {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
                let data = counted_payload(fc, body)?;
                let bits = unpack_bits(data, data.len() * 8);
                Ok(if function == FunctionCode::ReadCoils {
                    Self::ReadCoils(bits)
                } else {
                    Self::ReadDiscreteInputs(bits)
                })
            },
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
                let data = counted_payload(fc, body)?;
                if data.len() % 2 != 0 {
                    return Err(malformed(fc, "odd register byte count"));
                }
                let words = data
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Ok(if function == FunctionCode::ReadHoldingRegisters {
                    Self::ReadHoldingRegisters(words)
                } else {
                    Self::ReadInputRegisters(words)
                })
            },
            FunctionCode::WriteSingleCoil => {
                let (address, raw) = fixed_pair(fc, body)?;
                let value = match raw {
                    COIL_ON => true,
                    COIL_OFF => false,
                    _ => return Err(malformed(fc, format!("invalid coil value 0x{:04X}", raw))),
                };
                Ok(Self::WriteSingleCoil { address, value })
            },
            FunctionCode::WriteSingleRegister => {
                let (address, value) = fixed_pair(fc, body)?;
                Ok(Self::WriteSingleRegister { address, value })
            },
            FunctionCode::WriteMultipleCoils => {
                let (address, quantity) = fixed_pair(fc, body)?;
                Ok(Self::WriteMultipleCoils { address, quantity })
            },
            FunctionCode::WriteMultipleRegisters => {
                let (address, quantity) = fixed_pair(fc, body)?;
                Ok(Self::WriteMultipleRegisters { address, quantity })
            },
        }
    }
}

impl Pdu for Response {
    fn function_code(&self) -> u8 {
        match self {
            Self::ReadCoils(_) => FunctionCode::ReadCoils.as_u8(),
            Self::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs.as_u8(),
            Self::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters.as_u8(),
            Self::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters.as_u8(),
            Self::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil.as_u8(),
            Self::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister.as_u8(),
            Self::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils.as_u8(),
            Self::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters.as_u8(),
            Self::Exception(exception) => exception.function_code | EXCEPTION_FLAG,
        }
    }

    fn encode_pdu(&self, dst: &mut BytesMut) {
        dst.put_u8(self.function_code());
        match self {
            Self::ReadCoils(bits) | Self::ReadDiscreteInputs(bits) => {
                dst.put_u8(packed_len(bits.len()) as u8);
                pack_bits(bits, dst);
            },
            Self::ReadHoldingRegisters(words) | Self::ReadInputRegisters(words) => {
                dst.put_u8((words.len() * 2) as u8);
                for word in words {
                    dst.put_u16(*word);
                }
            },
            Self::WriteSingleCoil { address, value } => {
                dst.put_u16(*address);
                dst.put_u16(if *value { COIL_ON } else { COIL_OFF });
            },
            Self::WriteSingleRegister { address, value } => {
                dst.put_u16(*address);
                dst.put_u16(*value);
            },
            Self::WriteMultipleCoils { address, quantity }
            | Self::WriteMultipleRegisters { address, quantity } => {
                dst.put_u16(*address);
                dst.put_u16(*quantity);
            },
            Self::Exception(exception) => {
                dst.put_u8(exception.code as u8);
            },
        }
    }
}

// ============================================================================
// Payload helpers
// ============================================================================

/// Two big-endian words, nothing more and nothing less
fn fixed_pair(fc: u8, body: &[u8]) -> Result<(u16, u16), PduError> {
    match body {
        [a0, a1, b0, b1] => Ok((
            u16::from_be_bytes([*a0, *a1]),
            u16::from_be_bytes([*b0, *b1]),
        )),
        _ => Err(malformed(
            fc,
            format!("expected 4 payload bytes, got {}", body.len()),
        )),
    }
}

fn read_range(fc: u8, body: &[u8], max_quantity: u16) -> Result<(u16, u16), PduError> {
    let (address, quantity) = fixed_pair(fc, body)?;
    if quantity == 0 || quantity > max_quantity {
        return Err(rejected(fc, ExceptionCode::IllegalDataValue));
    }
    Ok((address, quantity))
}

/// FC15/FC16 payload: address, quantity, byte count, data
///
/// `expected_bytes` maps the quantity to the byte count it requires, or
/// `None` when the quantity itself is out of range.
fn counted_write(
    fc: u8,
    body: &[u8],
    min_data: usize,
    expected_bytes: impl Fn(u16) -> Option<usize>,
) -> Result<(u16, u16, &[u8]), PduError> {
    if body.len() < 5 + min_data {
        return Err(malformed(
            fc,
            format!("payload too short: {} bytes", body.len()),
        ));
    }

    let address = u16::from_be_bytes([body[0], body[1]]);
    let quantity = u16::from_be_bytes([body[2], body[3]]);
    let byte_count = usize::from(body[4]);

    if expected_bytes(quantity) != Some(byte_count) {
        return Err(rejected(fc, ExceptionCode::IllegalDataValue));
    }

    let data = &body[5..];
    if data.len() != byte_count {
        return Err(malformed(
            fc,
            format!("byte count {} but {} data bytes", byte_count, data.len()),
        ));
    }

    Ok((address, quantity, data))
}

/// Read-response payload: byte count followed by exactly that many bytes
fn counted_payload(fc: u8, body: &[u8]) -> Result<&[u8], PduError> {
    let (&byte_count, data) = body
        .split_first()
        .ok_or_else(|| malformed(fc, "missing byte count"))?;
    if data.len() != usize::from(byte_count) {
        return Err(malformed(
            fc,
            format!("byte count {} but {} data bytes", byte_count, data.len()),
        ));
    }
    Ok(data)
}

/// Bytes needed to carry `bits` coil values
pub fn packed_len(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// Pack bits LSB-first; unused high bits of the last byte are zero
pub fn pack_bits(bits: &[bool], dst: &mut BytesMut) {
    for chunk in bits.chunks(8) {
        let byte = chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, bit)| if *bit { acc | (1 << i) } else { acc });
        dst.put_u8(byte);
    }
}

/// Unpack the first `count` bits (LSB-first) from `data`
pub fn unpack_bits(data: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| data.get(i / 8).is_some_and(|byte| byte & (1 << (i % 8)) != 0))
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn encoded<P: Pdu>(pdu: &P) -> Vec<u8> {
        let mut buf = BytesMut::new();
        pdu.encode_pdu(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_parse_read_holding_registers() {
        let request = Request::parse(&[0x03, 0x00, 0x0A, 0x00, 0x05]).unwrap();
        assert_eq!(
            request,
            Request::ReadHoldingRegisters {
                address: 10,
                quantity: 5
            }
        );
        assert_eq!(request.function(), FunctionCode::ReadHoldingRegisters);
    }

    #[test]
    fn test_request_round_trip() {
        let requests = vec![
            Request::ReadCoils {
                address: 0,
                quantity: 2000,
            },
            Request::ReadDiscreteInputs {
                address: 7,
                quantity: 9,
            },
            Request::ReadHoldingRegisters {
                address: 0,
                quantity: 125,
            },
            Request::ReadInputRegisters {
                address: 1999,
                quantity: 1,
            },
            Request::WriteSingleCoil {
                address: 3,
                value: true,
            },
            Request::WriteSingleRegister {
                address: 4,
                value: 0xBEEF,
            },
            Request::WriteMultipleCoils {
                address: 5,
                values: vec![true, false, true, true, false, false, false, true, true],
            },
            Request::WriteMultipleRegisters {
                address: 6,
                values: vec![1, 2, 0xFFFF],
            },
        ];

        for request in requests {
            let bytes = encoded(&request);
            assert_eq!(Request::parse(&bytes).unwrap(), request);
        }
    }

    #[test]
    fn test_unknown_function_is_illegal_function() {
        let err = Request::parse(&[0x99, 0x00, 0x00]).unwrap_err();
        assert_eq!(
            err,
            PduError::Exception(Exception::new(0x99, ExceptionCode::IllegalFunction))
        );

        let reply = Response::Exception(Exception::new(0x99, ExceptionCode::IllegalFunction));
        assert_eq!(encoded(&reply), vec![0x99, 0x01]);
    }

    #[test]
    fn test_quantity_limits() {
        // zero quantity
        let err = Request::parse(&[0x01, 0x00, 0x00, 0x00, 0x00]).unwrap_err();
        assert!(matches!(
            err,
            PduError::Exception(Exception {
                code: ExceptionCode::IllegalDataValue,
                ..
            })
        ));

        // 126 registers
        let err = Request::parse(&[0x04, 0x00, 0x00, 0x00, 0x7E]).unwrap_err();
        assert!(matches!(err, PduError::Exception(_)));

        // 2001 coils
        let err = Request::parse(&[0x02, 0x00, 0x00, 0x07, 0xD1]).unwrap_err();
        assert!(matches!(err, PduError::Exception(_)));
    }

    #[test]
    fn test_write_single_coil_value_must_be_on_or_off() {
        let err = Request::parse(&[0x05, 0x00, 0x01, 0x12, 0x34]).unwrap_err();
        assert_eq!(
            err,
            PduError::Exception(Exception::new(0x05, ExceptionCode::IllegalDataValue))
        );

        let off = Request::parse(&[0x05, 0x00, 0x01, 0x00, 0x00]).unwrap();
        assert_eq!(
            off,
            Request::WriteSingleCoil {
                address: 1,
                value: false
            }
        );
    }

    #[test]
    fn test_fixed_layout_length_mismatch_is_malformed() {
        let err = Request::parse(&[0x03, 0x00, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, PduError::Malformed { function_code: 0x03, .. }));

        let err = Request::parse(&[0x06, 0x00, 0x00, 0x00, 0x01, 0xFF]).unwrap_err();
        assert!(matches!(err, PduError::Malformed { .. }));
    }

    #[test]
    fn test_write_multiple_registers_byte_count_rules() {
        // byte count disagrees with quantity -> exception
        let err = Request::parse(&[0x10, 0x00, 0x00, 0x00, 0x02, 0x02, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, PduError::Exception(_)));

        // byte count agrees but data is short -> malformed
        let err =
            Request::parse(&[0x10, 0x00, 0x00, 0x00, 0x02, 0x04, 0x00, 0x01, 0x00]).unwrap_err();
        assert!(matches!(err, PduError::Malformed { .. }));

        // too short to even carry the header
        let err = Request::parse(&[0x10, 0x00, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, PduError::Malformed { .. }));
    }

    #[test]
    fn test_write_multiple_coils_masks_padding() {
        // 3 coils, padding bits set in the data byte must be ignored
        let request = Request::parse(&[0x0F, 0x00, 0x10, 0x00, 0x03, 0x01, 0xFD]).unwrap();
        assert_eq!(
            request,
            Request::WriteMultipleCoils {
                address: 16,
                values: vec![true, false, true]
            }
        );
    }

    #[test]
    fn test_read_coils_response_encoding() {
        let response = Response::ReadCoils(vec![
            false, true, false, true, false, true, false, true, false, true,
        ]);
        assert_eq!(encoded(&response), vec![0x01, 0x02, 0xAA, 0x02]);

        let parsed = Response::parse(&[0x01, 0x02, 0xAA, 0x02]).unwrap();
        let Response::ReadCoils(bits) = parsed else {
            panic!("expected ReadCoils");
        };
        assert_eq!(bits.len(), 16);
        assert_eq!(
            &bits[..10],
            &[false, true, false, true, false, true, false, true, false, true]
        );
        assert!(bits[10..].iter().all(|bit| !bit));
    }

    #[test]
    fn test_response_parse_registers_and_exception() {
        let parsed = Response::parse(&[0x03, 0x04, 0x00, 0x11, 0x00, 0x11]).unwrap();
        assert_eq!(parsed, Response::ReadHoldingRegisters(vec![17, 17]));

        let parsed = Response::parse(&[0x83, 0x02]).unwrap();
        assert_eq!(
            parsed,
            Response::Exception(Exception::new(0x03, ExceptionCode::IllegalDataAddress))
        );
        assert!(parsed.is_exception());

        assert!(Response::parse(&[0x83, 0x09]).is_err());
        assert!(Response::parse(&[0x03, 0x03, 0x00, 0x11]).is_err());
    }

    #[test]
    fn test_pack_unpack_bits() {
        let mut buf = BytesMut::new();
        pack_bits(&[true; 9], &mut buf);
        assert_eq!(buf.as_ref(), &[0xFF, 0x01]);
        assert_eq!(unpack_bits(&buf, 9), vec![true; 9]);
        assert_eq!(packed_len(0), 0);
        assert_eq!(packed_len(8), 1);
        assert_eq!(packed_len(9), 2);
    }
}
