//! Modbus TCP protocol constants
//!
//! Frame limits follow the Modbus application protocol: the PDU is capped at
//! 253 bytes, and every per-function quantity limit is whatever still fits
//! inside that PDU.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header length on the wire
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes
pub const MBAP_HEADER_LEN: usize = 7;

/// Bytes of the MBAP header that precede the counted part of the frame
/// (the length field counts the unit id and everything after it)
pub const MBAP_PREFIX_LEN: usize = 6;

/// Maximum PDU (function code + payload) size
pub const MAX_PDU_SIZE: usize = 253;

/// Smallest legal MBAP length field value: unit id + function code
pub const MIN_MBAP_LENGTH: u16 = 2;

/// Largest legal MBAP length field value: unit id + maximum PDU
pub const MAX_MBAP_LENGTH: u16 = 1 + MAX_PDU_SIZE as u16;

/// Protocol identifier for Modbus; anything else is not ours
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// Set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Receive buffer size per connection (one maximum frame plus headroom)
pub const RECEIVE_BUFFER_SIZE: usize = 512;

/// Default Modbus TCP port
pub const DEFAULT_PORT: u16 = 502;

// ============================================================================
// Quantity Limits
// ============================================================================

/// FC01/FC02: 1 + 1 + ceil(N / 8) <= 253, rounded down to 2000
pub const MAX_READ_COILS: u16 = 2000;

/// FC15: 1 + 2 + 2 + 1 + ceil(N / 8) <= 253, rounded down to 1968
pub const MAX_WRITE_COILS: u16 = 1968;

/// FC03/FC04: 1 + 1 + 2N <= 253
pub const MAX_READ_REGISTERS: u16 = 125;

/// FC16: 1 + 2 + 2 + 1 + 2N <= 253
pub const MAX_WRITE_REGISTERS: u16 = 123;

// ============================================================================
// Single Coil Encoding
// ============================================================================

pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;
