//! MBAP framing
//!
//! A Modbus TCP application data unit is a 7-byte MBAP header followed by
//! the PDU. Decoding consumes exactly one frame from the front of a buffer
//! or nothing at all; encoding always recomputes the length field.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::trace;

use super::constants::{
    MAX_MBAP_LENGTH, MAX_PDU_SIZE, MBAP_HEADER_LEN, MBAP_PREFIX_LEN, MIN_MBAP_LENGTH,
    MODBUS_PROTOCOL_ID,
};
use super::pdu::{Exception, Pdu, PduError, Request, Response};

/// The parts of the MBAP header a reply has to echo
///
/// The protocol id is validated on decode and the length field is derived
/// from the PDU on encode, so neither is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn new(transaction_id: u16, unit_id: u8) -> Self {
        Self {
            transaction_id,
            unit_id,
        }
    }
}

/// Framing errors
///
/// Every decode error means the byte stream is no longer trustworthy.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid protocol id {0}")]
    InvalidProtocolId(u16),

    #[error("invalid MBAP length {0}")]
    InvalidLength(u16),

    #[error(transparent)]
    Pdu(#[from] PduError),

    #[error("PDU of {0} bytes exceeds the 253-byte limit")]
    PduTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded request frame
///
/// `request` is `Err` when the frame was well-formed but must be answered
/// with an exception (unknown function, bad quantity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub header: MbapHeader,
    pub request: Result<Request, Exception>,
}

/// Decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub header: MbapHeader,
    pub response: Response,
}

/// Split one complete ADU off the front of `src`
///
/// Returns `Ok(None)` without consuming anything when more bytes are needed.
pub fn decode_adu(src: &mut BytesMut) -> Result<Option<(MbapHeader, Bytes)>, FrameError> {
    if src.len() < MBAP_HEADER_LEN {
        return Ok(None);
    }

    let protocol_id = u16::from_be_bytes([src[2], src[3]]);
    if protocol_id != MODBUS_PROTOCOL_ID {
        return Err(FrameError::InvalidProtocolId(protocol_id));
    }

    let length = u16::from_be_bytes([src[4], src[5]]);
    if !(MIN_MBAP_LENGTH..=MAX_MBAP_LENGTH).contains(&length) {
        return Err(FrameError::InvalidLength(length));
    }

    let total = MBAP_PREFIX_LEN + usize::from(length);
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    let mut adu = src.split_to(total);
    let header = MbapHeader {
        transaction_id: adu.get_u16(),
        unit_id: adu[4],
    };
    adu.advance(MBAP_HEADER_LEN - 2);

    trace!(
        "ADU txn={} unit={} pdu_len={}",
        header.transaction_id,
        header.unit_id,
        adu.len()
    );
    Ok(Some((header, adu.freeze())))
}

/// Server side: decode one request frame
pub fn decode_request(src: &mut BytesMut) -> Result<Option<RequestFrame>, FrameError> {
    let Some((header, pdu)) = decode_adu(src)? else {
        return Ok(None);
    };

    let request = match Request::parse(&pdu) {
        Ok(request) => Ok(request),
        Err(PduError::Exception(exception)) => Err(exception),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(RequestFrame { header, request }))
}

/// Client side: decode one response frame
pub fn decode_response(src: &mut BytesMut) -> Result<Option<ResponseFrame>, FrameError> {
    let Some((header, pdu)) = decode_adu(src)? else {
        return Ok(None);
    };
    let response = Response::parse(&pdu)?;
    Ok(Some(ResponseFrame { header, response }))
}

/// Append a complete ADU for `pdu` to `dst`
///
/// On error `dst` is left as it was.
pub fn encode<P: Pdu>(header: MbapHeader, pdu: &P, dst: &mut BytesMut) -> Result<(), FrameError> {
    let start = dst.len();
    dst.reserve(MBAP_HEADER_LEN + MAX_PDU_SIZE);

    dst.put_u16(header.transaction_id);
    dst.put_u16(MODBUS_PROTOCOL_ID);
    dst.put_u16(0); // length, patched below
    dst.put_u8(header.unit_id);
    pdu.encode_pdu(dst);

    let pdu_len = dst.len() - start - MBAP_HEADER_LEN;
    if pdu_len > MAX_PDU_SIZE {
        dst.truncate(start);
        return Err(FrameError::PduTooLarge(pdu_len));
    }

    let length = (pdu_len + 1) as u16;
    dst[start + 4..start + 6].copy_from_slice(&length.to_be_bytes());
    Ok(())
}

pub fn encode_response(header: MbapHeader, response: &Response) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::with_capacity(MBAP_HEADER_LEN + MAX_PDU_SIZE);
    encode(header, response, &mut buf)?;
    Ok(buf.freeze())
}

pub fn encode_request(header: MbapHeader, request: &Request) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::with_capacity(MBAP_HEADER_LEN + MAX_PDU_SIZE);
    encode(header, request, &mut buf)?;
    Ok(buf.freeze())
}
