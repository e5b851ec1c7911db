//! `tokio_util` codec adapters over the MBAP framing functions

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::frame::{
    decode_request, decode_response, encode, FrameError, MbapHeader, RequestFrame, ResponseFrame,
};
use super::pdu::{Request, Response};

/// Decodes requests, encodes responses
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerCodec;

impl Decoder for ServerCodec {
    type Item = RequestFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_request(src)
    }
}

impl Encoder<(MbapHeader, Response)> for ServerCodec {
    type Error = FrameError;

    fn encode(
        &mut self,
        (header, response): (MbapHeader, Response),
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        encode(header, &response, dst)
    }
}

/// Encodes requests, decodes responses
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = ResponseFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_response(src)
    }
}

impl Encoder<(MbapHeader, Request)> for ClientCodec {
    type Error = FrameError;

    fn encode(
        &mut self,
        (header, request): (MbapHeader, Request),
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        encode(header, &request, dst)
    }
}
