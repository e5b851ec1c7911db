//! Modbus TCP protocol layer
//!
//! - [`constants`]: frame and quantity limits
//! - [`pdu`]: typed requests, responses and exceptions
//! - [`frame`]: MBAP framing over byte buffers
//! - [`codec`]: `tokio_util` codec adapters over [`frame`]

pub mod codec;
pub mod constants;
pub mod frame;
pub mod pdu;

pub use codec::{ClientCodec, ServerCodec};
pub use frame::{FrameError, MbapHeader, RequestFrame, ResponseFrame};
pub use pdu::{Exception, ExceptionCode, FunctionCode, Pdu, PduError, Request, Response};
