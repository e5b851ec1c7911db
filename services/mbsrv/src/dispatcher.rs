//! Request dispatcher
//!
//! Maps one decoded request onto the register store and builds the reply.
//! Holds no state of its own; every call takes exactly one store lock.

use tracing::{debug, warn};

use crate::protocol::{Exception, ExceptionCode, Request, Response};
use crate::store::{Cells, DataSpace, RegisterStore, StoreError};

/// Execute `request` against `store`
pub fn dispatch(request: &Request, store: &RegisterStore) -> Response {
    let function_code = request.function().as_u8();

    let result = match request {
        Request::ReadCoils { address, quantity } => store
            .read_bits(DataSpace::Coils, *address, *quantity)
            .map(Response::ReadCoils),
        Request::ReadDiscreteInputs { address, quantity } => store
            .read_bits(DataSpace::DiscreteInputs, *address, *quantity)
            .map(Response::ReadDiscreteInputs),
        Request::ReadHoldingRegisters { address, quantity } => store
            .read_words(DataSpace::HoldingRegisters, *address, *quantity)
            .map(Response::ReadHoldingRegisters),
        Request::ReadInputRegisters { address, quantity } => store
            .read_words(DataSpace::InputRegisters, *address, *quantity)
            .map(Response::ReadInputRegisters),
        Request::WriteSingleCoil { address, value } => store
            .write(DataSpace::Coils, *address, &Cells::Bits(vec![*value]))
            .map(|()| Response::WriteSingleCoil {
                address: *address,
                value: *value,
            }),
        Request::WriteSingleRegister { address, value } => store
            .write(DataSpace::HoldingRegisters, *address, &Cells::Words(vec![*value]))
            .map(|()| Response::WriteSingleRegister {
                address: *address,
                value: *value,
            }),
        Request::WriteMultipleCoils { address, values } => store
            .write(DataSpace::Coils, *address, &Cells::Bits(values.clone()))
            .map(|()| Response::WriteMultipleCoils {
                address: *address,
                quantity: values.len() as u16,
            }),
        Request::WriteMultipleRegisters { address, values } => store
            .write(DataSpace::HoldingRegisters, *address, &Cells::Words(values.clone()))
            .map(|()| Response::WriteMultipleRegisters {
                address: *address,
                quantity: values.len() as u16,
            }),
    };

    result.unwrap_or_else(|err| {
        let code = match err {
            StoreError::OutOfRange { .. } => {
                debug!("{}", err);
                ExceptionCode::IllegalDataAddress
            },
            other => {
                warn!("Store failure for FC 0x{:02X}: {}", function_code, other);
                ExceptionCode::ServerDeviceFailure
            },
        };
        Response::Exception(Exception::new(function_code, code))
    })
}

/// Build the reply for a decoded frame, passing decode-time exceptions through
pub fn respond(request: &Result<Request, Exception>, store: &RegisterStore) -> Response {
    match request {
        Ok(request) => dispatch(request, store),
        Err(exception) => Response::Exception(*exception),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::TablesConfig;

    fn store() -> RegisterStore {
        RegisterStore::from_config(&TablesConfig::default()).unwrap()
    }

    #[test]
    fn test_read_holding_registers() {
        let response = dispatch(
            &Request::ReadHoldingRegisters {
                address: 0,
                quantity: 5,
            },
            &store(),
        );
        assert_eq!(response, Response::ReadHoldingRegisters(vec![17; 5]));
    }

    #[test]
    fn test_out_of_range_is_illegal_data_address() {
        let response = dispatch(
            &Request::ReadInputRegisters {
                address: 1990,
                quantity: 11,
            },
            &store(),
        );
        assert_eq!(
            response,
            Response::Exception(Exception::new(0x04, ExceptionCode::IllegalDataAddress))
        );
    }

    #[test]
    fn test_writes_echo_and_persist() {
        let store = store();

        let response = dispatch(
            &Request::WriteSingleRegister {
                address: 3,
                value: 0x1234,
            },
            &store,
        );
        assert_eq!(
            response,
            Response::WriteSingleRegister {
                address: 3,
                value: 0x1234
            }
        );

        let response = dispatch(
            &Request::WriteMultipleCoils {
                address: 10,
                values: vec![true, true, true],
            },
            &store,
        );
        assert_eq!(
            response,
            Response::WriteMultipleCoils {
                address: 10,
                quantity: 3
            }
        );

        let response = dispatch(
            &Request::ReadCoils {
                address: 8,
                quantity: 5,
            },
            &store,
        );
        assert_eq!(
            response,
            Response::ReadCoils(vec![false, true, true, true, true])
        );

        assert_eq!(
            store
                .read_words(DataSpace::HoldingRegisters, 3, 1)
                .unwrap(),
            vec![0x1234]
        );
    }

    #[test]
    fn test_failed_write_leaves_store_unchanged() {
        let store = store();
        let response = dispatch(
            &Request::WriteMultipleRegisters {
                address: 1999,
                values: vec![1, 2],
            },
            &store,
        );
        assert!(response.is_exception());
        assert_eq!(
            store
                .read_words(DataSpace::HoldingRegisters, 1999, 1)
                .unwrap(),
            vec![17]
        );
    }

    #[test]
    fn test_decode_exception_passes_through() {
        let exception = Exception::new(0x2B, ExceptionCode::IllegalFunction);
        assert_eq!(
            respond(&Err(exception), &store()),
            Response::Exception(exception)
        );
    }
}
