//! mbsrv: a Modbus TCP server with an in-memory register store
//!
//! Components, leaves first:
//! - [`protocol`]: MBAP framing and PDU encoding
//! - [`store`]: coils, discrete inputs, holding and input registers
//! - [`dispatcher`]: executes one request against the store
//! - [`connection`]: per-client read/dispatch/write loop
//! - [`server`]: listener, connection registry, lifecycle

pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod server;
pub mod store;

pub use config::{ServerConfig, TableConfig, TablesConfig};
pub use connection::{ConnectionId, ConnectionInfo, ConnectionState, DisconnectReason};
pub use error::{MbSrvError, Result};
pub use server::{ModbusTcpServer, ServerEvent, StatsSnapshot};
pub use store::{Cells, DataSpace, RegisterStore, StoreError};
