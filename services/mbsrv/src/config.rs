//! Server configuration
//!
//! Resolved through `common::load_layered`: compiled defaults, then an
//! optional file, then `MBSRV_` environment variables
//! (e.g. `MBSRV_TABLES__COILS__SIZE=100`).

use std::path::Path;
use std::time::Duration;

use common::{load_layered, ConfigSource};
use serde::{Deserialize, Serialize};

use crate::error::{MbSrvError, Result};
use crate::protocol::constants::DEFAULT_PORT;
use crate::store::{validate_table, DataSpace};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "MBSRV_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, `host:port`
    pub bind_address: String,

    /// Close a connection after this long without inbound data
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Simultaneous client limit
    pub max_connections: usize,

    /// Minimum idle time before a connection may be displaced by a new one
    #[serde(with = "humantime_serde")]
    pub displace_after: Duration,

    pub tables: TablesConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
            idle_timeout: Duration::from_secs(120 * 60),
            max_connections: 8,
            displace_after: Duration::from_secs(30),
            tables: TablesConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from defaults, `file` and the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        load_layered(ConfigSource::new(file, ENV_PREFIX))
            .map_err(|e| MbSrvError::ConfigError(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let port_ok = self
            .bind_address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !port_ok {
            return Err(MbSrvError::ConfigError(format!(
                "bind_address '{}' is not host:port",
                self.bind_address
            )));
        }

        if self.idle_timeout.is_zero() {
            return Err(MbSrvError::ConfigError(
                "idle_timeout must be greater than zero".into(),
            ));
        }

        if self.max_connections == 0 {
            return Err(MbSrvError::ConfigError(
                "max_connections must be at least 1".into(),
            ));
        }

        for space in DataSpace::ALL {
            validate_table(space, self.tables.table(space))?;
        }

        Ok(())
    }
}

/// One table: its size and a fill pattern repeated across it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TableConfig {
    pub size: usize,
    pub fill: Vec<u16>,
}

impl TableConfig {
    pub fn new(size: usize, fill: Vec<u16>) -> Self {
        Self { size, fill }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self::new(2000, vec![0])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TablesConfig {
    pub coils: TableConfig,
    pub discrete_inputs: TableConfig,
    pub holding_registers: TableConfig,
    pub input_registers: TableConfig,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            coils: TableConfig::new(2000, vec![0, 1]),
            discrete_inputs: TableConfig::new(2000, vec![1]),
            holding_registers: TableConfig::new(2000, vec![17]),
            input_registers: TableConfig::new(2000, vec![17]),
        }
    }
}

impl TablesConfig {
    pub fn table(&self, space: DataSpace) -> &TableConfig {
        match space {
            DataSpace::Coils => &self.coils,
            DataSpace::DiscreteInputs => &self.discrete_inputs,
            DataSpace::HoldingRegisters => &self.holding_registers,
            DataSpace::InputRegisters => &self.input_registers,
        }
    }
}
