//! Service bootstrap
//!
//! Command-line parsing, logging setup and configuration resolution for the
//! `mbsrv` binary. CLI flags override file and environment settings.

use std::time::Duration;

use clap::Parser;
use tracing::{debug, info};

use common::bootstrap_args::ServiceArgs;
use errors::{ServiceError, ServiceResult};

use crate::config::ServerConfig;
use crate::store::DataSpace;

pub const SERVICE_NAME: &str = "mbsrv";

/// Command-line arguments for mbsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mbsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus TCP server with an in-memory register store",
    long_about = None
)]
pub struct Args {
    #[command(flatten)]
    pub service: ServiceArgs,

    /// Listen address (host:port), overrides the configuration
    #[arg(short = 'b', long)]
    pub bind: Option<String>,

    /// Idle timeout, e.g. "90s" or "2h"
    #[arg(long, value_parser = parse_duration)]
    pub idle_timeout: Option<Duration>,

    /// Maximum simultaneous clients
    #[arg(long)]
    pub max_connections: Option<usize>,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

/// Initialize logging from the shared service arguments
pub fn initialize_logging(args: &ServiceArgs) -> ServiceResult<()> {
    common::logging::init_with_config(args.log_config(SERVICE_NAME))
}

/// Resolve configuration: defaults < file < environment < CLI
pub fn load_config(args: &Args) -> ServiceResult<ServerConfig> {
    let mut config = ServerConfig::load(args.service.config.as_deref())?;

    if let Some(bind) = &args.bind {
        debug!("CLI bind address override: {}", bind);
        config.bind_address = bind.clone();
    }
    if let Some(idle_timeout) = args.idle_timeout {
        config.idle_timeout = idle_timeout;
    }
    if let Some(max_connections) = args.max_connections {
        config.max_connections = max_connections;
    }

    config.validate()?;
    Ok(config)
}

/// Log the effective configuration (validation mode and startup)
pub fn describe_configuration(config: &ServerConfig) -> ServiceResult<()> {
    info!("Bind address: {}", config.bind_address);
    info!(
        "Idle timeout: {}",
        humantime_serde::re::humantime::format_duration(config.idle_timeout)
    );
    info!(
        "Clients: max {}, displace after {}",
        config.max_connections,
        humantime_serde::re::humantime::format_duration(config.displace_after)
    );
    for space in DataSpace::ALL {
        let table = config.tables.table(space);
        info!("  {}: {} cells, fill {:?}", space, table.size, table.fill);
    }

    debug!(
        "Effective configuration: {}",
        serde_json::to_string(config).map_err(ServiceError::from)?
    );
    Ok(())
}
