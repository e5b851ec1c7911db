//! mbsrv binary

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use errors::{ServiceError, ServiceResult};
use mbsrv::bootstrap::{self, Args};
use mbsrv::ModbusTcpServer;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = bootstrap::initialize_logging(&args.service) {
        eprintln!("mbsrv: {}", e);
        return ExitCode::from(e.exit_code() as u8);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        },
    }
}

async fn run(args: Args) -> ServiceResult<()> {
    let config = bootstrap::load_config(&args)?;
    bootstrap::describe_configuration(&config)?;

    if args.service.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let mut server = ModbusTcpServer::new(config)?;
    server.start().await?;

    let signal = common::wait_for_shutdown().await;
    info!("Received {}, shutting down", signal);

    server.stop().await?;

    let stats = server.stats();
    info!(
        "Final statistics: {}",
        serde_json::to_string(&stats).map_err(ServiceError::from)?
    );
    Ok(())
}
