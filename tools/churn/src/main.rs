//! churn - connection-churn test client for mbsrv
//!
//! Randomly opens and closes TCP connections against a Modbus TCP server to
//! exercise its connection limit, idle timeout and peer-close detection.

mod churn;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use common::bootstrap_args::ServiceArgs;

use crate::churn::{ChurnClient, ChurnSettings};

#[derive(Parser, Debug)]
#[command(
    name = "churn",
    version = env!("CARGO_PKG_VERSION"),
    about = "Randomly connect to and disconnect from a Modbus TCP server",
    long_about = None
)]
struct Args {
    #[command(flatten)]
    service: ServiceArgs,

    /// Server address (host:port)
    #[arg(short = 'a', long, default_value = "localhost:502")]
    address: String,

    /// Pause between steps
    #[arg(long, default_value = "500ms", value_parser = parse_duration)]
    interval: Duration,

    /// Percent chance per step to open a connection
    #[arg(long, default_value_t = 75, value_parser = clap::value_parser!(u8).range(0..=100))]
    connect_chance: u8,

    /// Percent chance per step to close a connection
    #[arg(long, default_value_t = 25, value_parser = clap::value_parser!(u8).range(0..=100))]
    disconnect_chance: u8,

    /// Read timeout when checking whether a connection is still open
    #[arg(long, default_value = "10ms", value_parser = parse_duration)]
    probe_timeout: Duration,

    /// Stop after this many steps (runs until Ctrl+C otherwise)
    #[arg(short = 'n', long)]
    iterations: Option<u64>,

    /// Read one holding register on every new connection
    #[arg(long)]
    probe_read: bool,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    common::logging::init_with_config(args.service.log_config("churn"))
        .context("Failed to initialize logging")?;

    let settings = ChurnSettings {
        address: args.address.clone(),
        connect_chance: args.connect_chance,
        disconnect_chance: args.disconnect_chance,
        probe_timeout: args.probe_timeout,
        probe_read: args.probe_read,
    };
    info!(
        "Churning {} every {:?} (connect {}%, disconnect {}%)",
        settings.address, args.interval, settings.connect_chance, settings.disconnect_chance
    );

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut client = ChurnClient::new(settings, rng);

    let shutdown = common::wait_for_shutdown();
    tokio::pin!(shutdown);

    let mut steps = 0u64;
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                info!("Received {}, stopping", signal);
                break;
            }
            _ = tokio::time::sleep(args.interval) => {}
        }

        client.step().await;
        steps += 1;

        if args.iterations.is_some_and(|limit| steps >= limit) {
            break;
        }
    }

    info!(
        "Finished after {} steps with {} open connections: {:?}",
        steps,
        client.open_connections(),
        client.stats()
    );
    Ok(())
}
