//! The `polytrade` binary: wires every component and serves the API.

mod runtime;

use clap::{Parser, Subcommand};
use polytrade_core::ConfigLoader;
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "polytrade", about = "Prediction-market trading platform", version)]
struct Cli {
    /// Path to the TOML config (defaults to ./Polytrade.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full platform: scanner, engine, and the HTTP surface.
    Serve,
    /// Run one deep scan and print the opportunity set.
    Scan {
        /// Minimum profit rate to display.
        #[arg(long, default_value = "0")]
        min_profit: f64,
    },
    /// Probe on-chain trade readiness for the configured wallet.
    Check {
        /// Minimum collateral balance required to count as ready.
        #[arg(long, default_value = "10")]
        min_amount: Decimal,
    },
    /// Run a quoting session on one market until interrupted.
    Session {
        /// Market condition id.
        condition_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_path(path)?,
        None => ConfigLoader::load()?,
    };

    match cli.command {
        Command::Serve => runtime::serve(config).await,
        Command::Scan { min_profit } => runtime::scan_once(config, min_profit).await,
        Command::Check { min_amount } => runtime::check_readiness(config, min_amount).await,
        Command::Session { condition_id } => runtime::run_session(config, condition_id).await,
    }
}
