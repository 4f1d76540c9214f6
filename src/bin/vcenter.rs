use clap::Parser;
use tracing::Level;
use vcenter::cli::Cli;
use vcenter::config::Config;
use vcenter::prelude::{Error, Result, Session};
use vcenter::retry::retry;
use vcenter::telemetry;

/// The main entry point for the vCenter client.
///
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging. Stdout is reserved for command output.
    let subscriber = telemetry::get_subscriber(Level::INFO, std::io::stderr);
    telemetry::init_subscriber(subscriber)?;
    tracing::info!("Logger ready.");

    let cli = Cli::parse();
    tracing::info!(?cli, "Cli arguments parsed.");

    let config = Config::from_env()?;
    let session = retry("connect", || Session::connect(&config))
        .await
        .ok_or_else(|| Error::Any(format!("cannot connect to {}", config.vcenter.url)))?;
    tracing::info!(url = %config.vcenter.url, "Session opened.");

    cli.command.run_to_completion(&session).await
}
