//! Binary crate for the `weather-producer` service.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Loading configuration and installing logging
//! - Running the scheduler until a shutdown signal arrives

use clap::Parser;
use weather_core::Config;

mod cli;
mod logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cmd = cli::Cli::parse();
    let config = Config::load(cmd.config.as_deref(), cmd.env_file.as_deref())?;
    logging::init(&config.logging);
    cmd.run(config).await
}
