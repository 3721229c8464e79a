use anyhow::Context;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::watch;
use tracing::{error, info};
use weather_core::{Config, CycleRunner, Pipeline, Scheduler};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "weather-producer",
    version,
    about = "Fetches the forecast on a schedule and publishes it to RabbitMQ"
)]
pub struct Cli {
    /// TOML configuration file; defaults to the platform config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Dotenv file loaded before reading the environment; defaults to `./.env`.
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scheduler until interrupted.
    Run,

    /// Run a single cycle and exit.
    Once {
        /// Ask the language model for an insight.
        #[arg(long)]
        insight: bool,

        /// Print the payload instead of publishing and exporting it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective configuration with secrets masked.
    Config,
}

impl Cli {
    pub async fn run(self, config: Config) -> anyhow::Result<()> {
        match self.command {
            Command::Run => run_service(&config).await?,
            Command::Once { insight, dry_run } => {
                let pipeline = Pipeline::from_config(&config)?;

                if dry_run {
                    let payload = pipeline.aggregator().build_payload(insight).await?;
                    println!("{}", payload.to_json()?);
                } else {
                    let report = pipeline.run_cycle(insight).await?;
                    println!("Published: {}", if report.published { "yes" } else { "no" });
                    if let Some(path) = &report.csv {
                        println!("CSV: {}", path.display());
                    }
                    if let Some(path) = &report.excel {
                        println!("Excel: {}", path.display());
                    }
                    if let Some(insight) = &report.insight {
                        println!("Insight: {insight}");
                    }
                }
            }
            Command::Config => {
                println!("{}", config.redacted()?);
            }
        }

        Ok(())
    }
}

async fn run_service(config: &Config) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(config).context("Failed to initialize producer")?;
    let runner: Arc<dyn CycleRunner> = Arc::new(pipeline);

    info!(
        city = %config.location.city,
        queue = %config.broker.queue,
        data_interval_minutes = config.schedule.data_interval_minutes,
        insight_interval_hours = config.schedule.insight_interval_hours,
        "Weather producer started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    Scheduler::from_config(runner, &config.schedule).run(shutdown_rx).await;

    info!("Weather producer stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix. If no handler can be installed it
/// never resolves, so the service keeps running.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
