use anyhow::Result;
use bpi_scraper::core::layout::{DATETIME_LAYOUT, Layout, RFC3339_LAYOUT};
use bpi_scraper::core::log::init_logging;
use bpi_scraper::pipeline::PipelineSettings;
use bpi_scraper::providers::coindesk::DEFAULT_URL;
use bpi_scraper::store::DEFAULT_TABLE;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Continually scrapes the bpi index for bitcoin pricing data
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Url to download bpi values from
    #[arg(short, long, default_value = DEFAULT_URL)]
    url: String,

    /// Format of the input datetime (reference layout or strftime)
    #[arg(short, long = "in-fmt", default_value = RFC3339_LAYOUT)]
    in_fmt: Layout,

    /// Format of the output datetime (reference layout or strftime)
    #[arg(short, long = "out-fmt", default_value = DATETIME_LAYOUT)]
    out_fmt: Layout,

    /// Account section of the database config to write with
    #[arg(short, long, default_value = "bitcoin_writer")]
    account: String,

    /// Path to the database config file
    #[arg(short, long)]
    config_path: Option<PathBuf>,

    /// Table the rows are appended to
    #[arg(short, long, default_value = DEFAULT_TABLE)]
    table: String,

    /// Seconds to sleep between polls
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                let _ = shutdown_tx.send(());
            }
            Err(e) => {
                warn!(error = %e, "Could not install signal handlers");
                // Keep the sender alive so the poll loop is not told to stop.
                std::future::pending::<()>().await;
            }
        }
    });

    let options = bpi_scraper::RunOptions {
        config_path: cli.config_path,
        account: cli.account,
        table: cli.table,
        settings: PipelineSettings::new(&cli.url, cli.in_fmt, cli.out_fmt)
            .with_interval(Duration::from_secs(cli.interval)),
    };

    let result = bpi_scraper::run(options, shutdown_rx).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
