//! Paper trader entry point.

use anyhow::Result;
use clap::Parser;
use paper_app::config::DEFAULT_CONFIG_PATH;
use tracing::info;

/// Paper trader streaming live market prices
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PAPER_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS provider must be installed before any connection
    paper_ws::init_crypto();

    let args = Args::parse();

    paper_telemetry::init_logging()?;

    info!("Starting paper trader v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > PAPER_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("PAPER_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = paper_app::AppConfig::load(&config_path)?;
    info!(
        url = %config.feed.url,
        instruments = config.instruments.len(),
        positions = config.positions.len(),
        "Configuration loaded"
    );

    let app = paper_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}
