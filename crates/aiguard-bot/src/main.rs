//! aiguard - Entry Point

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Resilience and readiness layer for the AI trading assistant
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via AIGUARD_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    aiguard_telemetry::init_logging()?;

    info!("Starting aiguard v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > AIGUARD_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("AIGUARD_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = aiguard_bot::AppConfig::load(&config_path)?;

    let app = aiguard_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
