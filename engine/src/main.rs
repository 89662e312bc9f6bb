// Quire plugin host
// Main entry point for the quire binary

use clap::Parser;
use quire_engine::cli::{Cli, Command};
use quire_engine::config::Config;
use quire_engine::handlers::{
    handle_inspect, handle_load, handle_scan, handle_settings, handle_verify, OutputFormat,
};
use quire_engine::lifecycle::LifecycleManager;
use quire_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log overrides the configured level; RUST_LOG overrides both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Quire v{} ({} - {})", version, commit, timestamp);
    tracing::debug!(
        host_version = %config.plugins.host_version,
        locations = ?config.plugins.locations,
        "Configuration loaded"
    );

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let manager = LifecycleManager::from_config(&config)?;

    // Handle commands
    match cli.command {
        Command::Scan => handle_scan(&manager, format).await,
        Command::Inspect { id } => handle_inspect(&id, &manager, format).await,
        Command::Verify { id } => handle_verify(&id, &manager, format).await,
        Command::Load { id, invoke } => {
            handle_load(&id, invoke.as_deref(), &manager, format).await
        }
        Command::Settings { id, set, clear } => {
            handle_settings(&id, set.as_deref(), clear, &manager, format).await
        }
    }
}
