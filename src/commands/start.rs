use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use syslog_exporter::{config, init_tracing, server};
use tracing::info;

/// Execute the start command
///
/// Loads configuration, initializes logging from it and runs the exporter
/// until a shutdown signal arrives.
pub async fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Starting syslog exporter...".green());

    let cfg = config::load_config(config_path)?;
    init_tracing(&cfg.server.log_level, cfg.server.log_format == "json");

    info!(config = %config_path.display(), "Configuration loaded");

    // Blocks until shutdown
    server::start_server(cfg).await?;

    Ok(())
}
