use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use syslog_exporter::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let command = args.get_command();

    // The server configures logging from its own config file
    if !matches!(command, cli::Commands::Start) {
        init_tracing("warn", false);
    }

    match command {
        cli::Commands::Start => {
            commands::start::execute(&args.config).await?;
        }
        cli::Commands::Test => {
            commands::test::execute(&args.config)?;
        }
        cli::Commands::Parse { payload } => {
            commands::parse::execute(payload)?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config)?,
        },
        cli::Commands::Version => {
            println!("syslog-exporter v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
