mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "subharvest", version, about = "Adaptive subgraph extraction service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run extraction passes until interrupted (or once, per config)
    Run {
        /// Path to harvest YAML file
        config: PathBuf,
    },
    /// Validate configuration and query catalog coverage
    Check {
        /// Path to harvest YAML file
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { config } => commands::run::execute(&config).await,
        Commands::Check { config } => commands::check::execute(&config),
    }
}
