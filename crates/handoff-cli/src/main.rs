use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

mod config;
mod sub_commands;

/// Inspect handoff frames and run transfers on a simulated mesh
#[derive(Parser)]
#[command(name = "handoff-cli")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the settings file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Logging level
    #[arg(short, long, default_value = "error")]
    log_level: Level,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a frame as received from the transport
    Decode(sub_commands::decode::DecodeSubCommand),
    /// Run one transfer between two simulated devices
    Simulate(sub_commands::simulate::SimulateSubCommand),
    /// Print the effective settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Cli = Cli::parse();
    let default_filter = args.log_level;

    let env_filter = EnvFilter::new(format!("{},handoff_fake=warn", default_filter));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let settings = config::Settings::new(args.config.clone())?;

    match &args.command {
        Commands::Decode(sub_command_args) => sub_commands::decode::decode(sub_command_args),
        Commands::Simulate(sub_command_args) => {
            sub_commands::simulate::simulate(&settings, sub_command_args).await
        }
        Commands::Config => sub_commands::show_config::show_config(&settings),
    }
}
