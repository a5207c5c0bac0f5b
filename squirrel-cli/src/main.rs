use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "squirrel", about = "Squirrel wiki administration")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Plugin directory (overrides configuration files)
    #[arg(long, global = true, value_name = "DIR")]
    plugin_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage plugins
    Plugin(commands::plugin::PluginArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = config::ConfigLoader::load()?;
    let host_config = config.host_config(cli.plugin_dir);

    match cli.command {
        Commands::Plugin(args) => commands::plugin::run(args, host_config).await,
    }
}
