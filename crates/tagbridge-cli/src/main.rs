/*!
 * TagBridge command line.
 *
 * Loads the gateway configuration from a TOML file and `TAGBRIDGE__*`
 * environment variables, then runs one of the subcommands.
 */
mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;

use tagbridge_core::config::{Config, ConfigBuilder};
use tagbridge_core::logging;
use tagbridge_devices::DriverRegistry;

use crate::cli::{Cli, Commands};

/// Environment prefix for configuration overrides
const ENV_PREFIX: &str = "TAGBRIDGE";

fn load_config(cli: &Cli) -> Result<Config> {
    let mut builder = ConfigBuilder::new();
    if let Some(path) = &cli.config {
        builder = builder.with_config_file(path);
    }
    builder
        .with_environment_prefix(ENV_PREFIX)
        .build()
        .context("Failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli)?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    logging::init_with_config(&config.logging)?;

    let registry = DriverRegistry::with_builtin_drivers();
    match &cli.command {
        Commands::Run => commands::run(&config, &registry).await,
        Commands::Tree => commands::tree(&config, &registry).await,
        Commands::Read { path } => commands::read(&config, &registry, path).await,
        Commands::Check => commands::check(&config, &registry),
    }
}
