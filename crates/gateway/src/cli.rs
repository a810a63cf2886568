//! Command-line interface for the `colonyd` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use colony_domain::config::Config;

#[derive(Debug, Parser)]
#[command(name = "colonyd", about = "Colony agent runtime", version)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "colony.toml")]
    pub config: PathBuf,

    /// Override the configured listen port.
    #[arg(long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway (the default when no subcommand is given).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version and exit.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the configuration file and report issues.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

/// Load the config file, falling back to defaults when it is absent.
pub fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        tracing::info!(path = %cli.config.display(), "config file not found, using defaults");
        Config::default()
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    Ok(config)
}
