//! CLI plumbing for the `drost` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use drost_domain::config::{Config, ConfigSeverity};

#[derive(Debug, Parser)]
#[command(name = "drost", about = "Multi-channel conversation gateway", version)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "drost.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway (default).
    Serve,
    /// Config inspection.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and exit non-zero on errors.
    Validate,
    /// Print the effective config as TOML.
    Show,
}

/// Load the config file; a missing file yields the defaults.
pub fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found; using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)?;
    let config = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("config '{}' is invalid: {e}", path.display()))?;
    Ok(config)
}

/// Log validation issues; returns false when any is an error.
pub fn report_issues(config: &Config) -> bool {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}
