//! CLI argument definitions for the CrewDesk application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// CrewDesk: technician shift scheduling and customer chat assignment.
#[derive(Parser, Debug)]
#[command(name = "crewdesk", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the SQLite database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Seconds between shift sweep passes.
    #[arg(long = "sweep-interval", global = true)]
    pub sweep_interval: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the shift sweeper and failover worker until Ctrl-C (default).
    Serve,
    /// Run one sweep pass and print the report as JSON.
    Sweep,
    /// List shifts that would block a technician from a time window.
    Conflicts {
        /// Technician user id.
        #[arg(long)]
        technician: Uuid,
        /// Window start (RFC 3339).
        #[arg(long)]
        start: DateTime<Utc>,
        /// Window end (RFC 3339), exclusive.
        #[arg(long)]
        end: DateTime<Utc>,
        /// Shift id to leave out, e.g. the shift being edited.
        #[arg(long)]
        exclude: Option<Uuid>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CREWDESK_CONFIG env var > ~/.crewdesk/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CREWDESK_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Returns `None` if not overridden (use config value).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level.
    ///
    /// Returns `None` if not overridden.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".crewdesk").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".crewdesk").join("config.toml");
    }
    PathBuf::from("config.toml")
}
