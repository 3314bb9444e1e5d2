//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::workflow::ArtifactResolution;
use clap::Parser;
use std::path::PathBuf;

/// ClimEasy - rainfall analysis workflow server
///
/// Runs region or uploaded-spreadsheet analyses through external routines,
/// serves the produced spreadsheets and reports for download, and sweeps
/// stale files from the upload and output directories.
///
/// Examples:
///   climeasy
///   climeasy --port 8080 --output-dir /srv/climeasy/outputs
///   climeasy --sweep-once --max-age-seconds 600
///   climeasy --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .climeasy.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, value_name = "PORT", env = "PORT")]
    pub port: Option<u16>,

    /// Directory for uploaded spreadsheets
    #[arg(long, value_name = "DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Directory the analysis routines write artifacts into
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Delete files older than this many seconds
    #[arg(long, value_name = "SECS")]
    pub max_age_seconds: Option<u64>,

    /// Seconds between two retention sweeps
    #[arg(long, value_name = "SECS")]
    pub sweep_interval_seconds: Option<u64>,

    /// How download links are chosen after a run
    #[arg(long, value_name = "MODE")]
    pub resolution: Option<ArtifactResolution>,

    /// Do not start background retention sweepers
    #[arg(long, conflicts_with = "sweep_once")]
    pub no_sweeper: bool,

    /// Sweep both directories once and exit
    #[arg(long)]
    pub sweep_once: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .climeasy.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.port == Some(0) {
            return Err("Port must be between 1 and 65535".to_string());
        }

        if self.sweep_interval_seconds == Some(0) {
            return Err("Sweep interval must be at least 1 second".to_string());
        }

        if let Some(ref config) = self.config {
            if !config.is_file() {
                return Err(format!("Config file does not exist: {}", config.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
