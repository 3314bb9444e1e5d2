//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.climeasy.toml` files.

use crate::models::RetentionPolicy;
use crate::workflow::ArtifactResolution;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".climeasy.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Upload and output directories.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Retention sweeping settings.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// External analysis routines.
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

/// Directory layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where uploaded spreadsheets are stored.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Where the analysis routines write their artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data").join("outputs")
}

/// Retention sweeping settings, applied to both directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Run background sweepers.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Files older than this many seconds are deleted.
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,

    /// Seconds between two sweeps of the same directory.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// Seconds a handed-out download stays protected from sweeping.
    #[serde(default = "default_lease_grace")]
    pub lease_grace_seconds: u64,

    /// Sweep both directories once before serving.
    #[serde(default = "default_true")]
    pub sweep_on_startup: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_seconds: default_max_age(),
            sweep_interval_seconds: default_sweep_interval(),
            lease_grace_seconds: default_lease_grace(),
            sweep_on_startup: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_age() -> u64 {
    3600 // 1 hour
}

fn default_sweep_interval() -> u64 {
    1800 // 30 min
}

fn default_lease_grace() -> u64 {
    300
}

impl RetentionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn lease_grace(&self) -> Duration {
        Duration::from_secs(self.lease_grace_seconds)
    }
}

/// External program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable to run.
    pub program: String,

    /// Arguments placed before the per-call arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory; inherits the server's when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    fn python(script: &str) -> Self {
        Self {
            program: "python3".to_string(),
            args: vec![script.to_string()],
            working_dir: None,
        }
    }
}

/// Analysis routine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// How download links are picked after a run.
    #[serde(default)]
    pub resolution: ArtifactResolution,

    /// Region + year analysis producing a spreadsheet.
    #[serde(default = "default_region_command")]
    pub region: CommandSpec,

    /// Analysis of an uploaded spreadsheet.
    #[serde(default = "default_upload_command")]
    pub upload: CommandSpec,

    /// Report rendering from a spreadsheet.
    #[serde(default = "default_report_command")]
    pub report: CommandSpec,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            resolution: ArtifactResolution::default(),
            region: default_region_command(),
            upload: default_upload_command(),
            report: default_report_command(),
        }
    }
}

fn default_region_command() -> CommandSpec {
    CommandSpec::python("analysis/region_rainfall.py")
}

fn default_upload_command() -> CommandSpec {
    CommandSpec::python("analysis/uploaded_rainfall.py")
}

fn default_report_command() -> CommandSpec {
    CommandSpec::python("analysis/rainfall_report.py")
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref host) = args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref dir) = args.upload_dir {
            self.storage.upload_dir = dir.clone();
        }
        if let Some(ref dir) = args.output_dir {
            self.storage.output_dir = dir.clone();
        }

        if let Some(max_age) = args.max_age_seconds {
            self.retention.max_age_seconds = max_age;
        }
        if let Some(interval) = args.sweep_interval_seconds {
            self.retention.sweep_interval_seconds = interval;
        }
        if args.no_sweeper {
            self.retention.enabled = false;
        }

        if let Some(resolution) = args.resolution {
            self.analysis.resolution = resolution;
        }
    }

    /// Reject settings the server cannot run with.
    ///
    /// Called after CLI overrides are merged, so values from the file and
    /// from flags are checked the same way.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be between 1 and 65535");
        }
        if self.retention.sweep_interval_seconds == 0 {
            bail!("retention.sweep_interval_seconds must be at least 1");
        }
        if self.analysis.region.program.trim().is_empty()
            || self.analysis.upload.program.trim().is_empty()
            || self.analysis.report.program.trim().is_empty()
        {
            bail!("analysis commands need a program");
        }
        Ok(())
    }

    /// One policy per managed directory: outputs first, then uploads.
    pub fn retention_policies(&self) -> Vec<RetentionPolicy> {
        [&self.storage.output_dir, &self.storage.upload_dir]
            .into_iter()
            .map(|dir| {
                RetentionPolicy::new(
                    dir.clone(),
                    self.retention.max_age(),
                    self.retention.sweep_interval(),
                )
            })
            .collect()
    }

    /// Socket address string for the HTTP listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
