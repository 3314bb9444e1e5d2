//! Contracts of the external analysis routines.
//!
//! The orchestrator only knows these traits. The binary wires them to
//! [`CommandCollaborator`], which runs a configured external program per
//! call; tests plug in in-memory stubs.

use crate::config::CommandSpec;
use crate::models::{JobContext, RegionRequest};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info};

/// Environment variable carrying the job identifier.
pub const JOB_ID_ENV: &str = "CLIMEASY_JOB_ID";
/// Environment variable carrying the output directory.
pub const OUTPUT_DIR_ENV: &str = "CLIMEASY_OUTPUT_DIR";

const STDERR_TAIL_LINES: usize = 5;

/// Turns a region + year selection into a spreadsheet.
pub trait RegionAnalyzer: Send + Sync {
    /// Returns the path of the spreadsheet it created.
    fn analyze_regions(&self, job: &JobContext, request: &RegionRequest) -> Result<PathBuf>;
}

/// Analyzes a user-uploaded spreadsheet.
pub trait UploadAnalyzer: Send + Sync {
    /// Returns the artifacts it produced, or an empty list when unknown.
    fn analyze_upload(&self, job: &JobContext, source: &Path) -> Result<Vec<PathBuf>>;
}

/// Renders the report for a spreadsheet.
pub trait ReportAnalyzer: Send + Sync {
    /// Returns the artifacts it produced, or an empty list when unknown.
    fn analyze_report(&self, job: &JobContext, spreadsheet: &Path) -> Result<Vec<PathBuf>>;
}

/// Runs an external program for each collaborator call.
///
/// The job id and output directory are exported as `CLIMEASY_JOB_ID` and
/// `CLIMEASY_OUTPUT_DIR`. Stdout is read line by line: a region run reports
/// its spreadsheet on the last non-empty line, other runs may list the files
/// they produced.
#[derive(Debug, Clone)]
pub struct CommandCollaborator {
    name: &'static str,
    spec: CommandSpec,
}

impl CommandCollaborator {
    pub fn new(name: &'static str, spec: CommandSpec) -> Self {
        Self { name, spec }
    }

    fn run(&self, job: &JobContext, extra_args: &[String]) -> Result<Vec<PathBuf>> {
        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .args(extra_args)
            .env(JOB_ID_ENV, job.job_id.to_string())
            .env(OUTPUT_DIR_ENV, &job.output_dir);

        if let Some(dir) = &self.spec.working_dir {
            command.current_dir(dir);
        }

        info!("Running {} for job {}", self.name, job.job_id);
        debug!("{} command: {} {:?} {:?}", self.name, self.spec.program, self.spec.args, extra_args);

        let output = command
            .output()
            .with_context(|| format!("Failed to spawn '{}'", self.spec.program))?;

        check_status(&self.spec.program, &output)?;

        let lines = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| self.resolve(line))
            .collect();

        Ok(lines)
    }

    /// Relative paths are printed from the child's working directory.
    fn resolve(&self, line: &str) -> PathBuf {
        let path = PathBuf::from(line);
        match &self.spec.working_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        }
    }
}

impl RegionAnalyzer for CommandCollaborator {
    fn analyze_regions(&self, job: &JobContext, request: &RegionRequest) -> Result<PathBuf> {
        let mut lines = self.run(job, &region_args(request))?;

        Ok(lines.pop().unwrap_or_default())
    }
}

impl UploadAnalyzer for CommandCollaborator {
    fn analyze_upload(&self, job: &JobContext, source: &Path) -> Result<Vec<PathBuf>> {
        let lines = self.run(job, &[source.to_string_lossy().to_string()])?;
        Ok(existing_files(lines))
    }
}

impl ReportAnalyzer for CommandCollaborator {
    fn analyze_report(&self, job: &JobContext, spreadsheet: &Path) -> Result<Vec<PathBuf>> {
        let lines = self.run(job, &[spreadsheet.to_string_lossy().to_string()])?;
        Ok(existing_files(lines))
    }
}

/// Command-line arguments describing a region selection.
pub fn region_args(request: &RegionRequest) -> Vec<String> {
    let mut args = vec!["--region-type".to_string(), request.region_type.clone()];

    for name in &request.region_names {
        args.push("--region".to_string());
        args.push(name.clone());
    }

    let years: Vec<String> = request.years.iter().map(|y| y.to_string()).collect();
    args.push("--years".to_string());
    args.push(years.join(","));

    args
}

fn existing_files(lines: Vec<PathBuf>) -> Vec<PathBuf> {
    lines.into_iter().filter(|p| p.is_file()).collect()
}

fn check_status(program: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");

    if tail.is_empty() {
        bail!("'{}' exited with {}", program, output.status);
    }
    bail!("'{}' exited with {}: {}", program, output.status, tail);
}
