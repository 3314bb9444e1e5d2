//! Data models for the workflow service.
//!
//! This module contains the request, artifact and policy types shared by
//! the orchestrator, the artifact locator and the retention sweeper.

use crate::error::{WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Delimiter used by the region and year form fields.
pub const FIELD_DELIMITER: char = ',';

/// Rejection text for a selection without any region.
pub const NO_REGIONS: &str = "❌ No valid regions selected.";
/// Rejection text for a selection without any usable year.
pub const NO_YEARS: &str = "❌ No valid years selected.";

/// URL prefix of artifact retrieval references.
pub const DOWNLOAD_PREFIX: &str = "/download/";

/// A request to run one of the two analysis workflows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowRequest {
    /// Region + year selection handed to the region analysis.
    Region(RegionRequest),
    /// A spreadsheet already persisted by the upload store.
    Upload(UploadRequest),
}

impl WorkflowRequest {
    /// Short label used in logs and failure messages.
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowRequest::Region(_) => "region",
            WorkflowRequest::Upload(_) => "upload",
        }
    }
}

/// A normalized region selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRequest {
    /// Lowercase, trimmed, spaces replaced by underscores.
    pub region_type: String,
    /// Trimmed, non-empty region names in request order.
    pub region_names: Vec<String>,
    /// Years in request order.
    pub years: Vec<i32>,
}

impl RegionRequest {
    /// Build a region request from the raw form fields.
    ///
    /// Fails with `InvalidRequest` when no region survives trimming, when the
    /// year field is blank, or when it holds no digit-only token.
    pub fn parse(region_type: &str, region_names: &str, years: &str) -> WorkflowResult<Self> {
        let region_type = normalize_region_type(region_type);
        let region_names = parse_region_names(region_names);

        if region_names.is_empty() {
            return Err(WorkflowError::invalid_request(NO_REGIONS));
        }

        let years_field = years.trim();
        if years_field.is_empty() {
            return Err(WorkflowError::invalid_request(NO_YEARS));
        }

        let years = parse_years(years_field);
        if years.is_empty() {
            return Err(WorkflowError::invalid_request(NO_YEARS));
        }

        Ok(Self {
            region_type,
            region_names,
            years,
        })
    }
}

/// Lowercase, trim and replace inner spaces with underscores.
pub fn normalize_region_type(raw: &str) -> String {
    raw.to_lowercase().trim().replace(' ', "_")
}

/// Split a delimited list of names, dropping blank entries.
pub fn parse_region_names(raw: &str) -> Vec<String> {
    raw.split(FIELD_DELIMITER)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

/// Parse a delimited year list, keeping only digit-only tokens.
///
/// Non-numeric tokens are discarded silently, so a string with no numeric
/// token yields an empty list rather than an error.
pub fn parse_years(raw: &str) -> Vec<i32> {
    raw.split(FIELD_DELIMITER)
        .map(str::trim)
        .filter(|token| !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|token| token.parse().ok())
        .collect()
}

/// A request to analyze a previously stored upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// Path returned by the upload store.
    pub source_path: PathBuf,
}

impl From<&UploadedFile> for UploadRequest {
    fn from(file: &UploadedFile) -> Self {
        Self {
            source_path: file.stored_path.clone(),
        }
    }
}

/// A file persisted by the upload store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Name supplied by the client.
    pub original_name: String,
    /// Absolute, collision-free location under the upload directory.
    pub stored_path: PathBuf,
    /// When the file was written.
    pub created_at: DateTime<Utc>,
}

/// Kind of output artifact produced by the analysis routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Excel workbook with the extracted rainfall series.
    Spreadsheet,
    /// PDF report rendered from the spreadsheet.
    ReportDocument,
}

impl ArtifactKind {
    /// Lookup order used when combining the latest outputs.
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Spreadsheet, ArtifactKind::ReportDocument];

    /// File extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Spreadsheet => "xlsx",
            ArtifactKind::ReportDocument => "pdf",
        }
    }

    /// Classify a path by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.extension() == ext)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Spreadsheet => write!(f, "Spreadsheet"),
            ArtifactKind::ReportDocument => write!(f, "Report document"),
        }
    }
}

/// An output file discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub modified_at: DateTime<Utc>,
}

impl OutputArtifact {
    /// File name component, lossily converted.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Reference a caller uses to fetch the artifact bytes.
    pub fn retrieval_reference(&self) -> String {
        format!("{}{}", DOWNLOAD_PREFIX, self.file_name())
    }
}

/// Age-based deletion rule for one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub directory: PathBuf,
    /// Files strictly older than this are deleted.
    pub max_age: Duration,
    /// Pause between two sweeps.
    pub sweep_interval: Duration,
}

impl RetentionPolicy {
    pub fn new(directory: impl Into<PathBuf>, max_age: Duration, sweep_interval: Duration) -> Self {
        Self {
            directory: directory.into(),
            max_age,
            sweep_interval,
        }
    }

    /// Whether a file last modified at `modified` has expired at `now`.
    ///
    /// A modification time in the future counts as age zero.
    pub fn is_expired(&self, modified: SystemTime, now: SystemTime) -> bool {
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        age > self.max_age
    }
}

/// Per-run identity handed to every collaborator call.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    /// Directory the collaborators are expected to write artifacts into.
    pub output_dir: PathBuf,
}

impl JobContext {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            output_dir: output_dir.into(),
        }
    }
}

/// Structured workflow outcome returned to HTTP callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub download_links: Vec<String>,
}

impl WorkflowResponse {
    pub fn completed(message: impl Into<String>, download_links: Vec<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            download_links,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            download_links: Vec::new(),
        }
    }
}
