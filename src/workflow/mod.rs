//! Workflow orchestration.
//!
//! An [`Orchestrator`] turns one [`WorkflowRequest`] into exactly one run of
//! the external analysis routines and resolves the artifacts to hand back.
//! Runs share nothing but the output directory, so a failed run never
//! blocks the next one.

pub mod collaborators;

pub use collaborators::{CommandCollaborator, RegionAnalyzer, ReportAnalyzer, UploadAnalyzer};

use crate::artifacts::ArtifactLocator;
use crate::config::AnalysisConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::models::{
    ArtifactKind, JobContext, OutputArtifact, RegionRequest, UploadRequest, WorkflowRequest,
    WorkflowResponse,
};
use crate::retention::LeaseTable;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How download references are chosen after a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactResolution {
    /// Prefer the files the collaborators reported for this job; kinds they
    /// did not report fall back to the newest file on disk.
    #[default]
    JobScoped,
    /// Always return the newest file of each kind in the output directory.
    Latest,
}

/// The two workflow variants, for messages and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    Region,
    Upload,
}

impl WorkflowKind {
    pub fn success_message(&self) -> &'static str {
        match self {
            WorkflowKind::Region => "Shapefile analysis completed",
            WorkflowKind::Upload => "Upload & analysis complete",
        }
    }

    fn failure_prefix(&self) -> &'static str {
        match self {
            WorkflowKind::Region => "Shapefile error",
            WorkflowKind::Upload => "Upload analysis error",
        }
    }

    /// Convert a workflow result into the response shape returned to callers.
    pub fn respond(&self, result: WorkflowResult<Vec<String>>) -> WorkflowResponse {
        match result {
            Ok(links) => WorkflowResponse::completed(self.success_message(), links),
            Err(e) => {
                if e.is_user_error() {
                    warn!("{:?} workflow rejected: {}", self, e);
                } else {
                    error!("{:?} workflow failed: {}", self, e);
                }
                WorkflowResponse::failed(format!("❌ {}: {}", self.failure_prefix(), e))
            }
        }
    }
}

impl WorkflowRequest {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            WorkflowRequest::Region(_) => WorkflowKind::Region,
            WorkflowRequest::Upload(_) => WorkflowKind::Upload,
        }
    }
}

/// The external routines a run may call.
#[derive(Clone)]
pub struct Collaborators {
    pub region: Arc<dyn RegionAnalyzer>,
    pub upload: Arc<dyn UploadAnalyzer>,
    pub report: Arc<dyn ReportAnalyzer>,
}

impl Collaborators {
    /// Command-backed collaborators as configured in `[analysis]`.
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            region: Arc::new(CommandCollaborator::new("region analysis", config.region.clone())),
            upload: Arc::new(CommandCollaborator::new("upload analysis", config.upload.clone())),
            report: Arc::new(CommandCollaborator::new("report analysis", config.report.clone())),
        }
    }
}

/// Runs workflow requests against one output directory.
#[derive(Clone)]
pub struct Orchestrator {
    locator: ArtifactLocator,
    collaborators: Collaborators,
    resolution: ArtifactResolution,
    leases: Option<LeaseTable>,
}

impl Orchestrator {
    pub fn new(output_dir: impl Into<PathBuf>, collaborators: Collaborators) -> Self {
        Self {
            locator: ArtifactLocator::new(output_dir),
            collaborators,
            resolution: ArtifactResolution::default(),
            leases: None,
        }
    }

    pub fn with_resolution(mut self, resolution: ArtifactResolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Lease every artifact handed out so the sweeper keeps it for a while.
    pub fn with_leases(mut self, leases: LeaseTable) -> Self {
        self.leases = Some(leases);
        self
    }

    pub fn output_dir(&self) -> &Path {
        self.locator.output_dir()
    }

    /// Run `request` and return the retrieval references of its outputs,
    /// spreadsheet first.
    pub fn execute(&self, request: &WorkflowRequest) -> WorkflowResult<Vec<String>> {
        let job = JobContext::new(self.locator.output_dir());
        info!("Starting {} workflow, job {}", request.label(), job.job_id);

        let reported = match request {
            WorkflowRequest::Region(region) => self.run_region(&job, region)?,
            WorkflowRequest::Upload(upload) => self.run_upload(&job, upload)?,
        };

        let artifacts = self.resolve(&reported);
        if let Some(leases) = &self.leases {
            for artifact in &artifacts {
                leases.lease(&artifact.path);
            }
        }

        info!(
            "Job {} finished with {} artifact(s)",
            job.job_id,
            artifacts.len()
        );
        Ok(artifacts.iter().map(OutputArtifact::retrieval_reference).collect())
    }

    /// Workflow boundary: never fails, reports errors in the response.
    pub fn run(&self, request: &WorkflowRequest) -> WorkflowResponse {
        request.kind().respond(self.execute(request))
    }

    fn run_region(&self, job: &JobContext, request: &RegionRequest) -> WorkflowResult<Vec<PathBuf>> {
        debug!(
            "Region type: {}, regions: {:?}, years: {:?}",
            request.region_type, request.region_names, request.years
        );

        let spreadsheet = self
            .collaborators
            .region
            .analyze_regions(job, request)
            .map_err(|e| WorkflowError::collaborator("region analysis", e))?;

        if spreadsheet.as_os_str().is_empty() || !spreadsheet.is_file() {
            return Err(WorkflowError::missing_artifact(spreadsheet));
        }
        info!("Spreadsheet created at: {}", spreadsheet.display());

        let mut produced = self
            .collaborators
            .report
            .analyze_report(job, &spreadsheet)
            .map_err(|e| WorkflowError::collaborator("report analysis", e))?;

        produced.insert(0, spreadsheet);
        Ok(produced)
    }

    fn run_upload(&self, job: &JobContext, request: &UploadRequest) -> WorkflowResult<Vec<PathBuf>> {
        let source = &request.source_path;
        if !source.is_file() {
            return Err(WorkflowError::missing_artifact(source.clone()));
        }
        debug!("File to be analyzed: {}", source.display());

        let mut produced = self
            .collaborators
            .upload
            .analyze_upload(job, source)
            .map_err(|e| WorkflowError::collaborator("upload analysis", e))?;

        produced.extend(
            self.collaborators
                .report
                .analyze_report(job, source)
                .map_err(|e| WorkflowError::collaborator("report analysis", e))?,
        );

        Ok(produced)
    }

    fn resolve(&self, reported: &[PathBuf]) -> Vec<OutputArtifact> {
        match self.resolution {
            ArtifactResolution::Latest => self.locator.latest_outputs(),
            ArtifactResolution::JobScoped => {
                let scoped = self.locator.resolve_reported(reported);

                ArtifactKind::ALL
                    .into_iter()
                    .filter_map(|kind| {
                        scoped.iter().find(|a| a.kind == kind).cloned().or_else(|| {
                            debug!("No {} reported for this job, using newest on disk", kind);
                            self.locator.latest(kind)
                        })
                    })
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use std::fs::{self, File};
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    /// Writes `<job>.xlsx` into the output dir and records what it was asked.
    #[derive(Default)]
    struct RecordingRegion {
        calls: Mutex<Vec<RegionRequest>>,
        returned: Mutex<Option<PathBuf>>,
    }

    impl RegionAnalyzer for RecordingRegion {
        fn analyze_regions(&self, job: &JobContext, request: &RegionRequest) -> Result<PathBuf> {
            self.calls.lock().unwrap().push(request.clone());
            if let Some(path) = self.returned.lock().unwrap().clone() {
                return Ok(path);
            }
            let path = job.output_dir.join(format!("{}.xlsx", job.job_id));
            fs::write(&path, b"sheet")?;
            Ok(path)
        }
    }

    /// Writes `<stem>.pdf` next to the outputs; optionally reports it.
    struct PdfReport {
        report_outputs: bool,
        calls: Mutex<Vec<PathBuf>>,
    }

    impl PdfReport {
        fn new(report_outputs: bool) -> Self {
            Self {
                report_outputs,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl ReportAnalyzer for PdfReport {
        fn analyze_report(&self, job: &JobContext, spreadsheet: &Path) -> Result<Vec<PathBuf>> {
            self.calls.lock().unwrap().push(spreadsheet.to_path_buf());
            let stem = spreadsheet.file_stem().unwrap().to_string_lossy().to_string();
            let pdf = job.output_dir.join(format!("{}.pdf", stem));
            fs::write(&pdf, b"%PDF")?;
            Ok(if self.report_outputs { vec![pdf] } else { Vec::new() })
        }
    }

    #[derive(Default)]
    struct RecordingUpload {
        calls: Mutex<Vec<PathBuf>>,
    }

    impl UploadAnalyzer for RecordingUpload {
        fn analyze_upload(&self, job: &JobContext, source: &Path) -> Result<Vec<PathBuf>> {
            self.calls.lock().unwrap().push(source.to_path_buf());
            let path = job.output_dir.join(format!("{}.xlsx", job.job_id));
            fs::write(&path, b"sheet")?;
            Ok(vec![path])
        }
    }

    struct Failing;

    impl RegionAnalyzer for Failing {
        fn analyze_regions(&self, _job: &JobContext, _request: &RegionRequest) -> Result<PathBuf> {
            Err(anyhow!("shapefile for region not found"))
        }
    }

    struct Fixture {
        dir: TempDir,
        region: Arc<RecordingRegion>,
        upload: Arc<RecordingUpload>,
        report: Arc<PdfReport>,
    }

    impl Fixture {
        fn new(report_outputs: bool) -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                region: Arc::new(RecordingRegion::default()),
                upload: Arc::new(RecordingUpload::default()),
                report: Arc::new(PdfReport::new(report_outputs)),
            }
        }

        fn orchestrator(&self) -> Orchestrator {
            Orchestrator::new(
                self.dir.path(),
                Collaborators {
                    region: self.region.clone(),
                    upload: self.upload.clone(),
                    report: self.report.clone(),
                },
            )
        }
    }

    fn region_request(names: &str, years: &str) -> WorkflowRequest {
        WorkflowRequest::Region(RegionRequest::parse("state", names, years).unwrap())
    }

    fn write_with_mtime(path: &Path, mtime: SystemTime) {
        fs::write(path, b"foreign").unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    #[test]
    fn test_region_workflow_passes_normalized_selection() {
        let fixture = Fixture::new(true);
        let request = WorkflowRequest::Region(
            RegionRequest::parse(" State ", "Texas, Oklahoma", "2019,2020").unwrap(),
        );

        let links = fixture.orchestrator().execute(&request).unwrap();

        let calls = fixture.region.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].region_type, "state");
        assert_eq!(calls[0].region_names, vec!["Texas", "Oklahoma"]);
        assert_eq!(calls[0].years, vec![2019, 2020]);

        assert_eq!(links.len(), 2);
        assert!(links[0].ends_with(".xlsx"));
        assert!(links[1].ends_with(".pdf"));
        assert_eq!(fixture.report.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_spreadsheet_is_reported_with_path() {
        let fixture = Fixture::new(true);
        let ghost = fixture.dir.path().join("ghost.xlsx");
        *fixture.region.returned.lock().unwrap() = Some(ghost.clone());

        let err = fixture
            .orchestrator()
            .execute(&region_request("Texas", "2020"))
            .unwrap_err();

        assert!(matches!(err, WorkflowError::MissingArtifact { ref path } if *path == ghost));
        assert!(fixture.report.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_spreadsheet_path_is_missing_artifact() {
        let fixture = Fixture::new(true);
        *fixture.region.returned.lock().unwrap() = Some(PathBuf::new());

        let err = fixture
            .orchestrator()
            .execute(&region_request("Texas", "2020"))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::MissingArtifact { .. }));
    }

    #[test]
    fn test_collaborator_failure_becomes_structured_response() {
        let fixture = Fixture::new(true);
        let orchestrator = Orchestrator::new(
            fixture.dir.path(),
            Collaborators {
                region: Arc::new(Failing),
                upload: fixture.upload.clone(),
                report: fixture.report.clone(),
            },
        );

        let response = orchestrator.run(&region_request("Texas", "2020"));
        assert!(!response.success);
        assert!(response.message.starts_with("❌ Shapefile error: region analysis failed"));
        assert!(response.message.contains("shapefile for region not found"));
        assert!(response.download_links.is_empty());

        // The failure leaves nothing behind that affects the next run.
        let response = fixture.orchestrator().run(&region_request("Texas", "2020"));
        assert!(response.success);
        assert_eq!(response.message, "Shapefile analysis completed");
    }

    #[test]
    fn test_upload_workflow_requires_existing_source() {
        let fixture = Fixture::new(true);
        let request = WorkflowRequest::Upload(UploadRequest {
            source_path: fixture.dir.path().join("never-uploaded.xlsx"),
        });

        let response = fixture.orchestrator().run(&request);
        assert!(!response.success);
        assert!(response.message.starts_with("❌ Upload analysis error:"));
        assert!(fixture.upload.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_upload_workflow_analyzes_given_path() {
        let fixture = Fixture::new(true);
        let uploads = TempDir::new().unwrap();
        let source = uploads.path().join("abc_user.xlsx");
        fs::write(&source, b"user sheet").unwrap();

        let request = WorkflowRequest::Upload(UploadRequest {
            source_path: source.clone(),
        });
        let response = fixture.orchestrator().run(&request);

        assert!(response.success, "{}", response.message);
        assert_eq!(response.message, "Upload & analysis complete");
        assert_eq!(*fixture.upload.calls.lock().unwrap(), vec![source.clone()]);
        assert_eq!(*fixture.report.calls.lock().unwrap(), vec![source]);
        assert_eq!(response.download_links.len(), 2);
    }

    #[test]
    fn test_job_scoped_resolution_ignores_newer_foreign_outputs() {
        let fixture = Fixture::new(true);
        let future = SystemTime::now() + Duration::from_secs(600);
        write_with_mtime(&fixture.dir.path().join("zz-other-job.xlsx"), future);
        write_with_mtime(&fixture.dir.path().join("zz-other-job.pdf"), future);

        let links = fixture
            .orchestrator()
            .execute(&region_request("Texas", "2020"))
            .unwrap();
        assert!(links.iter().all(|l| !l.contains("zz-other-job")), "{:?}", links);

        let latest = fixture
            .orchestrator()
            .with_resolution(ArtifactResolution::Latest)
            .execute(&region_request("Texas", "2020"))
            .unwrap();
        assert_eq!(
            latest,
            vec!["/download/zz-other-job.xlsx", "/download/zz-other-job.pdf"]
        );
    }

    #[test]
    fn test_unreported_kind_falls_back_to_newest_on_disk() {
        let fixture = Fixture::new(false);

        let links = fixture
            .orchestrator()
            .execute(&region_request("Texas", "2020"))
            .unwrap();

        assert_eq!(links.len(), 2);
        let stem = links[0]
            .trim_start_matches("/download/")
            .trim_end_matches(".xlsx")
            .to_string();
        assert_eq!(links[1], format!("/download/{}.pdf", stem));
    }

    #[test]
    fn test_returned_artifacts_are_leased() {
        let fixture = Fixture::new(true);
        let leases = LeaseTable::new(Duration::from_secs(300));
        let orchestrator = fixture.orchestrator().with_leases(leases.clone());

        orchestrator.execute(&region_request("Texas", "2020")).unwrap();

        assert_eq!(leases.len(), 2);
        for entry in fs::read_dir(fixture.dir.path()).unwrap().flatten() {
            assert!(leases.is_leased(&entry.path()));
        }
    }
}
