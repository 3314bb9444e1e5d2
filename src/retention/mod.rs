//! Time-based retention sweeping.
//!
//! A [`RetentionSweeper`] deletes files older than its policy's `max_age`
//! from one directory. It can run a single deterministic pass
//! ([`RetentionSweeper::sweep_once`], [`RetentionSweeper::sweep_at`]) or be
//! started as a background task that sweeps every `sweep_interval` until its
//! [`SweeperHandle`] is stopped or dropped.
//!
//! State cycle: `Idle -> Scanning -> Deleting -> Sleeping -> Scanning -> ...`,
//! ending in `Stopped` only through the handle.

pub mod lease;

pub use lease::LeaseTable;

use crate::error::WorkflowError;
use crate::models::RetentionPolicy;
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Where a sweeper is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweeperState {
    Idle,
    Scanning,
    Deleting,
    Sleeping,
    Stopped,
}

impl fmt::Display for SweeperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SweeperState::Idle => "idle",
            SweeperState::Scanning => "scanning",
            SweeperState::Deleting => "deleting",
            SweeperState::Sleeping => "sleeping",
            SweeperState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of one sweep over a directory.
#[derive(Debug)]
pub struct SweepReport {
    pub directory: PathBuf,
    /// Regular files found directly under the directory.
    pub scanned: usize,
    /// Files removed in this pass.
    pub deleted: Vec<PathBuf>,
    /// Expired files kept because a download lease is still live.
    pub leased: usize,
    /// Per-file deletion failures; never abort the pass.
    pub failures: Vec<WorkflowError>,
}

impl SweepReport {
    fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
            scanned: 0,
            deleted: Vec::new(),
            leased: 0,
            failures: Vec::new(),
        }
    }

    /// Files left in place (fresh, leased or failed to delete).
    pub fn retained(&self) -> usize {
        self.scanned - self.deleted.len()
    }
}

/// Deletes expired files from one directory.
#[derive(Debug)]
pub struct RetentionSweeper {
    policy: RetentionPolicy,
    leases: Option<LeaseTable>,
    state: Arc<watch::Sender<SweeperState>>,
}

impl RetentionSweeper {
    pub fn new(policy: RetentionPolicy) -> Self {
        let (state, _) = watch::channel(SweeperState::Idle);
        Self {
            policy,
            leases: None,
            state: Arc::new(state),
        }
    }

    /// Skip files leased in `leases` until their grace window ends.
    pub fn with_leases(mut self, leases: LeaseTable) -> Self {
        self.leases = Some(leases);
        self
    }

    pub fn state(&self) -> SweeperState {
        *self.state.borrow()
    }

    /// Run one pass using the current wall clock.
    pub fn sweep_once(&self) -> SweepReport {
        self.sweep_at(SystemTime::now())
    }

    /// Run one pass, treating `now` as the current time for age checks.
    pub fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let directory = &self.policy.directory;
        let mut report = SweepReport::new(directory);

        self.set_state(SweeperState::Scanning);
        let expired = self.collect_expired(now, &mut report);

        self.set_state(SweeperState::Deleting);
        delete_expired(expired, &mut report);

        if !report.deleted.is_empty() || !report.failures.is_empty() {
            info!(
                "Swept {}: {} deleted, {} retained, {} failed",
                directory.display(),
                report.deleted.len(),
                report.retained(),
                report.failures.len()
            );
        } else {
            debug!(
                "Swept {}: nothing expired ({} files)",
                directory.display(),
                report.scanned
            );
        }

        self.set_state(SweeperState::Idle);
        report
    }

    fn collect_expired(&self, now: SystemTime, report: &mut SweepReport) -> Vec<PathBuf> {
        let directory = &self.policy.directory;
        let lease_clock = Instant::now();
        let mut expired = Vec::new();

        for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) {
                        debug!("Nothing to sweep, {} does not exist", directory.display());
                    } else {
                        warn!("Cannot scan {}: {}", directory.display(), e);
                    }
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            report.scanned += 1;

            let modified = match entry
                .metadata()
                .map_err(io::Error::from)
                .and_then(|m| m.modified())
            {
                Ok(m) => m,
                Err(e) => {
                    debug!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            if !self.policy.is_expired(modified, now) {
                continue;
            }

            if let Some(leases) = &self.leases {
                if leases.is_leased_at(entry.path(), lease_clock) {
                    debug!("Keeping leased file: {}", entry.path().display());
                    report.leased += 1;
                    continue;
                }
            }

            expired.push(entry.into_path());
        }

        if let Some(leases) = &self.leases {
            leases.prune_at(lease_clock);
        }

        expired
    }

    fn set_state(&self, state: SweeperState) {
        self.state.send_replace(state);
    }

    /// Spawn the periodic sweep loop on the current tokio runtime.
    ///
    /// The loop sweeps immediately, then every `sweep_interval`, until the
    /// returned handle is stopped or dropped.
    pub fn start(self) -> SweeperHandle {
        let directory = self.policy.directory.clone();
        let interval = self.policy.sweep_interval;
        let state = self.state.clone();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let sweeper = Arc::new(self);

        info!(
            "Starting retention sweeper for {} (max age {:?}, every {:?})",
            directory.display(),
            sweeper.policy.max_age,
            interval
        );

        let task = tokio::spawn(async move {
            loop {
                let pass = sweeper.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || pass.sweep_once()).await {
                    error!(
                        "Sweep of {} aborted: {}",
                        sweeper.policy.directory.display(),
                        e
                    );
                }

                sweeper.set_state(SweeperState::Sleeping);
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            sweeper.set_state(SweeperState::Stopped);
            info!(
                "Retention sweeper for {} stopped",
                sweeper.policy.directory.display()
            );
        });

        SweeperHandle {
            directory,
            shutdown: shutdown_tx,
            state,
            task,
        }
    }
}

/// Owner of a running sweep loop.
///
/// Dropping the handle also ends the loop at its next wake-up.
#[derive(Debug)]
pub struct SweeperHandle {
    directory: PathBuf,
    shutdown: watch::Sender<bool>,
    state: Arc<watch::Sender<SweeperState>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn state(&self) -> SweeperState {
        *self.state.borrow()
    }

    /// Signal the loop to stop and wait for it to finish.
    ///
    /// A pass already in progress completes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(
                "Retention sweeper for {} ended abnormally: {}",
                self.directory.display(),
                e
            );
        }
    }
}

/// Remove each path, recording failures without stopping.
fn delete_expired(expired: Vec<PathBuf>, report: &mut SweepReport) {
    for path in expired {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted expired file: {}", path.display());
                report.deleted.push(path);
            }
            Err(source) => {
                let failure = WorkflowError::SweepFailure { path, source };
                warn!("{}", failure);
                report.failures.push(failure);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn base_time() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn write_with_mtime(dir: &Path, name: &str, mtime: SystemTime) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"data").unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
        path
    }

    fn policy_for(dir: &Path) -> RetentionPolicy {
        RetentionPolicy::new(dir, HOUR, Duration::from_secs(1800))
    }

    #[test]
    fn test_sweep_deletes_only_expired_files() {
        let dir = TempDir::new().unwrap();
        let old = write_with_mtime(dir.path(), "old.xlsx", base_time());
        let fresh = write_with_mtime(dir.path(), "fresh.xlsx", base_time() + HOUR);

        let sweeper = RetentionSweeper::new(policy_for(dir.path()));
        let report = sweeper.sweep_at(base_time() + HOUR + Duration::from_secs(1));

        assert_eq!(report.scanned, 2);
        assert_eq!(report.deleted, vec![old.clone()]);
        assert_eq!(report.retained(), 1);
        assert!(report.failures.is_empty());
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn test_failed_deletion_does_not_stop_the_pass() {
        let dir = TempDir::new().unwrap();
        let vanished = write_with_mtime(dir.path(), "vanished.xlsx", base_time());
        let old = write_with_mtime(dir.path(), "old.pdf", base_time());
        fs::remove_file(&vanished).unwrap();

        let mut report = SweepReport::new(dir.path());
        report.scanned = 2;
        delete_expired(vec![vanished.clone(), old.clone()], &mut report);

        assert_eq!(report.failures.len(), 1);
        match &report.failures[0] {
            WorkflowError::SweepFailure { path, source } => {
                assert_eq!(path, &vanished);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected failure: {other:?}"),
        }
        assert_eq!(report.deleted, vec![old.clone()]);
        assert_eq!(report.retained(), 1);
        assert!(!old.exists());
    }

    #[test]
    fn test_exact_max_age_is_kept() {
        let dir = TempDir::new().unwrap();
        let file = write_with_mtime(dir.path(), "edge.pdf", base_time());
        let sweeper = RetentionSweeper::new(policy_for(dir.path()));

        let report = sweeper.sweep_at(base_time() + HOUR);
        assert!(report.deleted.is_empty());
        assert!(file.exists());

        let report = sweeper.sweep_at(base_time() + HOUR + Duration::from_millis(1));
        assert_eq!(report.deleted.len(), 1);
        assert!(!file.exists());
    }

    #[test]
    fn test_second_sweep_deletes_nothing() {
        let dir = TempDir::new().unwrap();
        write_with_mtime(dir.path(), "a.xlsx", base_time());
        write_with_mtime(dir.path(), "b.pdf", base_time());
        write_with_mtime(dir.path(), "c.pdf", base_time() + HOUR * 2);

        let sweeper = RetentionSweeper::new(policy_for(dir.path()));
        let now = base_time() + HOUR * 2;

        let first = sweeper.sweep_at(now);
        let second = sweeper.sweep_at(now);

        assert_eq!(first.deleted.len(), 2);
        assert!(second.deleted.is_empty());
        assert_eq!(second.scanned, 1);
    }

    #[test]
    fn test_sweep_ignores_subdirectories() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        let inner = write_with_mtime(&nested, "deep.xlsx", base_time());

        let sweeper = RetentionSweeper::new(policy_for(dir.path()));
        let report = sweeper.sweep_at(base_time() + HOUR * 10);

        assert_eq!(report.scanned, 0);
        assert!(inner.exists());
        assert!(nested.exists());
    }

    #[test]
    fn test_missing_directory_yields_empty_report() {
        let dir = TempDir::new().unwrap();
        let sweeper = RetentionSweeper::new(policy_for(&dir.path().join("gone")));

        let report = sweeper.sweep_once();
        assert_eq!(report.scanned, 0);
        assert!(report.failures.is_empty());
        assert_eq!(sweeper.state(), SweeperState::Idle);
    }

    #[test]
    fn test_leased_file_survives_sweep() {
        let dir = TempDir::new().unwrap();
        let leased = write_with_mtime(dir.path(), "download.xlsx", base_time());
        let unleased = write_with_mtime(dir.path(), "stale.xlsx", base_time());

        let leases = LeaseTable::new(Duration::from_secs(300));
        leases.lease(&leased);

        let sweeper = RetentionSweeper::new(policy_for(dir.path())).with_leases(leases);
        let report = sweeper.sweep_at(base_time() + HOUR * 3);

        assert_eq!(report.leased, 1);
        assert!(leased.exists());
        assert!(!unleased.exists());
    }

    #[tokio::test]
    async fn test_started_sweeper_runs_and_stops() {
        let dir = TempDir::new().unwrap();
        let old = write_with_mtime(dir.path(), "old.xlsx", base_time());

        let handle = RetentionSweeper::new(policy_for(dir.path())).start();
        assert_eq!(handle.directory(), dir.path());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while old.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!old.exists());

        let stopped = tokio::time::timeout(Duration::from_secs(5), handle.stop()).await;
        tokio_test::assert_ok!(stopped);
    }

    #[tokio::test]
    async fn test_independent_sweepers_do_not_interact() {
        let uploads = TempDir::new().unwrap();
        let outputs = TempDir::new().unwrap();
        let old_upload = write_with_mtime(uploads.path(), "u.xlsx", base_time());
        let kept_output = write_with_mtime(outputs.path(), "o.pdf", SystemTime::now());

        let a = RetentionSweeper::new(policy_for(uploads.path())).start();
        let b = RetentionSweeper::new(policy_for(outputs.path())).start();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while old_upload.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        a.stop().await;
        assert!(!old_upload.exists());
        assert!(kept_output.exists());
        assert_ne!(b.state(), SweeperState::Stopped);
        b.stop().await;
    }
}
