//! Artifact discovery in the output directory.
//!
//! The locator only reads: it lists files directly under the output
//! directory, classifies them by extension and picks the most recently
//! modified file of each kind.
//!
//! Selecting "the latest file" is racy when several workflows write to the
//! same directory at once: the newest spreadsheet may belong to another
//! request. Job-scoped resolution in the orchestrator avoids this when the
//! collaborators report what they produced.

use crate::models::{ArtifactKind, OutputArtifact};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Read-only view over one output directory.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    output_dir: PathBuf,
}

impl ArtifactLocator {
    /// Create a locator for the given directory.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// List every artifact of a known kind directly under the directory.
    ///
    /// A missing or unreadable directory yields an empty list.
    pub fn scan(&self) -> Vec<OutputArtifact> {
        let mut artifacts = Vec::new();

        for entry in WalkDir::new(&self.output_dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Cannot read {}: {}", self.output_dir.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            if let Some(artifact) = describe(entry.path()) {
                artifacts.push(artifact);
            }
        }

        artifacts
    }

    /// The most recently modified artifact of `kind`, if any.
    pub fn latest(&self, kind: ArtifactKind) -> Option<OutputArtifact> {
        newest(self.scan().into_iter().filter(|a| a.kind == kind))
    }

    /// Latest spreadsheet followed by latest report document.
    ///
    /// Kinds without a matching file are skipped.
    pub fn latest_outputs(&self) -> Vec<OutputArtifact> {
        let scanned = self.scan();

        ArtifactKind::ALL
            .into_iter()
            .filter_map(|kind| newest(scanned.iter().filter(|a| a.kind == kind).cloned()))
            .collect()
    }

    /// Resolve paths reported by a collaborator into artifacts of this
    /// directory, newest per kind, spreadsheet first.
    ///
    /// Paths outside the directory, of unknown kind or missing on disk are
    /// ignored.
    pub fn resolve_reported(&self, reported: &[PathBuf]) -> Vec<OutputArtifact> {
        let root = canonical_or_self(&self.output_dir);
        let artifacts: Vec<OutputArtifact> = reported
            .iter()
            .filter(|path| {
                path.parent()
                    .map(|parent| canonical_or_self(parent) == root)
                    .unwrap_or(false)
            })
            .filter_map(|path| describe(path))
            .collect();

        ArtifactKind::ALL
            .into_iter()
            .filter_map(|kind| newest(artifacts.iter().filter(|a| a.kind == kind).cloned()))
            .collect()
    }
}

/// The most recently modified `kind` file directly under `directory`.
pub fn latest(directory: &Path, kind: ArtifactKind) -> Option<OutputArtifact> {
    ArtifactLocator::new(directory).latest(kind)
}

/// Latest spreadsheet and report document under `directory`, in that order.
pub fn latest_outputs(directory: &Path) -> Vec<OutputArtifact> {
    ArtifactLocator::new(directory).latest_outputs()
}

/// Build an artifact record for an existing file of known kind.
fn describe(path: &Path) -> Option<OutputArtifact> {
    let kind = ArtifactKind::from_path(path)?;
    let metadata = std::fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }

    let modified = match metadata.modified() {
        Ok(m) => m,
        Err(e) => {
            debug!("No modification time for {}: {}", path.display(), e);
            return None;
        }
    };

    Some(OutputArtifact {
        path: path.to_path_buf(),
        kind,
        modified_at: DateTime::<Utc>::from(modified),
    })
}

/// Pick the newest artifact; equal timestamps fall back to the greater
/// file name so repeated calls agree.
fn newest(candidates: impl Iterator<Item = OutputArtifact>) -> Option<OutputArtifact> {
    candidates.max_by(|a, b| {
        a.modified_at
            .cmp(&b.modified_at)
            .then_with(|| a.file_name().cmp(&b.file_name()))
    })
}

fn canonical_or_self(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
