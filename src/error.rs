//! Error taxonomy for the workflow and file-lifecycle core.
//!
//! Orchestrator failures are converted into a structured response at the
//! workflow boundary; sweep failures are only ever logged.

use std::path::PathBuf;
use thiserror::Error;

/// Closed set of failures produced by the core.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Malformed or empty region/year selection. User-correctable.
    #[error("{0}")]
    InvalidRequest(String),

    /// Missing, unnamed or unreadable uploaded file.
    #[error("{0}")]
    InvalidUpload(String),

    /// An expected file was not produced or could not be found.
    #[error("expected artifact not found: {}", path.display())]
    MissingArtifact { path: PathBuf },

    /// An external analysis routine reported an error.
    #[error("{collaborator} failed: {message}")]
    CollaboratorFailure {
        collaborator: &'static str,
        message: String,
    },

    /// A single file could not be deleted during a retention sweep.
    #[error("failed to delete {}: {source}", path.display())]
    SweepFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The upload store could not write to its directory.
    #[error("failed to store {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkflowError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn invalid_upload(message: impl Into<String>) -> Self {
        Self::InvalidUpload(message.into())
    }

    pub fn missing_artifact(path: impl Into<PathBuf>) -> Self {
        Self::MissingArtifact { path: path.into() }
    }

    /// Wrap an opaque collaborator error, keeping the whole context chain.
    pub fn collaborator(collaborator: &'static str, err: anyhow::Error) -> Self {
        Self::CollaboratorFailure {
            collaborator,
            message: format!("{err:#}"),
        }
    }

    /// True for failures the caller can fix by changing the request.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::InvalidUpload(_))
    }
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;
