use crate::config::Config;
use crate::retention::LeaseTable;
use crate::storage::UploadStore;
use crate::workflow::{Collaborators, Orchestrator};
use std::path::Path;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub uploads: UploadStore,
    pub leases: Option<LeaseTable>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, uploads: UploadStore) -> Self {
        Self {
            orchestrator,
            uploads,
            leases: None,
        }
    }

    /// Command-backed state as described by the configuration.
    pub fn from_config(config: &Config) -> Self {
        let orchestrator = Orchestrator::new(
            config.storage.output_dir.clone(),
            Collaborators::from_config(&config.analysis),
        )
        .with_resolution(config.analysis.resolution);

        Self::new(orchestrator, UploadStore::new(config.storage.upload_dir.clone()))
    }

    /// Lease artifacts on hand-out and on download.
    pub fn with_leases(mut self, leases: LeaseTable) -> Self {
        self.orchestrator = self.orchestrator.with_leases(leases.clone());
        self.leases = Some(leases);
        self
    }

    pub fn output_dir(&self) -> &Path {
        self.orchestrator.output_dir()
    }
}
