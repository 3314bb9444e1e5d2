//! Short-lived download leases.
//!
//! Handing out a download reference takes a lease on the file; a sweeper
//! sharing the table leaves leased files alone until the grace window ends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Shared table of files that must not be swept yet.
#[derive(Debug, Clone)]
pub struct LeaseTable {
    grace: Duration,
    entries: Arc<Mutex<HashMap<PathBuf, Instant>>>,
}

impl LeaseTable {
    /// Create a table whose leases last `grace`.
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Lease `path` from now until now + grace, extending any existing lease.
    pub fn lease(&self, path: &Path) {
        self.lease_at(path, Instant::now());
    }

    pub fn lease_at(&self, path: &Path, now: Instant) {
        let key = lease_key(path);
        debug!("Leasing {} for {:?}", key.display(), self.grace);
        self.lock().insert(key, now + self.grace);
    }

    /// Whether `path` is still under lease at `now`.
    pub fn is_leased_at(&self, path: &Path, now: Instant) -> bool {
        self.lock()
            .get(&lease_key(path))
            .map(|expires| *expires > now)
            .unwrap_or(false)
    }

    pub fn is_leased(&self, path: &Path) -> bool {
        self.is_leased_at(path, Instant::now())
    }

    /// Drop expired leases. Returns how many were removed.
    pub fn prune_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, expires| *expires > now);
        before - entries.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Instant>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn lease_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
