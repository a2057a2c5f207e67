//! Bounded retention of backup artifacts.

use super::error::BackupError;
use super::store::{ArtifactKind, BackupArtifact, BackupStore, RetentionSet};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Project archives kept regardless of `max_backups`.
pub const MAX_PROJECT_ARCHIVES: usize = 4;

/// Age after which an unfinished `.tmp` artifact is considered abandoned.
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Database snapshots kept, newest first. Metadata records follow the
    /// same limit since there is one per snapshot.
    pub max_backups: usize,
    pub max_archives: usize,
}

impl RetentionPolicy {
    pub fn new(max_backups: usize) -> Self {
        Self {
            max_backups,
            max_archives: MAX_PROJECT_ARCHIVES,
        }
    }

    pub fn limit_for(&self, kind: ArtifactKind) -> usize {
        match kind {
            ArtifactKind::DatabaseSnapshot | ArtifactKind::Metadata => self.max_backups,
            ArtifactKind::ProjectArchive => self.max_archives,
        }
    }

    /// Everything in `set` that falls outside the policy, per kind.
    pub fn expired<'a>(&self, set: &'a RetentionSet) -> Vec<&'a BackupArtifact> {
        ArtifactKind::ALL
            .iter()
            .flat_map(|kind| set.of_kind(*kind).iter().skip(self.limit_for(*kind)))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: usize,
    /// Abandoned `.tmp` files deleted.
    pub temp_removed: usize,
    pub failed: Vec<String>,
}

/// Deletes every artifact beyond the policy limits, plus `.tmp` leftovers
/// older than [`STALE_TEMP_AGE`]. Individual deletion failures are logged
/// and skipped; only a failure to scan the backup root is returned.
pub fn prune(store: &BackupStore, policy: &RetentionPolicy) -> Result<PruneReport, BackupError> {
    prune_with(store, policy, |path| fs::remove_file(path))
}

fn prune_with(
    store: &BackupStore,
    policy: &RetentionPolicy,
    mut remove: impl FnMut(&Path) -> io::Result<()>,
) -> Result<PruneReport, BackupError> {
    let set = store.scan()?;
    let mut report = PruneReport::default();

    for artifact in policy.expired(&set) {
        match remove(&artifact.path) {
            Ok(()) => report.removed += 1,
            Err(e) => {
                let err = BackupError::PruneFileFailed {
                    path: artifact.path.clone(),
                    cause: e.to_string(),
                };
                warn!("Failed to prune old {}: {}", artifact.kind, err);
                report.failed.push(err.to_string());
            }
        }
    }

    for path in store.stale_temp_files(STALE_TEMP_AGE)? {
        match remove(&path) {
            Ok(()) => report.temp_removed += 1,
            Err(e) => {
                let err = BackupError::PruneFileFailed {
                    path,
                    cause: e.to_string(),
                };
                warn!("Failed to remove abandoned temporary file: {}", err);
                report.failed.push(err.to_string());
            }
        }
    }

    if report.removed > 0 {
        info!("Pruned {} old backup files", report.removed);
    }
    if report.temp_removed > 0 {
        info!("Removed {} abandoned temporary files", report.temp_removed);
    }

    Ok(report)
}
