use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by backup operations.
///
/// Only `SourceMissing`, `SnapshotFailed`, `SnapshotNotFound` and
/// `RestoreFailed` are ever returned to callers of a whole operation; the
/// remaining kinds describe step failures that are logged and absorbed.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Source database not found: {0:?}")]
    SourceMissing(PathBuf),

    #[error("Snapshot failed: {0}")]
    SnapshotFailed(String),

    #[error("Project archive failed: {0}")]
    ArchiveFailed(String),

    #[error("Metadata write failed: {0}")]
    MetadataWriteFailed(String),

    #[error("Failed to delete {path:?}: {cause}")]
    PruneFileFailed { path: PathBuf, cause: String },

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
