//! Periodic, consistent backups of a live SQLite database.
//!
//! Each cycle takes an online snapshot of the database, optionally zips a
//! set of project paths, writes a JSON record describing the run and prunes
//! the backup directory down to its retention limits. Artifacts from one
//! cycle share a single timestamp in their file names.

mod archive;
mod error;
mod manager;
mod metadata;
mod retention;
mod scheduler;
mod snapshot;
mod store;
mod timestamp;

pub use archive::{take_project_archive, ArchiveHandle, ArchiveSpec};
pub use error::BackupError;
pub use manager::{
    pre_restore_path, BackupListing, BackupManager, BackupStatus, CycleReport, LatestBackup,
    RestoreReport, SchedulerStats, PRE_RESTORE_SUFFIX,
};
pub use metadata::{BackupRecord, DatabaseSection, FilesSection};
pub use retention::{prune, PruneReport, RetentionPolicy, MAX_PROJECT_ARCHIVES};
pub use scheduler::BackupScheduler;
pub use snapshot::{inspect_database, take_database_snapshot, DbInfo, SnapshotHandle};
pub use store::{ArtifactKind, BackupArtifact, BackupStore, RetentionSet};
pub use timestamp::{BackupTimestamp, InvalidTimestamp, TIMESTAMP_FORMAT};
