//! Synchronous backup operations.
//!
//! `BackupManager` owns the backup root and the scheduler statistics. All
//! operations are blocking and may be called from any thread; the periodic
//! loop in [`super::scheduler`] drives `backup_now` from a blocking task.
//! Cycles and restores are serialized by a single cycle guard, and the stats
//! live behind their own short-lived guard so status queries never wait for
//! a running cycle.

use super::archive::{take_project_archive, ArchiveHandle, ArchiveSpec};
use super::error::BackupError;
use super::metadata::{BackupRecord, DatabaseSection, FilesSection};
use super::retention::{self, PruneReport, RetentionPolicy};
use super::snapshot::{inspect_database, take_database_snapshot, DbInfo, SnapshotHandle};
use super::store::{ArtifactKind, BackupStore};
use super::timestamp::BackupTimestamp;
use crate::config::BackupConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

/// Suffix appended to the live database file name for the copy taken
/// right before a restore overwrites it.
pub const PRE_RESTORE_SUFFIX: &str = ".pre-restore";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_snapshots: u64,
    pub last_snapshot: Option<BackupTimestamp>,
    pub last_size: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
struct CycleState {
    stats: SchedulerStats,
    archive_attempted: bool,
    snapshots_since_archive: u32,
}

/// Outcome of one successful cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub timestamp: BackupTimestamp,
    pub snapshot: SnapshotHandle,
    pub archive: Option<ArchiveHandle>,
    pub archive_error: Option<String>,
    pub metadata_written: bool,
    pub pruned: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestBackup {
    pub file: String,
    pub created: DateTime<Utc>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupStatus {
    pub running: bool,
    pub db_path: PathBuf,
    pub db_exists: bool,
    pub db_info: Option<DbInfo>,
    pub backup_dir: PathBuf,
    pub interval_secs: u64,
    pub max_backups: usize,
    pub stats: SchedulerStats,
    pub existing_backups: usize,
    pub latest_backup: Option<LatestBackup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupListing {
    pub filename: String,
    pub timestamp: BackupTimestamp,
    pub created: DateTime<Utc>,
    pub size_bytes: Option<u64>,
    /// `None` when the metadata file is missing or unreadable.
    pub record: Option<BackupRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored_from: PathBuf,
    /// Where the previous live database was copied, if there was one.
    pub pre_restore_copy: Option<PathBuf>,
}

pub struct BackupManager {
    config: BackupConfig,
    store: BackupStore,
    policy: RetentionPolicy,
    cycle_guard: Mutex<()>,
    state: Mutex<CycleState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BackupManager {
    /// Create a manager and make sure the backup root exists.
    pub fn new(config: BackupConfig) -> Result<Self, BackupError> {
        let store = BackupStore::new(&config.backup_dir);
        store.init()?;
        let policy = RetentionPolicy::new(config.max_backups);

        info!("Backup manager initialized");
        info!("  Database: {:?}", config.db_path);
        info!("  Backups: {:?}", config.backup_dir);
        info!(
            "  Interval: {}s, keeping {} snapshots",
            config.interval_secs, config.max_backups
        );

        Ok(Self {
            config,
            store,
            policy,
            cycle_guard: Mutex::new(()),
            state: Mutex::new(CycleState::default()),
        })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    /// Copy of the current statistics.
    pub fn stats(&self) -> SchedulerStats {
        lock(&self.state).stats.clone()
    }

    /// Counts a cycle that died without reporting through `backup_now`.
    pub fn record_unexpected_failure(&self) {
        lock(&self.state).stats.errors += 1;
    }

    /// Runs one full cycle: snapshot, conditional archive, metadata, prune.
    ///
    /// When the snapshot fails nothing else is written for this cycle, the
    /// prune still runs, and the snapshot error is returned.
    pub fn backup_now(&self) -> Result<CycleReport, BackupError> {
        let _cycle = lock(&self.cycle_guard);
        let timestamp = BackupTimestamp::now();
        info!("Starting backup cycle {}", timestamp);

        let snapshot = match self.snapshot(&timestamp) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                lock(&self.state).stats.errors += 1;
                match &e {
                    BackupError::SourceMissing(path) => {
                        error!("Database not found, skipping backup: {:?}", path)
                    }
                    _ => error!("Database snapshot failed: {}", e),
                }
                self.prune_logged();
                return Err(e);
            }
        };
        info!(
            "Snapshot created: {} ({:#})",
            snapshot.file_name(),
            byte_unit::Byte::from(snapshot.size_bytes)
        );

        let stats = {
            let mut state = lock(&self.state);
            state.stats.total_snapshots += 1;
            state.stats.last_snapshot = Some(timestamp);
            state.stats.last_size = snapshot.size_bytes;
            state.snapshots_since_archive += 1;
            state.stats.clone()
        };

        let archive_included = self.claim_archive_slot();
        let (archive, archive_error) = if archive_included {
            match self.archive(&timestamp) {
                Ok(handle) => (Some(handle), None),
                Err(e) => {
                    lock(&self.state).stats.errors += 1;
                    error!("Project archive failed: {}", e);
                    (None, Some(e.to_string()))
                }
            }
        } else {
            (None, None)
        };

        let record = BackupRecord {
            timestamp,
            datetime: Utc::now(),
            database: DatabaseSection {
                path: self.config.db_path.to_string_lossy().into_owned(),
                backup_file: Some(snapshot.file_name()),
                size_bytes: Some(snapshot.size_bytes),
                info: inspect_database(&self.config.db_path),
            },
            files: FilesSection {
                backup_file: archive.as_ref().map(|a| a.file_name()),
                included: archive_included,
            },
            stats,
        };
        let metadata_path = self.store.path_for(ArtifactKind::Metadata, &timestamp);
        let metadata_written = match record.write_to(&metadata_path) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to write {:?}: {}", metadata_path, e);
                false
            }
        };

        let pruned = self.prune_logged();
        info!("Backup cycle {} complete", timestamp);

        Ok(CycleReport {
            timestamp,
            snapshot,
            archive,
            archive_error,
            metadata_written,
            pruned,
        })
    }

    fn snapshot(&self, timestamp: &BackupTimestamp) -> Result<SnapshotHandle, BackupError> {
        if !self.config.db_path.is_file() {
            return Err(BackupError::SourceMissing(self.config.db_path.clone()));
        }
        self.store
            .init()
            .map_err(|e| BackupError::SnapshotFailed(format!("creating backup root: {}", e)))?;
        let destination = self.store.path_for(ArtifactKind::DatabaseSnapshot, timestamp);
        take_database_snapshot(&self.config.db_path, &destination)
    }

    /// Decides whether this cycle archives, and books the attempt if so.
    fn claim_archive_slot(&self) -> bool {
        if !self.config.archiving_enabled() {
            return false;
        }
        let mut state = lock(&self.state);
        let due = !state.archive_attempted
            || state.snapshots_since_archive >= self.config.archive_every;
        if due {
            state.archive_attempted = true;
            state.snapshots_since_archive = 0;
        }
        due
    }

    fn archive(&self, timestamp: &BackupTimestamp) -> Result<ArchiveHandle, BackupError> {
        info!("Archiving project files...");
        let mut exclude = self.config.exclude_patterns.clone();
        // never archive the backup root into itself
        if let Ok(relative) = self.config.backup_dir.strip_prefix(&self.config.project_root) {
            if !relative.as_os_str().is_empty() {
                exclude.push(relative.to_string_lossy().into_owned());
            }
        }
        let spec = ArchiveSpec {
            project_root: &self.config.project_root,
            include: &self.config.include_paths,
            exclude: &exclude,
        };
        let destination = self.store.path_for(ArtifactKind::ProjectArchive, timestamp);
        let handle = take_project_archive(&spec, &destination)?;
        info!(
            "Project archive created: {} ({} files, {:#})",
            handle.file_name(),
            handle.files_added,
            byte_unit::Byte::from(handle.size_bytes)
        );
        Ok(handle)
    }

    /// Applies the retention policy to the backup root.
    pub fn prune(&self) -> Result<PruneReport, BackupError> {
        retention::prune(&self.store, &self.policy)
    }

    fn prune_logged(&self) -> usize {
        match self.prune() {
            Ok(report) => report.removed,
            Err(e) => {
                error!("Failed to prune {:?}: {}", self.store.root(), e);
                0
            }
        }
    }

    /// Current state of the live database, the backup root and the stats.
    /// Never fails: anything that cannot be read is left empty.
    pub fn status(&self, running: bool) -> BackupStatus {
        let set = match self.store.scan() {
            Ok(set) => set,
            Err(e) => {
                warn!("Failed to scan {:?}: {}", self.store.root(), e);
                Default::default()
            }
        };
        let latest_backup = set.latest_snapshot().map(|artifact| LatestBackup {
            file: artifact.file_name(),
            created: artifact.timestamp.to_datetime(),
            size_bytes: artifact.size_bytes(),
        });

        BackupStatus {
            running,
            db_path: self.config.db_path.clone(),
            db_exists: self.config.db_path.is_file(),
            db_info: inspect_database(&self.config.db_path),
            backup_dir: self.config.backup_dir.clone(),
            interval_secs: self.config.interval_secs,
            max_backups: self.config.max_backups,
            stats: self.stats(),
            existing_backups: set.snapshots.len(),
            latest_backup,
        }
    }

    /// All snapshots, newest first, each with its metadata record if readable.
    pub fn list_backups(&self) -> Result<Vec<BackupListing>, BackupError> {
        let set = self.store.scan()?;
        Ok(set
            .snapshots
            .iter()
            .map(|artifact| {
                let metadata_path = self
                    .store
                    .path_for(ArtifactKind::Metadata, &artifact.timestamp);
                BackupListing {
                    filename: artifact.file_name(),
                    timestamp: artifact.timestamp,
                    created: artifact.timestamp.to_datetime(),
                    size_bytes: artifact.size_bytes(),
                    record: BackupRecord::read_from(&metadata_path),
                }
            })
            .collect())
    }

    /// Replaces the live database with the named snapshot.
    ///
    /// The live database, if present, is first copied to
    /// `<name>.pre-restore` next to it (replacing any earlier copy), so the
    /// prior state survives even if the overwrite fails half way.
    pub fn restore(&self, snapshot_name: &str) -> Result<RestoreReport, BackupError> {
        let _cycle = lock(&self.cycle_guard);

        let Some(snapshot) = self.store.find_snapshot(snapshot_name) else {
            error!("Snapshot not found: {}", snapshot_name);
            return Err(BackupError::SnapshotNotFound(snapshot_name.to_string()));
        };
        info!("Restoring {}...", snapshot_name);

        let live = &self.config.db_path;
        let pre_restore_copy = if live.is_file() {
            let sidecar = pre_restore_path(live);
            fs::copy(live, &sidecar).map_err(|e| {
                error!("Failed to save current database to {:?}: {}", sidecar, e);
                BackupError::RestoreFailed(format!(
                    "saving current database to {:?}: {}",
                    sidecar, e
                ))
            })?;
            info!("Current database saved to {:?}", sidecar);
            Some(sidecar)
        } else {
            None
        };

        fs::copy(&snapshot.path, live).map_err(|e| {
            error!("Failed to copy {:?} over {:?}: {}", snapshot.path, live, e);
            BackupError::RestoreFailed(format!(
                "copying {:?} over {:?}: {}",
                snapshot.path, live, e
            ))
        })?;
        info!("Restored {} into {:?}", snapshot_name, live);

        Ok(RestoreReport {
            restored_from: snapshot.path,
            pre_restore_copy,
        })
    }
}

/// `<dir>/<file name>.pre-restore` for a live database path.
pub fn pre_restore_path(live: &std::path::Path) -> PathBuf {
    let mut name = live.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(PRE_RESTORE_SUFFIX);
    live.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::path::Path;
    use tempfile::TempDir;

    fn create_db(path: &Path, rows: usize) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch("CREATE TABLE IF NOT EXISTS rooms (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        for i in 0..rows {
            conn.execute("INSERT INTO rooms (name) VALUES (?1)", [format!("Room {}", i)])
                .unwrap();
        }
    }

    fn backup_root_names(manager: &BackupManager) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(manager.store().root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn manager_for(dir: &TempDir) -> BackupManager {
        let mut config = BackupConfig::for_project(dir.path());
        config.include_paths.clear();
        BackupManager::new(config).unwrap()
    }

    #[test]
    fn test_backup_now_writes_snapshot_and_metadata() {
        let dir = TempDir::new().unwrap();
        create_db(&dir.path().join("db.sqlite3"), 4);
        let manager = manager_for(&dir);

        let report = manager.backup_now().unwrap();
        assert!(report.metadata_written);
        assert!(report.archive.is_none());
        assert_eq!(report.pruned, 0);

        let ts = report.timestamp.to_string();
        assert_eq!(
            backup_root_names(&manager),
            vec![
                format!("backup_info_{}.json", ts),
                format!("db_backup_{}.sqlite3", ts),
            ]
        );

        let stats = manager.stats();
        assert_eq!(stats.total_snapshots, 1);
        assert_eq!(stats.last_snapshot, Some(report.timestamp));
        assert_eq!(stats.last_size, report.snapshot.size_bytes);
        assert_eq!(stats.errors, 0);

        let record = BackupRecord::read_from(
            &manager
                .store()
                .path_for(ArtifactKind::Metadata, &report.timestamp),
        )
        .unwrap();
        assert_eq!(record.database.backup_file, Some(report.snapshot.file_name()));
        assert_eq!(record.database.info.unwrap().total_records, 4);
        assert!(!record.files.included);
        assert_eq!(record.stats.total_snapshots, 1);
    }

    #[test]
    fn test_missing_source_counts_one_error_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let manager = manager_for(&dir);

        let err = manager.backup_now().unwrap_err();
        assert!(matches!(err, BackupError::SourceMissing(_)));
        assert_eq!(manager.stats().errors, 1);
        assert_eq!(manager.stats().total_snapshots, 0);
        assert!(backup_root_names(&manager).is_empty());
    }

    #[test]
    fn test_archive_cadence() {
        let dir = TempDir::new().unwrap();
        create_db(&dir.path().join("db.sqlite3"), 1);
        fs::write(dir.path().join("manage.py"), "main()").unwrap();
        let mut config = BackupConfig::for_project(dir.path());
        config.include_paths = vec![PathBuf::from("manage.py")];
        config.archive_every = 3;
        let manager = BackupManager::new(config).unwrap();

        // first cycle always archives, then every third snapshot
        let expected = [true, false, false, true, false, false, true];
        for want in expected {
            assert_eq!(manager.claim_archive_slot_after_snapshot(), want);
        }
    }

    #[test]
    fn test_archive_included_in_first_cycle() {
        let dir = TempDir::new().unwrap();
        create_db(&dir.path().join("db.sqlite3"), 1);
        fs::create_dir(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("app/models.py"), "class Room: pass").unwrap();
        let mut config = BackupConfig::for_project(dir.path());
        config.include_paths = vec![PathBuf::from("app")];
        let manager = BackupManager::new(config).unwrap();

        let report = manager.backup_now().unwrap();
        let archive = report.archive.unwrap();
        assert_eq!(archive.files_added, 1);
        assert_eq!(
            archive.file_name(),
            format!("project_files_{}.zip", report.timestamp)
        );

        let record = BackupRecord::read_from(
            &manager
                .store()
                .path_for(ArtifactKind::Metadata, &report.timestamp),
        )
        .unwrap();
        assert!(record.files.included);
        assert_eq!(record.files.backup_file, Some(archive.file_name()));
    }

    #[test]
    fn test_archive_skips_backup_root() {
        let dir = TempDir::new().unwrap();
        create_db(&dir.path().join("db.sqlite3"), 1);
        fs::write(dir.path().join("manage.py"), "main()").unwrap();
        let mut config = BackupConfig::for_project(dir.path());
        config.include_paths = vec![PathBuf::from(".")];
        let manager = BackupManager::new(config).unwrap();
        fs::write(
            manager.store().root().join("db_backup_20200101_000000.sqlite3"),
            b"old",
        )
        .unwrap();

        let report = manager.backup_now().unwrap();
        let archive = report.archive.unwrap();
        // db.sqlite3 and manage.py only
        assert_eq!(archive.files_added, 2);
    }

    #[test]
    fn test_archive_failure_does_not_block_metadata() {
        let dir = TempDir::new().unwrap();
        create_db(&dir.path().join("db.sqlite3"), 1);
        fs::write(dir.path().join("manage.py"), "main()").unwrap();
        let mut config = BackupConfig::for_project(dir.path());
        config.include_paths = vec![PathBuf::from("manage.py")];
        let manager = BackupManager::new(config).unwrap();

        // occupy the archive's temp path with a directory so the write fails
        let ts_guess = BackupTimestamp::now();
        for offset in 0..3 {
            let ts = BackupTimestamp::from_datetime(
                ts_guess.to_datetime() + chrono::Duration::seconds(offset),
            );
            let blocker = manager
                .store()
                .root()
                .join(format!("{}.tmp", ArtifactKind::ProjectArchive.file_name(&ts)));
            fs::create_dir_all(&blocker).unwrap();
        }

        let report = manager.backup_now().unwrap();
        assert!(report.archive.is_none());
        assert!(report.archive_error.is_some());
        assert!(report.metadata_written);
        assert_eq!(manager.stats().errors, 1);
    }

    #[test]
    fn test_status_and_listing() {
        let dir = TempDir::new().unwrap();
        create_db(&dir.path().join("db.sqlite3"), 2);
        let manager = manager_for(&dir);

        let status = manager.status(false);
        assert!(!status.running);
        assert!(status.db_exists);
        assert_eq!(status.db_info.as_ref().unwrap().total_records, 2);
        assert_eq!(status.existing_backups, 0);
        assert!(status.latest_backup.is_none());
        assert!(manager.list_backups().unwrap().is_empty());

        let report = manager.backup_now().unwrap();
        let status = manager.status(true);
        assert!(status.running);
        assert_eq!(status.existing_backups, 1);
        let latest = status.latest_backup.unwrap();
        assert_eq!(latest.file, report.snapshot.file_name());
        assert_eq!(latest.created, report.timestamp.to_datetime());
        assert_eq!(latest.size_bytes, Some(report.snapshot.size_bytes));

        let listing = manager.list_backups().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].filename, report.snapshot.file_name());
        assert!(listing[0].record.is_some());
    }

    #[test]
    fn test_listing_tolerates_corrupt_metadata() {
        let dir = TempDir::new().unwrap();
        let manager = manager_for(&dir);
        let root = manager.store().root().to_path_buf();
        fs::write(root.join("db_backup_20260101_100000.sqlite3"), b"a").unwrap();
        fs::write(root.join("db_backup_20260102_100000.sqlite3"), b"b").unwrap();
        fs::write(root.join("backup_info_20260102_100000.json"), b"{ not json").unwrap();

        let listing = manager.list_backups().unwrap();
        let names: Vec<&str> = listing.iter().map(|l| l.filename.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "db_backup_20260102_100000.sqlite3",
                "db_backup_20260101_100000.sqlite3"
            ]
        );
        assert!(listing.iter().all(|l| l.record.is_none()));
    }

    #[test]
    fn test_restore_round_trip_and_sidecar() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("db.sqlite3");
        create_db(&live, 2);
        let manager = manager_for(&dir);
        let report = manager.backup_now().unwrap();
        let snapshot_bytes = fs::read(&report.snapshot.path).unwrap();

        create_db(&live, 50);
        let before_restore = fs::read(&live).unwrap();

        let restored = manager.restore(&report.snapshot.file_name()).unwrap();
        assert_eq!(restored.restored_from, report.snapshot.path);
        assert_eq!(fs::read(&live).unwrap(), snapshot_bytes);

        let sidecar = restored.pre_restore_copy.unwrap();
        assert_eq!(sidecar, dir.path().join("db.sqlite3.pre-restore"));
        assert_eq!(fs::read(&sidecar).unwrap(), before_restore);
    }

    #[test]
    fn test_restore_unknown_snapshot() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("db.sqlite3");
        create_db(&live, 1);
        let manager = manager_for(&dir);
        let before = fs::read(&live).unwrap();

        for name in [
            "db_backup_20200101_000000.sqlite3",
            "../db.sqlite3",
            "whatever",
        ] {
            let err = manager.restore(name).unwrap_err();
            assert!(matches!(err, BackupError::SnapshotNotFound(_)));
        }
        assert_eq!(fs::read(&live).unwrap(), before);
        assert!(!pre_restore_path(&live).exists());
    }

    #[test]
    fn test_restore_without_live_database() {
        let dir = TempDir::new().unwrap();
        let manager = manager_for(&dir);
        let name = "db_backup_20260101_100000.sqlite3";
        fs::write(manager.store().root().join(name), b"snapshot bytes").unwrap();

        let report = manager.restore(name).unwrap();
        assert!(report.pre_restore_copy.is_none());
        assert_eq!(
            fs::read(dir.path().join("db.sqlite3")).unwrap(),
            b"snapshot bytes"
        );
    }

    impl BackupManager {
        /// Simulates a successful snapshot and reports whether it archives.
        fn claim_archive_slot_after_snapshot(&self) -> bool {
            lock(&self.state).snapshots_since_archive += 1;
            self.claim_archive_slot()
        }
    }
}
