//! Consistent snapshots of a live SQLite database.
//!
//! Snapshots go through SQLite's online backup API rather than a byte copy,
//! so concurrent writers are only blocked for the duration of each page
//! batch and the output is never caught in the middle of a transaction.

use super::error::BackupError;
use super::store::TEMP_SUFFIX;
use chrono::{DateTime, Utc};
use rusqlite::backup::{Backup, StepResult};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Pages copied per backup step before yielding to other connections.
const PAGES_PER_STEP: i32 = 256;

/// Pause between backup steps.
const STEP_PAUSE: Duration = Duration::from_millis(5);

/// How long the source may stay locked by another connection before the
/// snapshot gives up.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
enum CopyError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("source locked for more than {0:?}")]
    Locked(Duration),
}

/// A snapshot that was completely written and moved into place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHandle {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl SnapshotHandle {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Descriptive information about a live database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbInfo {
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
    /// User tables, `sqlite_*` internals excluded.
    pub tables: usize,
    /// Sum of `COUNT(*)` over all user tables.
    pub total_records: u64,
}

fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

fn temp_path_for(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(TEMP_SUFFIX);
    destination.with_file_name(name)
}

/// Copies `source` into `destination` through the online backup API.
///
/// The copy is written next to `destination` under a `.tmp` name and only
/// renamed into place once complete, so `destination` either holds a full
/// snapshot or does not exist.
pub fn take_database_snapshot(
    source: &Path,
    destination: &Path,
) -> Result<SnapshotHandle, BackupError> {
    snapshot_with_lock_timeout(source, destination, LOCK_TIMEOUT)
}

fn snapshot_with_lock_timeout(
    source: &Path,
    destination: &Path,
    lock_timeout: Duration,
) -> Result<SnapshotHandle, BackupError> {
    if !source.is_file() {
        return Err(BackupError::SourceMissing(source.to_path_buf()));
    }

    let temp_path = temp_path_for(destination);
    match copy_online(source, &temp_path, lock_timeout) {
        Ok(()) => {}
        Err(e) => {
            discard_partial(&temp_path);
            return Err(BackupError::SnapshotFailed(format!(
                "copying {:?} to {:?}: {}",
                source, temp_path, e
            )));
        }
    }

    if let Err(e) = fs::rename(&temp_path, destination) {
        discard_partial(&temp_path);
        return Err(BackupError::SnapshotFailed(format!(
            "moving snapshot into place at {:?}: {}",
            destination, e
        )));
    }

    let size_bytes = fs::metadata(destination)
        .map_err(|e| {
            BackupError::SnapshotFailed(format!("reading size of {:?}: {}", destination, e))
        })?
        .len();

    Ok(SnapshotHandle {
        path: destination.to_path_buf(),
        size_bytes,
    })
}

fn copy_online(
    source: &Path,
    temp_path: &Path,
    lock_timeout: Duration,
) -> Result<(), CopyError> {
    let src = open_read_only(source)?;
    let mut dst = Connection::open(temp_path)?;
    // lock waits are timed here, not inside SQLite
    src.busy_timeout(Duration::ZERO)?;
    dst.busy_timeout(Duration::ZERO)?;
    {
        let backup = Backup::new(&src, &mut dst)?;
        let mut blocked_since: Option<Instant> = None;
        loop {
            match backup.step(PAGES_PER_STEP)? {
                StepResult::Done => break,
                StepResult::More => blocked_since = None,
                // Busy or Locked
                _ => {
                    let since = *blocked_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= lock_timeout {
                        return Err(CopyError::Locked(lock_timeout));
                    }
                }
            }
            thread::sleep(STEP_PAUSE);
        }
    }
    dst.close().map_err(|(_, e)| e)?;
    Ok(())
}

fn discard_partial(temp_path: &Path) {
    if temp_path.exists() {
        if let Err(e) = fs::remove_file(temp_path) {
            warn!("Failed to remove partial snapshot {:?}: {}", temp_path, e);
        }
    }
}

/// Inspects a live database. Returns `None` (and logs) when the file is
/// missing or cannot be read as SQLite.
pub fn inspect_database(path: &Path) -> Option<DbInfo> {
    let metadata = fs::metadata(path).ok()?;
    let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

    match count_tables_and_records(path) {
        Ok((tables, total_records)) => Some(DbInfo {
            size_bytes: metadata.len(),
            modified,
            tables,
            total_records,
        }),
        Err(e) => {
            warn!("Failed to inspect database {:?}: {}", path, e);
            None
        }
    }
}

fn count_tables_and_records(path: &Path) -> rusqlite::Result<(usize, u64)> {
    let conn = open_read_only(path)?;
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'",
    )?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    let mut total_records = 0u64;
    for table in &tables {
        let quoted = table.replace('"', "\"\"");
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", quoted), [], |row| {
                row.get(0)
            })?;
        total_records += count.max(0) as u64;
    }
    debug!(
        "Inspected {:?}: {} tables, {} records",
        path,
        tables.len(),
        total_records
    );

    Ok((tables.len(), total_records))
}
