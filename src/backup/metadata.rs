//! Per-cycle metadata records written next to each snapshot.

use super::error::BackupError;
use super::manager::SchedulerStats;
use super::snapshot::DbInfo;
use super::timestamp::BackupTimestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub timestamp: BackupTimestamp,
    pub datetime: DateTime<Utc>,
    pub database: DatabaseSection,
    pub files: FilesSection,
    /// Totals right after this cycle's snapshot.
    pub stats: SchedulerStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub path: String,
    pub backup_file: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    pub info: Option<DbInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesSection {
    pub backup_file: Option<String>,
    pub included: bool,
}

impl BackupRecord {
    pub fn write_to(&self, path: &Path) -> Result<(), BackupError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| BackupError::MetadataWriteFailed(e.to_string()))?;
        fs::write(path, json)
            .map_err(|e| BackupError::MetadataWriteFailed(format!("{:?}: {}", path, e)))
    }

    /// Reads a record, tolerating a missing or damaged file.
    pub fn read_from(path: &Path) -> Option<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read backup metadata {:?}: {}", path, e);
                }
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring unparseable backup metadata {:?}: {}", path, e);
                None
            }
        }
    }
}
