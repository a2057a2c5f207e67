//! Typed index over the backup root directory.
//!
//! The backup root is the only persistence the scheduler has. Instead of
//! globbing names at every call site, the directory is rescanned on demand
//! into [`BackupArtifact`]s keyed by [`BackupTimestamp`], and every consumer
//! (retention, listing, status, restore) works on that typed view.

use super::timestamp::BackupTimestamp;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Suffix of an artifact that is still being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// The three kinds of file a cycle can leave in the backup root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    DatabaseSnapshot,
    Metadata,
    ProjectArchive,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::DatabaseSnapshot,
        ArtifactKind::Metadata,
        ArtifactKind::ProjectArchive,
    ];

    fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::DatabaseSnapshot => "db_backup_",
            ArtifactKind::Metadata => "backup_info_",
            ArtifactKind::ProjectArchive => "project_files_",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::DatabaseSnapshot => ".sqlite3",
            ArtifactKind::Metadata => ".json",
            ArtifactKind::ProjectArchive => ".zip",
        }
    }

    pub fn file_name(&self, timestamp: &BackupTimestamp) -> String {
        format!("{}{}{}", self.prefix(), timestamp, self.extension())
    }

    /// Recognizes a file name produced by [`ArtifactKind::file_name`].
    pub fn parse_file_name(name: &str) -> Option<(ArtifactKind, BackupTimestamp)> {
        Self::ALL.iter().find_map(|kind| {
            let timestamp = name
                .strip_prefix(kind.prefix())?
                .strip_suffix(kind.extension())?
                .parse()
                .ok()?;
            Some((*kind, timestamp))
        })
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::DatabaseSnapshot => write!(f, "database snapshot"),
            ArtifactKind::Metadata => write!(f, "metadata"),
            ArtifactKind::ProjectArchive => write!(f, "project archive"),
        }
    }
}

/// A file in the backup root that was recognized as one of ours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub kind: ArtifactKind,
    pub timestamp: BackupTimestamp,
    pub path: PathBuf,
}

impl BackupArtifact {
    pub fn file_name(&self) -> String {
        self.kind.file_name(&self.timestamp)
    }

    /// Size on disk, `None` if the file vanished since the scan.
    pub fn size_bytes(&self) -> Option<u64> {
        fs::metadata(&self.path).ok().map(|m| m.len())
    }
}

/// All artifacts currently on disk, grouped by kind, each newest-first.
#[derive(Debug, Clone, Default)]
pub struct RetentionSet {
    pub snapshots: Vec<BackupArtifact>,
    pub metadata: Vec<BackupArtifact>,
    pub archives: Vec<BackupArtifact>,
}

impl RetentionSet {
    pub fn from_artifacts(artifacts: impl IntoIterator<Item = BackupArtifact>) -> Self {
        let mut set = RetentionSet::default();
        for artifact in artifacts {
            match artifact.kind {
                ArtifactKind::DatabaseSnapshot => set.snapshots.push(artifact),
                ArtifactKind::Metadata => set.metadata.push(artifact),
                ArtifactKind::ProjectArchive => set.archives.push(artifact),
            }
        }
        for group in [&mut set.snapshots, &mut set.metadata, &mut set.archives] {
            group.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        }
        set
    }

    pub fn of_kind(&self, kind: ArtifactKind) -> &[BackupArtifact] {
        match kind {
            ArtifactKind::DatabaseSnapshot => &self.snapshots,
            ArtifactKind::Metadata => &self.metadata,
            ArtifactKind::ProjectArchive => &self.archives,
        }
    }

    pub fn latest_snapshot(&self) -> Option<&BackupArtifact> {
        self.snapshots.first()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.metadata.is_empty() && self.archives.is_empty()
    }
}

/// Handle on the backup root directory.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the backup root if needed.
    pub fn init(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, kind: ArtifactKind, timestamp: &BackupTimestamp) -> PathBuf {
        self.root.join(kind.file_name(timestamp))
    }

    /// Rescans the backup root. A missing root is an empty set.
    pub fn scan(&self) -> io::Result<RetentionSet> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RetentionSet::default()),
            Err(e) => return Err(e),
        };

        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match ArtifactKind::parse_file_name(name) {
                Some((kind, timestamp)) => artifacts.push(BackupArtifact {
                    kind,
                    timestamp,
                    path: entry.path(),
                }),
                None => debug!("Ignoring unrecognized file in backup root: {}", name),
            }
        }

        Ok(RetentionSet::from_artifacts(artifacts))
    }

    /// In-progress artifacts (`<artifact name>.tmp`) last modified more than
    /// `older_than` ago. These are left behind when a process dies mid-write.
    pub fn stale_temp_files(&self, older_than: Duration) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut stale = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let is_temp_artifact = name
                .to_str()
                .and_then(|n| n.strip_suffix(TEMP_SUFFIX))
                .and_then(ArtifactKind::parse_file_name)
                .is_some();
            if !is_temp_artifact {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.is_file() && metadata.modified().map_or(false, |m| m < cutoff) {
                stale.push(entry.path());
            }
        }
        stale.sort();
        Ok(stale)
    }

    /// Resolves a snapshot by its file name. Names that are not snapshot
    /// file names (including anything with a path component) never resolve.
    pub fn find_snapshot(&self, file_name: &str) -> Option<BackupArtifact> {
        let (kind, timestamp) = ArtifactKind::parse_file_name(file_name)?;
        if kind != ArtifactKind::DatabaseSnapshot {
            return None;
        }
        let path = self.path_for(kind, &timestamp);
        path.is_file().then_some(BackupArtifact {
            kind,
            timestamp,
            path,
        })
    }
}
