mod file_config;

pub use file_config::{ArchiveConfig, FileConfig};

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_MAX_BACKUPS: usize = 24;
pub const DEFAULT_ARCHIVE_EVERY: u32 = 6;
pub const DEFAULT_RETRY_COOLDOWN_SECS: u64 = 60;
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_BACKUP_DIR_NAME: &str = "backups_sqlite";

/// Database file names tried, in order, when no database path is given.
pub const CONVENTIONAL_DB_NAMES: &[&str] = &["db.sqlite3", "database.sqlite3", "django.sqlite3"];

/// Project files archived when no include list is configured.
pub const DEFAULT_INCLUDES: &[&str] = &["manage.py", "requirements.txt", "README.md"];

pub const DEFAULT_EXCLUDES: &[&str] = &[".git", "__pycache__", ".pyc", "node_modules", "target"];

/// CLI arguments that take part in config resolution.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub project_root: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub interval_secs: u64,
    pub max_backups: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            project_root: None,
            db_path: None,
            backup_dir: None,
            log_file: None,
            interval_secs: DEFAULT_INTERVAL_SECS,
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupConfig {
    pub project_root: PathBuf,
    pub db_path: PathBuf,
    pub backup_dir: PathBuf,
    pub log_file: Option<PathBuf>,

    pub interval_secs: u64,
    pub max_backups: usize,
    pub retry_cooldown_secs: u64,
    pub stop_timeout_secs: u64,

    /// Archive cadence in successful snapshots; 0 disables archiving.
    pub archive_every: u32,
    /// Paths relative to `project_root`. Empty disables archiving.
    pub include_paths: Vec<PathBuf>,
    pub exclude_patterns: Vec<String>,
}

impl BackupConfig {
    /// Defaults for a project rooted at `project_root`, with the database
    /// auto-detected.
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            db_path: detect_database(&project_root),
            backup_dir: project_root.join(DEFAULT_BACKUP_DIR_NAME),
            log_file: None,
            interval_secs: DEFAULT_INTERVAL_SECS,
            max_backups: DEFAULT_MAX_BACKUPS,
            retry_cooldown_secs: DEFAULT_RETRY_COOLDOWN_SECS,
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            archive_every: DEFAULT_ARCHIVE_EVERY,
            include_paths: DEFAULT_INCLUDES.iter().map(PathBuf::from).collect(),
            exclude_patterns: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            project_root,
        }
    }

    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let project_root = match file
            .project_root
            .map(PathBuf::from)
            .or_else(|| cli.project_root.clone())
        {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        if !project_root.is_dir() {
            bail!("Project root is not a directory: {:?}", project_root);
        }

        let mut config = Self::for_project(&project_root);

        if let Some(db_path) = file
            .db_path
            .map(|p| project_root.join(p))
            .or_else(|| cli.db_path.clone())
        {
            config.db_path = db_path;
        }
        if let Some(backup_dir) = file
            .backup_dir
            .map(|p| project_root.join(p))
            .or_else(|| cli.backup_dir.clone())
        {
            config.backup_dir = backup_dir;
        }
        config.log_file = file
            .log_file
            .map(|p| project_root.join(p))
            .or_else(|| cli.log_file.clone());

        config.interval_secs = file.interval_secs.unwrap_or(cli.interval_secs);
        config.max_backups = file.max_backups.unwrap_or(cli.max_backups);
        if let Some(cooldown) = file.retry_cooldown_secs {
            config.retry_cooldown_secs = cooldown;
        }
        if let Some(timeout) = file.stop_timeout_secs {
            config.stop_timeout_secs = timeout;
        }

        let archive = file.archive.unwrap_or_default();
        if let Some(every) = archive.every_snapshots {
            config.archive_every = every;
        }
        if let Some(include) = archive.include {
            config.include_paths = include.into_iter().map(PathBuf::from).collect();
        }
        if let Some(exclude) = archive.exclude {
            config.exclude_patterns = exclude;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            bail!("Backup interval must be at least 1 second");
        }
        if self.max_backups == 0 {
            bail!("max_backups must be at least 1");
        }
        if self.backup_dir == self.project_root {
            bail!("Backup directory must not be the project root itself");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_secs(self.retry_cooldown_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn archiving_enabled(&self) -> bool {
        self.archive_every > 0 && !self.include_paths.is_empty()
    }
}

/// First conventional database file that exists under `project_root`,
/// falling back to `db.sqlite3` there.
pub fn detect_database(project_root: &Path) -> PathBuf {
    CONVENTIONAL_DB_NAMES
        .iter()
        .map(|name| project_root.join(name))
        .find(|path| path.is_file())
        .unwrap_or_else(|| project_root.join(CONVENTIONAL_DB_NAMES[0]))
}
