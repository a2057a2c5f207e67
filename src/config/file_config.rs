use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Contents of the optional TOML configuration file. Every field is
/// optional; anything present overrides the command line.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FileConfig {
    // Paths. Relative values are taken relative to `project_root`.
    pub project_root: Option<String>,
    pub db_path: Option<String>,
    pub backup_dir: Option<String>,
    pub log_file: Option<String>,

    // Schedule and retention
    pub interval_secs: Option<u64>,
    pub max_backups: Option<usize>,
    pub retry_cooldown_secs: Option<u64>,
    pub stop_timeout_secs: Option<u64>,

    pub archive: Option<ArchiveConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Archive once every this many successful snapshots, 0 disables.
    pub every_snapshots: Option<u32>,
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
