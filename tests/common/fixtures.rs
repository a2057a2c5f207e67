//! Test project fixture

#![allow(dead_code)]

use super::constants::*;
use rusqlite::Connection;
use sqlite_backup_scheduler::backup::BackupManager;
use sqlite_backup_scheduler::config::BackupConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary project root holding a seeded database and a few source
/// files. Everything is removed when the fixture is dropped.
pub struct TestProject {
    dir: TempDir,
    pub db_path: PathBuf,
}

impl TestProject {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join(DB_FILE_NAME);

        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE rooms (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             CREATE TABLE bookings (
                 id INTEGER PRIMARY KEY,
                 room_id INTEGER NOT NULL REFERENCES rooms(id),
                 guest TEXT NOT NULL
             );",
        )
        .unwrap();
        for i in 0..SEEDED_ROOMS {
            conn.execute("INSERT INTO rooms (name) VALUES (?1)", [format!("Room {}", i)])
                .unwrap();
        }
        for i in 0..SEEDED_BOOKINGS {
            conn.execute(
                "INSERT INTO bookings (room_id, guest) VALUES (?1, ?2)",
                rusqlite::params![(i % SEEDED_ROOMS) as i64 + 1, format!("Guest {}", i)],
            )
            .unwrap();
        }

        for file in ARCHIVED_FILES.iter().chain(EXCLUDED_FILES) {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("contents of {}", file)).unwrap();
        }

        Self { dir, db_path }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Default configuration for this project, archiving disabled.
    pub fn config(&self) -> BackupConfig {
        let mut config = BackupConfig::for_project(self.root());
        config.include_paths.clear();
        config
    }

    /// Configuration that archives `manage.py` and `app/` every cycle.
    pub fn archiving_config(&self) -> BackupConfig {
        let mut config = self.config();
        config.include_paths = vec![PathBuf::from("manage.py"), PathBuf::from("app")];
        config.archive_every = 1;
        config
    }

    pub fn manager(&self) -> BackupManager {
        BackupManager::new(self.config()).unwrap()
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.config().backup_dir
    }

    /// Sorted file names currently in the backup directory.
    pub fn backup_files(&self) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(self.backup_dir()) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    pub fn add_room(&self, name: &str) {
        let conn = Connection::open(&self.db_path).unwrap();
        conn.execute("INSERT INTO rooms (name) VALUES (?1)", [name])
            .unwrap();
    }

    pub fn room_names(path: &Path) -> Vec<String> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn.prepare("SELECT name FROM rooms ORDER BY id").unwrap();
        let names = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        names
    }
}
