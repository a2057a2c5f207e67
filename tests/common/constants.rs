//! Shared constants for end-to-end tests

/// Name of the live database inside a test project.
pub const DB_FILE_NAME: &str = "db.sqlite3";

/// Rows seeded into the `rooms` table.
pub const SEEDED_ROOMS: usize = 3;

/// Rows seeded into the `bookings` table.
pub const SEEDED_BOOKINGS: usize = 5;

/// Project paths included in the archive when archiving is enabled.
pub const ARCHIVED_FILES: &[&str] = &["manage.py", "app/models.py", "app/views.py"];

/// Project paths that must never land in an archive.
pub const EXCLUDED_FILES: &[&str] = &["app/__pycache__/models.cpython-312.pyc", ".git/HEAD"];
