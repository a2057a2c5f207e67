//! SQLite backup scheduler library
//!
//! Exposes the backup engine and configuration for the `backup-scheduler`
//! binary and for integration tests.

pub mod backup;
pub mod config;

pub use backup::{BackupError, BackupManager, BackupScheduler};
pub use config::BackupConfig;
