//! Common test infrastructure
//!
//! Builds throwaway project directories with a populated SQLite database so
//! tests can drive the backup manager and scheduler end to end.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestProject;
//!
//! #[test]
//! fn test_backup() {
//!     let project = TestProject::new();
//!     let manager = project.manager();
//!     manager.backup_now().unwrap();
//! }
//! ```

mod constants;
mod fixtures;

pub use constants::*;
pub use fixtures::TestProject;
