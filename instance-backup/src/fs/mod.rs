//! File system helpers for selection, staging and restore.

pub mod link;
pub mod walker;

pub use link::{materialize, move_replace, Materialized};
pub use walker::{collect_files, should_backup, SelectedFile};
