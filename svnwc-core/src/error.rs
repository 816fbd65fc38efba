//! Working-copy error taxonomy
//!
//! Storage errors from SQLite and the filesystem are wrapped here; this is
//! the boundary where errors become user facing.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, WcError>;

#[derive(Debug, thiserror::Error)]
pub enum WcError {
    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("The node '{}' was not found", .0.display())]
    PathNotFound(PathBuf),

    #[error("Unexpected status: {0}")]
    UnexpectedStatus(String),

    #[error("Pristine text not found: {0}")]
    NotFound(String),

    #[error("Working copy is corrupt: {0}")]
    WcCorrupt(String),

    #[error("Working copy format {found} is too old (need {required}), please upgrade")]
    SchemaTooOld { found: i64, required: i64 },

    #[error("Working copy format {found} is too new (this client supports {supported})")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("Working copy '{}' has unfinished work, run cleanup", .0.display())]
    CleanupRequired(PathBuf),

    #[error("Working copy '{}' is locked", .0.display())]
    Locked(PathBuf),

    #[error("Working copy '{}' is not locked", .0.display())]
    NotLocked(PathBuf),

    #[error("'{}' is not a working copy", .0.display())]
    NotWorkingCopy(PathBuf),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Circular dependency in group '{0}'")]
    CircularDependency(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl WcError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        WcError::MalformedData(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        WcError::WcCorrupt(msg.into())
    }

    /// True for errors a caller may recover from by choosing another path.
    pub fn is_path_not_found(&self) -> bool {
        matches!(self, WcError::PathNotFound(_))
    }
}
